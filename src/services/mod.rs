// Services module - Business logic

pub mod auth_token;
pub mod memberships;
pub mod notifier;
pub mod receipt_pdf;
pub mod s3;
