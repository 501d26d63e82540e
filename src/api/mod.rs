// API module - HTTP endpoints

pub mod auth;
pub mod classes;
pub mod dashboard;
pub mod extract;
pub mod health;
pub mod inventory;
pub mod maintenance;
pub mod members;
pub mod memberships;
pub mod middleware;
pub mod notifications;
pub mod payments;
pub mod plans;
pub mod requests;
pub mod state;
pub mod uploads;

use axum::Router;

use crate::error::{AppError, Result};

pub use state::AppState;

/// All routes, without the outer tracing/CORS layers
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(members::router())
        .merge(plans::router())
        .merge(memberships::router())
        .merge(payments::router())
        .merge(inventory::router())
        .merge(maintenance::router())
        .merge(notifications::router())
        .merge(classes::router())
        .merge(requests::router())
        .merge(uploads::router())
        .merge(dashboard::router())
}

/// Builds the application with its state attached
pub fn app(state: AppState) -> Router {
    router().with_state(state)
}

/// Trims a mandatory text field, rejecting it when blank
pub(crate) fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

pub(crate) fn validate_email(email: &str) -> Result<String> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(email.to_lowercase())
        }
        _ => Err(AppError::Validation("email is not valid".to_string())),
    }
}

/// Minimum length enforced on new passwords
const MIN_PASSWORD_LEN: usize = 8;

/// Hashes a password off the async runtime
pub(crate) async fn hash_password(password: &str) -> Result<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| AppError::Internal(e.into()))
}
