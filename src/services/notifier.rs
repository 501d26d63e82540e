use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::notification::{NewNotification, Notification};

/// Notification kinds written by the back office
pub mod kind {
    pub const GENERAL: &str = "general";
    pub const MEMBERSHIP: &str = "membresia";
    pub const REQUEST: &str = "solicitud";
    pub const CLASS: &str = "clase";
    pub const PAYMENT: &str = "pago";
}

/// Who receives a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Member(Uuid),
    AllActiveMembers,
}

impl Audience {
    pub fn from_target(member_id: Option<Uuid>) -> Self {
        match member_id {
            Some(id) => Audience::Member(id),
            None => Audience::AllActiveMembers,
        }
    }
}

/// Writes a notification and returns how many rows were inserted
pub async fn send<'e>(
    executor: impl PgExecutor<'e>,
    audience: Audience,
    notification: &NewNotification,
) -> Result<u64, sqlx::Error> {
    match audience {
        Audience::Member(member_id) => {
            Notification::insert_for_member(executor, member_id, notification).await?;
            Ok(1)
        }
        Audience::AllActiveMembers => {
            let count = Notification::insert_for_active_members(executor, notification).await?;
            tracing::info!(count, kind = %notification.kind, "Broadcast notification");
            Ok(count)
        }
    }
}

/// Notifies a single member; failures are logged and swallowed
pub async fn notify_member_best_effort(pool: &PgPool, member_id: Uuid, notification: NewNotification) {
    if let Err(e) = send(pool, Audience::Member(member_id), &notification).await {
        tracing::warn!(
            member_id = %member_id,
            kind = %notification.kind,
            error = %e,
            "Failed to write notification"
        );
    }
}
