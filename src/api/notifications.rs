use axum::{
    extract::State,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::required;
use crate::api::state::AppState;
use crate::error::{is_timeout, AppError, Result};
use crate::models::member::Member;
use crate::models::notification::{NewNotification, Notification};
use crate::models::user::Role;
use crate::services::notifier::{self, kind, Audience};

const LIST_LIMIT: i64 = 100;

/// Set on list responses served empty because the database timed out
pub const DEGRADED_HEADER: &str = "x-degraded";

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub member_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    /// Omitted means every active member
    pub member_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendNotificationResponse {
    pub created: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notifications",
            get(list_notifications).post(send_notification),
        )
        .route("/api/notifications/read-all", patch(mark_all_read))
        .route("/api/notifications/:id/read", patch(mark_read))
}

async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    AppQuery(query): AppQuery<ListNotificationsQuery>,
) -> Result<Response> {
    let result = match (auth.role, query.member_id) {
        (Role::Member, _) => {
            let member_id = auth.own_member_id()?;
            Notification::list_for_member(&state.pool, member_id, query.unread_only, LIST_LIMIT)
                .await
        }
        (Role::Admin, Some(member_id)) => {
            Notification::list_for_member(&state.pool, member_id, query.unread_only, LIST_LIMIT)
                .await
        }
        (Role::Admin, None) => {
            Notification::list_recent(&state.pool, query.unread_only, LIST_LIMIT).await
        }
        (Role::Trainer, _) => return Err(AppError::Forbidden),
    };

    match result {
        Ok(notifications) => Ok(Json(notifications).into_response()),
        Err(e) if is_timeout(&e) => {
            tracing::warn!(user_id = %auth.user_id, error = %e, "Notification list timed out, serving empty list");
            Ok(degraded_empty_list())
        }
        Err(e) => Err(e.into()),
    }
}

fn degraded_empty_list() -> Response {
    (
        [(
            HeaderName::from_static(DEGRADED_HEADER),
            HeaderValue::from_static("timeout"),
        )],
        Json(json!([])),
    )
        .into_response()
}

async fn send_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<SendNotificationRequest>,
) -> Result<(StatusCode, Json<SendNotificationResponse>)> {
    auth.require(&[Role::Admin])?;

    let title = required("title", &req.title)?;
    let message = required("message", &req.message)?;
    let kind = req
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or(kind::GENERAL);

    if let Some(member_id) = req.member_id {
        Member::find_by_id(&state.pool, member_id)
            .await?
            .ok_or_else(|| AppError::not_found("Member"))?;
    }

    let created = notifier::send(
        &state.pool,
        Audience::from_target(req.member_id),
        &NewNotification::new(kind, title, message),
    )
    .await?;

    tracing::info!(created, sent_by = %auth.user_id, "Notification sent");

    Ok((
        StatusCode::CREATED,
        Json(SendNotificationResponse { created }),
    ))
}

async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Notification>> {
    let notification = Notification::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Notification"))?;

    if !auth.is_admin() && auth.member_id != Some(notification.member_id) {
        return Err(AppError::Forbidden);
    }

    let notification = Notification::mark_read(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Notification"))?;

    Ok(Json(notification))
}

async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>> {
    let member_id = auth.own_member_id()?;
    let updated = Notification::mark_all_read(&state.pool, member_id).await?;
    Ok(Json(json!({ "updated": updated })))
}
