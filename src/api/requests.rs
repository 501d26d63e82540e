use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::state::AppState;
use crate::error::{is_unique_violation, AppError, Result};
use crate::models::membership::{Membership, MembershipStatus, Transition};
use crate::models::membership_request::{
    CreateRequestData, MembershipRequest, RequestListing, RequestStatus, RequestType,
};
use crate::models::notification::NewNotification;
use crate::models::plan::Plan;
use crate::models::user::Role;
use crate::services::memberships::{self, AssignMembership, LifecycleError};
use crate::services::notifier::{self, kind};

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub request_type: RequestType,
    pub reason: Option<String>,
    pub requested_plan_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    pub admin_note: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/requests", get(list_requests).post(create_request))
        .route("/api/requests/:id/approve", patch(approve_request))
        .route("/api/requests/:id/reject", patch(reject_request))
}

async fn create_request(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<CreateRequest>,
) -> Result<(StatusCode, Json<MembershipRequest>)> {
    let member_id = auth.own_member_id()?;

    if req.request_type == RequestType::PlanChange && req.requested_plan_id.is_none() {
        return Err(AppError::Validation(
            "requested_plan_id is required for a plan change".to_string(),
        ));
    }

    if let Some(plan_id) = req.requested_plan_id {
        Plan::find_by_id(&state.pool, plan_id)
            .await?
            .filter(|plan| plan.is_active)
            .ok_or_else(|| AppError::not_found("Plan"))?;
    }

    let request = MembershipRequest::create(
        &state.pool,
        CreateRequestData {
            member_id,
            request_type: req.request_type,
            reason: req.reason.filter(|r| !r.trim().is_empty()),
            requested_plan_id: req.requested_plan_id,
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!(
                "A pending {} request already exists",
                req.request_type
            ))
        } else {
            AppError::Database(e)
        }
    })?;

    tracing::info!(
        request_id = %request.id,
        member_id = %member_id,
        request_type = %request.request_type,
        "Membership request submitted"
    );

    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests(
    State(state): State<AppState>,
    auth: AuthUser,
    AppQuery(query): AppQuery<ListRequestsQuery>,
) -> Result<Json<Vec<RequestListing>>> {
    let member_id = match auth.role {
        Role::Admin => None,
        Role::Member => Some(auth.own_member_id()?),
        Role::Trainer => return Err(AppError::Forbidden),
    };

    let requests = MembershipRequest::list(&state.pool, member_id, query.status).await?;
    Ok(Json(requests))
}

/// Locks a request and checks it is still pending
async fn lock_pending(conn: &mut PgConnection, id: Uuid) -> Result<MembershipRequest> {
    let request = MembershipRequest::lock(conn, id)
        .await?
        .ok_or_else(|| AppError::not_found("Request"))?;

    if request.status != RequestStatus::Pending {
        return Err(AppError::Conflict(format!(
            "Request is already {}",
            request.status
        )));
    }

    Ok(request)
}

/// Carries out what an approved request asks for
async fn fulfil(
    conn: &mut PgConnection,
    request: &MembershipRequest,
    note: Option<&str>,
    actor: Uuid,
    today: NaiveDate,
) -> std::result::Result<Membership, LifecycleError> {
    let member_id = request.member_id;

    match request.request_type {
        RequestType::Pause => {
            memberships::apply_to_open(conn, member_id, Transition::Pause, note, actor, today).await
        }
        RequestType::Cancellation => {
            memberships::apply_to_open(conn, member_id, Transition::Cancel, note, actor, today)
                .await
        }
        RequestType::PlanChange => {
            let plan_id = request.requested_plan_id.ok_or(LifecycleError::PlanNotFound)?;
            memberships::change_plan(conn, member_id, plan_id, today, note, actor).await
        }
        RequestType::Activation => {
            let open = Membership::find_open_for_member(conn, member_id).await?;
            match (open, request.requested_plan_id) {
                (Some(open), _) if open.status == MembershipStatus::Paused => {
                    memberships::apply(conn, open.id, Transition::Resume, note, actor, today).await
                }
                (Some(_), _) => Err(LifecycleError::AlreadyOpen),
                (None, Some(plan_id)) => {
                    memberships::assign(
                        conn,
                        AssignMembership {
                            member_id,
                            plan_id,
                            start_date: today,
                            payment_id: None,
                            note: note.map(str::to_string),
                        },
                        actor,
                    )
                    .await
                }
                (None, None) => Err(LifecycleError::NoOpenMembership),
            }
        }
    }
}

async fn approve_request(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    body: Option<AppJson<ResolveRequest>>,
) -> Result<Json<MembershipRequest>> {
    auth.require(&[Role::Admin])?;
    let admin_note = body.and_then(|AppJson(req)| req.admin_note);

    let mut tx = state.pool.begin().await?;

    let request = lock_pending(&mut *tx, id).await?;
    let note = admin_note.as_deref().or(request.reason.as_deref());
    let membership = fulfil(
        &mut *tx,
        &request,
        note,
        auth.user_id,
        Utc::now().date_naive(),
    )
    .await?;
    let request = MembershipRequest::resolve(
        &mut *tx,
        id,
        RequestStatus::Approved,
        admin_note.as_deref(),
        auth.user_id,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        request_id = %request.id,
        membership_id = %membership.id,
        status = %membership.status,
        "Membership request approved"
    );

    notifier::notify_member_best_effort(
        &state.pool,
        request.member_id,
        NewNotification::new(
            kind::REQUEST,
            "Solicitud aprobada",
            format!(
                "Tu solicitud de {} fue aprobada. Estado de la membresía: {}.",
                describe(request.request_type),
                membership.status
            ),
        ),
    )
    .await;

    Ok(Json(request))
}

async fn reject_request(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    body: Option<AppJson<ResolveRequest>>,
) -> Result<Json<MembershipRequest>> {
    auth.require(&[Role::Admin])?;
    let admin_note = body.and_then(|AppJson(req)| req.admin_note);

    let mut tx = state.pool.begin().await?;
    lock_pending(&mut *tx, id).await?;
    let request = MembershipRequest::resolve(
        &mut *tx,
        id,
        RequestStatus::Rejected,
        admin_note.as_deref(),
        auth.user_id,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(request_id = %request.id, "Membership request rejected");

    let message = match admin_note.as_deref() {
        Some(note) => format!(
            "Tu solicitud de {} fue rechazada: {}",
            describe(request.request_type),
            note
        ),
        None => format!(
            "Tu solicitud de {} fue rechazada.",
            describe(request.request_type)
        ),
    };
    notifier::notify_member_best_effort(
        &state.pool,
        request.member_id,
        NewNotification::new(kind::REQUEST, "Solicitud rechazada", message),
    )
    .await;

    Ok(Json(request))
}

fn describe(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::Pause => "pausa",
        RequestType::Cancellation => "cancelación",
        RequestType::PlanChange => "cambio de plan",
        RequestType::Activation => "activación",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_parses_database_strings() {
        let req: CreateRequest =
            serde_json::from_str(r#"{"request_type": "Cancelacion", "reason": "Me mudo"}"#)
                .unwrap();
        assert_eq!(req.request_type, RequestType::Cancellation);
        assert!(req.requested_plan_id.is_none());
    }

    #[test]
    fn test_describe_is_human_readable() {
        assert_eq!(describe(RequestType::PlanChange), "cambio de plan");
        assert_eq!(describe(RequestType::Pause), "pausa");
    }
}
