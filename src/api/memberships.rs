use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::membership::{
    days_remaining, Membership, MembershipFilter, MembershipHistoryEntry, MembershipStatus,
    MembershipSummary, Transition,
};
use crate::models::notification::NewNotification;
use crate::models::user::Role;
use crate::services::memberships::{self, AssignMembership};
use crate::services::notifier::{self, kind};

#[derive(Debug, Deserialize)]
pub struct AssignMembershipRequest {
    pub member_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: Option<NaiveDate>,
    pub payment_id: Option<Uuid>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListMembershipsQuery {
    pub member_id: Option<Uuid>,
    pub status: Option<MembershipStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransitionRequest {
    pub note: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CurrentMembership {
    #[serde(flatten)]
    pub summary: MembershipSummary,
    pub days_remaining: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/memberships", get(list_memberships).post(assign_membership))
        .route("/api/memberships/:id", get(show_membership))
        .route("/api/memberships/:id/pause", patch(pause_membership))
        .route("/api/memberships/:id/resume", patch(resume_membership))
        .route("/api/memberships/:id/cancel", patch(cancel_membership))
        .route("/api/memberships/:id/history", get(membership_history))
        .route(
            "/api/members/:id/memberships/current",
            get(current_membership),
        )
}

async fn assign_membership(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<AssignMembershipRequest>,
) -> Result<(StatusCode, Json<Membership>)> {
    auth.require(&[Role::Admin])?;

    let start_date = req.start_date.unwrap_or_else(|| Utc::now().date_naive());

    let mut tx = state.pool.begin().await?;
    let membership = memberships::assign(
        &mut *tx,
        AssignMembership {
            member_id: req.member_id,
            plan_id: req.plan_id,
            start_date,
            payment_id: req.payment_id,
            note: req.note,
        },
        auth.user_id,
    )
    .await?;
    tx.commit().await?;

    notifier::notify_member_best_effort(
        &state.pool,
        membership.member_id,
        NewNotification::new(
            kind::MEMBERSHIP,
            "Membresía activada",
            format!("Tu membresía está vigente hasta el {}.", membership.end_date),
        ),
    )
    .await;

    Ok((StatusCode::CREATED, Json(membership)))
}

async fn list_memberships(
    State(state): State<AppState>,
    auth: AuthUser,
    AppQuery(query): AppQuery<ListMembershipsQuery>,
) -> Result<Json<Vec<MembershipSummary>>> {
    auth.require(&[Role::Admin, Role::Trainer])?;

    let memberships = Membership::list(
        &state.pool,
        &MembershipFilter {
            member_id: query.member_id,
            status: query.status,
        },
    )
    .await?;

    Ok(Json(memberships))
}

async fn find_visible(state: &AppState, auth: &AuthUser, id: Uuid) -> Result<Membership> {
    let membership = Membership::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Membership"))?;

    if !auth.can_view_member(membership.member_id) {
        return Err(AppError::Forbidden);
    }

    Ok(membership)
}

async fn show_membership(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Membership>> {
    find_visible(&state, &auth, id).await.map(Json)
}

async fn current_membership(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(member_id): AppPath<Uuid>,
) -> Result<Json<CurrentMembership>> {
    if !auth.can_view_member(member_id) {
        return Err(AppError::Forbidden);
    }

    let summary = Membership::find_open_summary_for_member(&state.pool, member_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Member has no open membership".to_string()))?;

    let days_remaining = days_remaining(summary.membership.end_date, Utc::now().date_naive());

    Ok(Json(CurrentMembership {
        summary,
        days_remaining,
    }))
}

async fn membership_history(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<MembershipHistoryEntry>>> {
    if auth.role == Role::Trainer {
        return Err(AppError::Forbidden);
    }
    find_visible(&state, &auth, id).await?;

    let history = Membership::history(&state.pool, id).await?;
    Ok(Json(history))
}

async fn pause_membership(
    state: State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    body: Option<AppJson<TransitionRequest>>,
) -> Result<Json<Membership>> {
    run_transition(state, auth, id, Transition::Pause, body).await
}

async fn resume_membership(
    state: State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    body: Option<AppJson<TransitionRequest>>,
) -> Result<Json<Membership>> {
    run_transition(state, auth, id, Transition::Resume, body).await
}

async fn cancel_membership(
    state: State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    body: Option<AppJson<TransitionRequest>>,
) -> Result<Json<Membership>> {
    run_transition(state, auth, id, Transition::Cancel, body).await
}

async fn run_transition(
    State(state): State<AppState>,
    auth: AuthUser,
    id: Uuid,
    transition: Transition,
    body: Option<AppJson<TransitionRequest>>,
) -> Result<Json<Membership>> {
    auth.require(&[Role::Admin])?;

    let req = body.map(|AppJson(req)| req).unwrap_or_default();
    let note = req.reason.or(req.note);

    let mut tx = state.pool.begin().await?;
    let membership = memberships::apply(
        &mut *tx,
        id,
        transition,
        note.as_deref(),
        auth.user_id,
        Utc::now().date_naive(),
    )
    .await?;
    tx.commit().await?;

    notifier::notify_member_best_effort(
        &state.pool,
        membership.member_id,
        transition_notification(transition, &membership),
    )
    .await;

    Ok(Json(membership))
}

/// Message sent to the member after a pause, resume or cancel
pub(crate) fn transition_notification(
    transition: Transition,
    membership: &Membership,
) -> NewNotification {
    match transition {
        Transition::Pause => NewNotification::new(
            kind::MEMBERSHIP,
            "Membresía suspendida",
            "Tu membresía fue suspendida. Los días restantes se conservan.",
        ),
        Transition::Resume => NewNotification::new(
            kind::MEMBERSHIP,
            "Membresía reactivada",
            format!("Tu membresía está vigente hasta el {}.", membership.end_date),
        ),
        Transition::Cancel => NewNotification::new(
            kind::MEMBERSHIP,
            "Membresía cancelada",
            "Tu membresía fue cancelada.",
        ),
    }
}
