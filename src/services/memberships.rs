//! Membership lifecycle: assign, pause, resume, cancel.
//!
//! Every operation runs on a connection that is already inside a transaction.
//! The member row is locked first, so two transitions for the same member can
//! never both pass their checks; the partial unique index on Vigente
//! memberships backs this up at the storage level.

use chrono::NaiveDate;
use sqlx::{Connection, PgConnection};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::member::Member;
use crate::models::membership::{
    end_date_after_resume, end_date_for, InvalidTransition, Membership, MembershipStatus,
    NewMembership, Transition,
};
use crate::models::payment::Payment;
use crate::models::plan::Plan;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("Member not found")]
    MemberNotFound,

    #[error("Member is inactive")]
    MemberInactive,

    #[error("Plan not found")]
    PlanNotFound,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Payment belongs to another member")]
    PaymentMemberMismatch,

    #[error("Payment is already linked to a membership")]
    PaymentAlreadyLinked,

    #[error("Member already has an open membership")]
    AlreadyOpen,

    #[error("Membership not found")]
    MembershipNotFound,

    #[error("Member has no open membership")]
    NoOpenMembership,

    #[error("Membership end date is out of range")]
    DateOutOfRange,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<LifecycleError> for AppError {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::MemberNotFound
            | LifecycleError::PlanNotFound
            | LifecycleError::PaymentNotFound
            | LifecycleError::MembershipNotFound => AppError::NotFound(error.to_string()),
            LifecycleError::PaymentMemberMismatch | LifecycleError::DateOutOfRange => {
                AppError::Validation(error.to_string())
            }
            LifecycleError::MemberInactive
            | LifecycleError::PaymentAlreadyLinked
            | LifecycleError::AlreadyOpen
            | LifecycleError::NoOpenMembership
            | LifecycleError::InvalidTransition(_) => AppError::Conflict(error.to_string()),
            LifecycleError::Database(e) => AppError::Database(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignMembership {
    pub member_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: NaiveDate,
    pub payment_id: Option<Uuid>,
    pub note: Option<String>,
}

/// Creates a Vigente membership for a member who has none open
pub async fn assign(
    conn: &mut PgConnection,
    data: AssignMembership,
    actor: Uuid,
) -> Result<Membership, LifecycleError> {
    let member = Member::lock(conn, data.member_id)
        .await?
        .ok_or(LifecycleError::MemberNotFound)?;
    if !member.is_active {
        return Err(LifecycleError::MemberInactive);
    }

    let plan = Plan::find_by_id(&mut *conn, data.plan_id)
        .await?
        .filter(|plan| plan.is_active)
        .ok_or(LifecycleError::PlanNotFound)?;

    if let Some(payment_id) = data.payment_id {
        let payment = Payment::lock(conn, payment_id)
            .await?
            .ok_or(LifecycleError::PaymentNotFound)?;
        if payment.member_id != member.id {
            return Err(LifecycleError::PaymentMemberMismatch);
        }
        if Payment::is_linked(conn, payment_id).await? {
            return Err(LifecycleError::PaymentAlreadyLinked);
        }
    }

    if Membership::find_open_for_member(conn, member.id)
        .await?
        .is_some()
    {
        return Err(LifecycleError::AlreadyOpen);
    }

    let end_date =
        end_date_for(data.start_date, plan.duration_days).ok_or(LifecycleError::DateOutOfRange)?;

    let membership = Membership::insert(
        conn,
        NewMembership {
            member_id: member.id,
            plan_id: plan.id,
            payment_id: data.payment_id,
            start_date: data.start_date,
            end_date,
        },
    )
    .await?;

    record_history(conn, &membership, None, data.note.as_deref(), actor).await;

    tracing::info!(
        membership_id = %membership.id,
        member_id = %member.id,
        plan_id = %plan.id,
        end_date = %membership.end_date,
        "Membership assigned"
    );

    Ok(membership)
}

/// Applies a pause, resume or cancel to a membership
pub async fn apply(
    conn: &mut PgConnection,
    membership_id: Uuid,
    transition: Transition,
    note: Option<&str>,
    actor: Uuid,
    today: NaiveDate,
) -> Result<Membership, LifecycleError> {
    // Lock order is member, then membership, same as `assign`
    let member_id: Uuid = sqlx::query_scalar("SELECT member_id FROM memberships WHERE id = $1")
        .bind(membership_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LifecycleError::MembershipNotFound)?;

    Member::lock(conn, member_id)
        .await?
        .ok_or(LifecycleError::MemberNotFound)?;

    let current = Membership::lock(conn, membership_id)
        .await?
        .ok_or(LifecycleError::MembershipNotFound)?;

    transition.target(current.status)?;

    let updated = match transition {
        Transition::Pause => Membership::mark_paused(conn, current.id, today).await?,
        Transition::Resume => {
            let paused_at = current.paused_at.unwrap_or(today);
            let end_date = end_date_after_resume(current.end_date, paused_at, today)
                .ok_or(LifecycleError::DateOutOfRange)?;
            Membership::mark_resumed(conn, current.id, end_date).await?
        }
        Transition::Cancel => Membership::mark_cancelled(conn, current.id, note).await?,
    };

    record_history(conn, &updated, Some(current.status), note, actor).await;

    tracing::info!(
        membership_id = %updated.id,
        member_id = %updated.member_id,
        from = %current.status,
        to = %updated.status,
        "Membership transition applied"
    );

    Ok(updated)
}

/// Applies a transition to the member's open membership
pub async fn apply_to_open(
    conn: &mut PgConnection,
    member_id: Uuid,
    transition: Transition,
    note: Option<&str>,
    actor: Uuid,
    today: NaiveDate,
) -> Result<Membership, LifecycleError> {
    let open = Membership::find_open_for_member(conn, member_id)
        .await?
        .ok_or(LifecycleError::NoOpenMembership)?;

    apply(conn, open.id, transition, note, actor, today).await
}

/// Cancels the open membership (if any) and assigns a new plan from `start_date`
pub async fn change_plan(
    conn: &mut PgConnection,
    member_id: Uuid,
    plan_id: Uuid,
    start_date: NaiveDate,
    note: Option<&str>,
    actor: Uuid,
) -> Result<Membership, LifecycleError> {
    if let Some(open) = Membership::find_open_for_member(conn, member_id).await? {
        apply(conn, open.id, Transition::Cancel, note, actor, start_date).await?;
    }

    assign(
        conn,
        AssignMembership {
            member_id,
            plan_id,
            start_date,
            payment_id: None,
            note: note.map(str::to_string),
        },
        actor,
    )
    .await
}

/// Writes an audit row inside a savepoint; failures never abort the transition
async fn record_history(
    conn: &mut PgConnection,
    membership: &Membership,
    from: Option<MembershipStatus>,
    note: Option<&str>,
    actor: Uuid,
) {
    if let Err(e) = insert_history_savepoint(conn, membership, from, note, actor).await {
        tracing::warn!(
            membership_id = %membership.id,
            error = %e,
            "Failed to write membership history"
        );
    }
}

async fn insert_history_savepoint(
    conn: &mut PgConnection,
    membership: &Membership,
    from: Option<MembershipStatus>,
    note: Option<&str>,
    actor: Uuid,
) -> Result<(), sqlx::Error> {
    let mut savepoint = conn.begin().await?;
    Membership::insert_history(
        &mut *savepoint,
        membership.id,
        from,
        membership.status,
        note,
        actor,
    )
    .await?;
    savepoint.commit().await
}
