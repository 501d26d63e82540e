use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::models::add_days;

text_enum! {
    pub enum MembershipStatus {
        Active => "Vigente",
        Paused => "Suspendida",
        Cancelled => "Cancelada",
    }
}

/// Status-changing operations on a membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Pause,
    Resume,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {operation} a membership in status {from}")]
pub struct InvalidTransition {
    pub operation: &'static str,
    pub from: MembershipStatus,
}

impl Transition {
    pub fn as_verb(&self) -> &'static str {
        match self {
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Cancel => "cancel",
        }
    }

    /// Returns the status a membership in `from` moves to, or the reason it can't
    pub fn target(&self, from: MembershipStatus) -> Result<MembershipStatus, InvalidTransition> {
        use MembershipStatus::*;

        match (self, from) {
            (Transition::Pause, Active) => Ok(Paused),
            (Transition::Resume, Paused) => Ok(Active),
            (Transition::Cancel, Active | Paused) => Ok(Cancelled),
            _ => Err(InvalidTransition {
                operation: self.as_verb(),
                from,
            }),
        }
    }
}

impl MembershipStatus {
    /// Vigente and Suspendida memberships still belong to the member
    pub fn is_open(&self) -> bool {
        !matches!(self, MembershipStatus::Cancelled)
    }
}

/// End date of a plan that starts on `start`, `None` if it falls outside the calendar
pub fn end_date_for(start: NaiveDate, duration_days: i32) -> Option<NaiveDate> {
    add_days(start, i64::from(duration_days))
}

/// New end date after resuming a pause that began on `paused_at`.
///
/// The paused days are added back; a resume on the same day adds nothing.
pub fn end_date_after_resume(
    end_date: NaiveDate,
    paused_at: NaiveDate,
    today: NaiveDate,
) -> Option<NaiveDate> {
    let paused_days = (today - paused_at).num_days().max(0);
    add_days(end_date, paused_days)
}

/// Days left until `end_date`, never negative
pub fn days_remaining(end_date: NaiveDate, today: NaiveDate) -> i64 {
    (end_date - today).num_days().max(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: Uuid,
    pub member_id: Uuid,
    pub plan_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: MembershipStatus,
    pub paused_at: Option<NaiveDate>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership joined with its plan name, as shown in listings
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MembershipSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub membership: Membership,
    pub plan_name: String,
    pub member_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MembershipHistoryEntry {
    pub id: Uuid,
    pub membership_id: Uuid,
    pub from_status: Option<String>,
    pub to_status: String,
    pub note: Option<String>,
    pub changed_by: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMembership {
    pub member_id: Uuid,
    pub plan_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct MembershipFilter {
    pub member_id: Option<Uuid>,
    pub status: Option<MembershipStatus>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatusCount {
    pub status: String,
    pub total: i64,
}

const SUMMARY_SELECT: &str = r#"
    SELECT ms.*,
           p.name AS plan_name,
           m.first_name || ' ' || m.last_name AS member_name
    FROM memberships ms
    JOIN plans p ON p.id = ms.plan_id
    JOIN members m ON m.id = ms.member_id
"#;

impl Membership {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM memberships WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Locks a membership row inside a transaction
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM memberships WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// The member's Vigente or Suspendida membership, if any
    pub async fn find_open_for_member(
        conn: &mut PgConnection,
        member_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM memberships
            WHERE member_id = $1 AND status IN ('Vigente', 'Suspendida')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(member_id)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_open_summary_for_member(
        pool: &PgPool,
        member_id: Uuid,
    ) -> Result<Option<MembershipSummary>, sqlx::Error> {
        let query = format!(
            "{} WHERE ms.member_id = $1 AND ms.status IN ('Vigente', 'Suspendida') ORDER BY ms.created_at DESC LIMIT 1",
            SUMMARY_SELECT
        );

        sqlx::query_as::<_, MembershipSummary>(&query)
            .bind(member_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn insert(conn: &mut PgConnection, data: NewMembership) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO memberships (member_id, plan_id, payment_id, start_date, end_date, status)
            VALUES ($1, $2, $3, $4, $5, 'Vigente')
            RETURNING *
            "#,
        )
        .bind(data.member_id)
        .bind(data.plan_id)
        .bind(data.payment_id)
        .bind(data.start_date)
        .bind(data.end_date)
        .fetch_one(conn)
        .await
    }

    pub async fn mark_paused(
        conn: &mut PgConnection,
        id: Uuid,
        paused_at: NaiveDate,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE memberships
            SET status = 'Suspendida', paused_at = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(paused_at)
        .fetch_one(conn)
        .await
    }

    pub async fn mark_resumed(
        conn: &mut PgConnection,
        id: Uuid,
        end_date: NaiveDate,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE memberships
            SET status = 'Vigente', paused_at = NULL, end_date = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(end_date)
        .fetch_one(conn)
        .await
    }

    pub async fn mark_cancelled(
        conn: &mut PgConnection,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE memberships
            SET status = 'Cancelada', cancelled_at = NOW(), cancel_reason = $2,
                paused_at = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_one(conn)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        filter: &MembershipFilter,
    ) -> Result<Vec<MembershipSummary>, sqlx::Error> {
        let query = format!(
            r#"{}
            WHERE ($1::UUID IS NULL OR ms.member_id = $1)
              AND ($2::TEXT IS NULL OR ms.status = $2)
            ORDER BY ms.created_at DESC"#,
            SUMMARY_SELECT
        );

        sqlx::query_as::<_, MembershipSummary>(&query)
            .bind(filter.member_id)
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(pool)
            .await
    }

    pub async fn history(
        pool: &PgPool,
        membership_id: Uuid,
    ) -> Result<Vec<MembershipHistoryEntry>, sqlx::Error> {
        sqlx::query_as::<_, MembershipHistoryEntry>(
            r#"
            SELECT * FROM membership_history
            WHERE membership_id = $1
            ORDER BY changed_at ASC
            "#,
        )
        .bind(membership_id)
        .fetch_all(pool)
        .await
    }

    pub async fn insert_history(
        conn: &mut PgConnection,
        membership_id: Uuid,
        from_status: Option<MembershipStatus>,
        to_status: MembershipStatus,
        note: Option<&str>,
        changed_by: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO membership_history (membership_id, from_status, to_status, note, changed_by)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(membership_id)
        .bind(from_status.map(|s| s.as_str()))
        .bind(to_status.as_str())
        .bind(note)
        .bind(changed_by)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn count_by_status(pool: &PgPool) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT status, COUNT(*) AS total
            FROM memberships
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(pool)
        .await
    }
}
