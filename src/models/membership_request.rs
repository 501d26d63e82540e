use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

text_enum! {
    /// What a member is asking the front desk to do
    pub enum RequestType {
        Pause => "Pausa",
        Cancellation => "Cancelacion",
        PlanChange => "Cambio",
        Activation => "Activacion",
    }
}

text_enum! {
    pub enum RequestStatus {
        Pending => "Pendiente",
        Approved => "Aprobada",
        Rejected => "Rechazada",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MembershipRequest {
    pub id: Uuid,
    pub member_id: Uuid,
    #[sqlx(try_from = "String")]
    pub request_type: RequestType,
    #[sqlx(try_from = "String")]
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub requested_plan_id: Option<Uuid>,
    pub admin_note: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RequestListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: MembershipRequest,
    pub member_name: String,
}

#[derive(Debug, Clone)]
pub struct CreateRequestData {
    pub member_id: Uuid,
    pub request_type: RequestType,
    pub reason: Option<String>,
    pub requested_plan_id: Option<Uuid>,
}

impl MembershipRequest {
    pub async fn create(pool: &PgPool, data: CreateRequestData) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO membership_requests (member_id, request_type, status, reason, requested_plan_id)
            VALUES ($1, $2, 'Pendiente', $3, $4)
            RETURNING *
            "#,
        )
        .bind(data.member_id)
        .bind(data.request_type.as_str())
        .bind(data.reason)
        .bind(data.requested_plan_id)
        .fetch_one(pool)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        member_id: Option<Uuid>,
        status: Option<RequestStatus>,
    ) -> Result<Vec<RequestListing>, sqlx::Error> {
        sqlx::query_as::<_, RequestListing>(
            r#"
            SELECT r.*, m.first_name || ' ' || m.last_name AS member_name
            FROM membership_requests r
            JOIN members m ON m.id = r.member_id
            WHERE ($1::UUID IS NULL OR r.member_id = $1)
              AND ($2::TEXT IS NULL OR r.status = $2)
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(member_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await
    }

    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM membership_requests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn resolve(
        conn: &mut PgConnection,
        id: Uuid,
        status: RequestStatus,
        admin_note: Option<&str>,
        resolved_by: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE membership_requests
            SET status = $2, admin_note = $3, resolved_by = $4, resolved_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(admin_note)
        .bind(resolved_by)
        .fetch_one(conn)
        .await
    }

    pub async fn count_pending(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM membership_requests WHERE status = 'Pendiente'")
            .fetch_one(pool)
            .await
    }
}
