use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

text_enum! {
    pub enum ReservationStatus {
        Reserved => "Reservada",
        Cancelled => "Cancelada",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GymClass {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trainer_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub capacity: i32,
    pub room: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Class with trainer name and current occupancy
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ClassListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub class: GymClass,
    pub trainer_name: String,
    pub reserved: i64,
}

impl ClassListing {
    pub fn spots_left(&self) -> i64 {
        (i64::from(self.class.capacity) - self.reserved).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassReservation {
    pub id: Uuid,
    pub class_id: Uuid,
    pub member_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Reservation with the member's name, for the trainer's roster
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RosterEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub reservation: ClassReservation,
    pub member_name: String,
}

/// Reservation with its class details, for the member's agenda
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AgendaEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub reservation: ClassReservation,
    pub class_name: String,
    pub starts_at: DateTime<Utc>,
    pub room: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateClassData {
    pub name: String,
    pub description: Option<String>,
    pub trainer_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub capacity: i32,
    pub room: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateClassData {
    pub name: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub capacity: Option<i32>,
    pub room: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub trainer_id: Option<Uuid>,
}

const LISTING_SELECT: &str = r#"
    SELECT c.*,
           u.full_name AS trainer_name,
           (SELECT COUNT(*) FROM class_reservations r
            WHERE r.class_id = c.id AND r.status = 'Reservada') AS reserved
    FROM gym_classes c
    JOIN users u ON u.id = c.trainer_id
"#;

impl GymClass {
    pub async fn create(pool: &PgPool, data: CreateClassData) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO gym_classes
                (name, description, trainer_id, starts_at, duration_minutes, capacity, room)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(data.name)
        .bind(data.description)
        .bind(data.trainer_id)
        .bind(data.starts_at)
        .bind(data.duration_minutes)
        .bind(data.capacity)
        .bind(data.room)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM gym_classes WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Locks an active class row inside a transaction
    pub async fn lock_active(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM gym_classes WHERE id = $1 AND is_active = TRUE FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    pub async fn list(pool: &PgPool, filter: &ClassFilter) -> Result<Vec<ClassListing>, sqlx::Error> {
        let query = format!(
            r#"{}
            WHERE c.is_active = TRUE
              AND ($1::TIMESTAMPTZ IS NULL OR c.starts_at >= $1)
              AND ($2::TIMESTAMPTZ IS NULL OR c.starts_at < $2)
              AND ($3::UUID IS NULL OR c.trainer_id = $3)
            ORDER BY c.starts_at ASC"#,
            LISTING_SELECT
        );

        sqlx::query_as::<_, ClassListing>(&query)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.trainer_id)
            .fetch_all(pool)
            .await
    }

    pub async fn update<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        data: UpdateClassData,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE gym_classes
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                starts_at = COALESCE($4, starts_at),
                duration_minutes = COALESCE($5, duration_minutes),
                capacity = COALESCE($6, capacity),
                room = COALESCE($7, room)
            WHERE id = $1 AND is_active = TRUE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.description)
        .bind(data.starts_at)
        .bind(data.duration_minutes)
        .bind(data.capacity)
        .bind(data.room)
        .fetch_optional(executor)
        .await
    }

    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE gym_classes SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl ClassReservation {
    pub async fn count_active(conn: &mut PgConnection, class_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM class_reservations WHERE class_id = $1 AND status = 'Reservada'",
        )
        .bind(class_id)
        .fetch_one(conn)
        .await
    }

    pub async fn exists_active(
        conn: &mut PgConnection,
        class_id: Uuid,
        member_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM class_reservations
                WHERE class_id = $1 AND member_id = $2 AND status = 'Reservada'
            )
            "#,
        )
        .bind(class_id)
        .bind(member_id)
        .fetch_one(conn)
        .await
    }

    pub async fn insert(
        conn: &mut PgConnection,
        class_id: Uuid,
        member_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO class_reservations (class_id, member_id, status)
            VALUES ($1, $2, 'Reservada')
            RETURNING *
            "#,
        )
        .bind(class_id)
        .bind(member_id)
        .fetch_one(conn)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM class_reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Cancels an active reservation. Returns None if it was not active.
    pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE class_reservations
            SET status = 'Cancelada', cancelled_at = NOW()
            WHERE id = $1 AND status = 'Reservada'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn roster(pool: &PgPool, class_id: Uuid) -> Result<Vec<RosterEntry>, sqlx::Error> {
        sqlx::query_as::<_, RosterEntry>(
            r#"
            SELECT r.*, m.first_name || ' ' || m.last_name AS member_name
            FROM class_reservations r
            JOIN members m ON m.id = r.member_id
            WHERE r.class_id = $1
            ORDER BY r.created_at ASC
            "#,
        )
        .bind(class_id)
        .fetch_all(pool)
        .await
    }

    /// Upcoming active reservations of a member
    pub async fn agenda(pool: &PgPool, member_id: Uuid) -> Result<Vec<AgendaEntry>, sqlx::Error> {
        sqlx::query_as::<_, AgendaEntry>(
            r#"
            SELECT r.*, c.name AS class_name, c.starts_at, c.room
            FROM class_reservations r
            JOIN gym_classes c ON c.id = r.class_id
            WHERE r.member_id = $1
              AND r.status = 'Reservada'
              AND c.is_active = TRUE
              AND c.starts_at >= NOW()
            ORDER BY c.starts_at ASC
            "#,
        )
        .bind(member_id)
        .fetch_all(pool)
        .await
    }
}
