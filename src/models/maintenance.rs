use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::add_days;

text_enum! {
    pub enum MaintenanceType {
        Preventive => "Preventivo",
        Corrective => "Correctivo",
    }
}

text_enum! {
    pub enum MaintenanceStatus {
        Scheduled => "Programado",
        Completed => "Completado",
    }
}

/// Date of the next preventive visit, `None` if it falls outside the calendar
pub fn next_due(from: NaiveDate, frequency_days: i32) -> Option<NaiveDate> {
    add_days(from, i64::from(frequency_days))
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MaintenanceRecord {
    pub id: Uuid,
    pub item_id: Uuid,
    #[sqlx(try_from = "String")]
    pub maintenance_type: MaintenanceType,
    #[sqlx(try_from = "String")]
    pub status: MaintenanceStatus,
    pub description: String,
    pub scheduled_for: NaiveDate,
    pub completed_at: Option<DateTime<Utc>>,
    pub cost_cents: Option<i64>,
    pub frequency_days: Option<i32>,
    pub technician: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Record joined with the equipment name
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MaintenanceListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub record: MaintenanceRecord,
    pub item_name: String,
}

#[derive(Debug, Clone)]
pub struct ScheduleMaintenanceData {
    pub item_id: Uuid,
    pub maintenance_type: MaintenanceType,
    pub description: String,
    pub scheduled_for: NaiveDate,
    pub frequency_days: Option<i32>,
    pub technician: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMaintenanceData {
    pub description: Option<String>,
    pub scheduled_for: Option<NaiveDate>,
    pub cost_cents: Option<i64>,
    pub frequency_days: Option<i32>,
    pub technician: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MaintenanceFilter {
    pub item_id: Option<Uuid>,
    pub status: Option<MaintenanceStatus>,
    pub due_before: Option<NaiveDate>,
}

#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("Maintenance record not found")]
    NotFound,

    #[error("Maintenance record is already completed")]
    AlreadyCompleted,

    #[error("Next maintenance date is out of range")]
    DateOutOfRange,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Result of completing a record
#[derive(Debug, Clone, Serialize)]
pub struct CompletedMaintenance {
    pub completed: MaintenanceRecord,
    pub next: Option<MaintenanceRecord>,
}

impl MaintenanceRecord {
    pub async fn schedule(
        pool: &PgPool,
        data: ScheduleMaintenanceData,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO maintenance_records
                (item_id, maintenance_type, status, description, scheduled_for, frequency_days, technician)
            VALUES ($1, $2, 'Programado', $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(data.item_id)
        .bind(data.maintenance_type.as_str())
        .bind(data.description)
        .bind(data.scheduled_for)
        .bind(data.frequency_days)
        .bind(data.technician)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM maintenance_records WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(
        pool: &PgPool,
        filter: &MaintenanceFilter,
    ) -> Result<Vec<MaintenanceListing>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceListing>(
            r#"
            SELECT mr.*, i.name AS item_name
            FROM maintenance_records mr
            JOIN inventory_items i ON i.id = mr.item_id
            WHERE ($1::UUID IS NULL OR mr.item_id = $1)
              AND ($2::TEXT IS NULL OR mr.status = $2)
              AND ($3::DATE IS NULL OR mr.scheduled_for <= $3)
            ORDER BY mr.scheduled_for ASC
            "#,
        )
        .bind(filter.item_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.due_before)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateMaintenanceData,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE maintenance_records
            SET
                description = COALESCE($2, description),
                scheduled_for = COALESCE($3, scheduled_for),
                cost_cents = COALESCE($4, cost_cents),
                frequency_days = COALESCE($5, frequency_days),
                technician = COALESCE($6, technician),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.description)
        .bind(data.scheduled_for)
        .bind(data.cost_cents)
        .bind(data.frequency_days)
        .bind(data.technician)
        .fetch_optional(pool)
        .await
    }

    /// Marks a record completed and, for recurring maintenance, schedules the next visit
    pub async fn complete(
        pool: &PgPool,
        id: Uuid,
        cost_cents: Option<i64>,
        completed_on: NaiveDate,
    ) -> Result<CompletedMaintenance, MaintenanceError> {
        let mut tx = pool.begin().await?;

        let record = sqlx::query_as::<_, Self>(
            "SELECT * FROM maintenance_records WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(MaintenanceError::NotFound)?;

        if record.status == MaintenanceStatus::Completed {
            return Err(MaintenanceError::AlreadyCompleted);
        }

        let completed = sqlx::query_as::<_, Self>(
            r#"
            UPDATE maintenance_records
            SET status = 'Completado', completed_at = NOW(),
                cost_cents = COALESCE($2, cost_cents), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(cost_cents)
        .fetch_one(&mut *tx)
        .await?;

        let next = match completed.frequency_days {
            Some(frequency_days) => {
                let due = next_due(completed_on, frequency_days)
                    .ok_or(MaintenanceError::DateOutOfRange)?;
                let next = sqlx::query_as::<_, Self>(
                    r#"
                    INSERT INTO maintenance_records
                        (item_id, maintenance_type, status, description, scheduled_for, frequency_days, technician)
                    VALUES ($1, $2, 'Programado', $3, $4, $5, $6)
                    RETURNING *
                    "#,
                )
                .bind(completed.item_id)
                .bind(completed.maintenance_type.as_str())
                .bind(&completed.description)
                .bind(due)
                .bind(frequency_days)
                .bind(&completed.technician)
                .fetch_one(&mut *tx)
                .await?;
                Some(next)
            }
            None => None,
        };

        tx.commit().await?;

        Ok(CompletedMaintenance { completed, next })
    }

    /// Deletes a record that has not been carried out yet
    pub async fn delete_scheduled(pool: &PgPool, id: Uuid) -> Result<(), MaintenanceError> {
        let result = sqlx::query(
            "DELETE FROM maintenance_records WHERE id = $1 AND status = 'Programado'",
        )
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match Self::find_by_id(pool, id).await? {
            Some(_) => Err(MaintenanceError::AlreadyCompleted),
            None => Err(MaintenanceError::NotFound),
        }
    }

    pub async fn count_due_by(pool: &PgPool, date: NaiveDate) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM maintenance_records
            WHERE status = 'Programado' AND scheduled_for <= $1
            "#,
        )
        .bind(date)
        .fetch_one(pool)
        .await
    }
}
