use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::required;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::inventory::InventoryItem;
use crate::models::MAX_PERIOD_DAYS;
use crate::models::maintenance::{
    next_due, CompletedMaintenance, MaintenanceError, MaintenanceFilter, MaintenanceListing,
    MaintenanceRecord, MaintenanceStatus, MaintenanceType, ScheduleMaintenanceData,
    UpdateMaintenanceData,
};
use crate::models::user::Role;

#[derive(Debug, Deserialize)]
pub struct ListMaintenanceQuery {
    pub item_id: Option<Uuid>,
    pub status: Option<MaintenanceStatus>,
    pub due_before: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub item_id: Uuid,
    pub maintenance_type: MaintenanceType,
    pub description: String,
    pub scheduled_for: Option<NaiveDate>,
    pub frequency_days: Option<i32>,
    pub technician: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub description: Option<String>,
    pub scheduled_for: Option<NaiveDate>,
    pub cost_cents: Option<i64>,
    pub frequency_days: Option<i32>,
    pub technician: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    pub cost_cents: Option<i64>,
}

impl From<MaintenanceError> for AppError {
    fn from(error: MaintenanceError) -> Self {
        match error {
            MaintenanceError::NotFound => AppError::NotFound(error.to_string()),
            MaintenanceError::AlreadyCompleted => AppError::Conflict(error.to_string()),
            MaintenanceError::DateOutOfRange => AppError::Validation(error.to_string()),
            MaintenanceError::Database(e) => AppError::Database(e),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/maintenance", get(list_maintenance).post(schedule_maintenance))
        .route(
            "/api/maintenance/:id",
            get(show_maintenance)
                .put(update_maintenance)
                .delete(delete_maintenance),
        )
        .route("/api/maintenance/:id/complete", patch(complete_maintenance))
}

/// Resolves the visit date: explicit date wins, otherwise one frequency from today
fn resolve_scheduled_for(
    scheduled_for: Option<NaiveDate>,
    frequency_days: Option<i32>,
    today: NaiveDate,
) -> Result<NaiveDate> {
    match (scheduled_for, frequency_days) {
        (Some(date), _) => Ok(date),
        (None, Some(days)) => next_due(today, days).ok_or_else(|| {
            AppError::Validation("frequency_days puts the visit out of range".to_string())
        }),
        (None, None) => Err(AppError::Validation(
            "scheduled_for or frequency_days is required".to_string(),
        )),
    }
}

fn validate_frequency(frequency_days: Option<i32>) -> Result<()> {
    match frequency_days {
        Some(days) if !(1..=MAX_PERIOD_DAYS).contains(&days) => Err(AppError::Validation(
            format!("frequency_days must be between 1 and {}", MAX_PERIOD_DAYS),
        )),
        _ => Ok(()),
    }
}

fn validate_cost(cost_cents: Option<i64>) -> Result<()> {
    match cost_cents {
        Some(cost) if cost < 0 => Err(AppError::Validation(
            "cost_cents must not be negative".to_string(),
        )),
        _ => Ok(()),
    }
}

async fn list_maintenance(
    State(state): State<AppState>,
    auth: AuthUser,
    AppQuery(query): AppQuery<ListMaintenanceQuery>,
) -> Result<Json<Vec<MaintenanceListing>>> {
    auth.require(&[Role::Admin, Role::Trainer])?;

    let records = MaintenanceRecord::list(
        &state.pool,
        &MaintenanceFilter {
            item_id: query.item_id,
            status: query.status,
            due_before: query.due_before,
        },
    )
    .await?;

    Ok(Json(records))
}

async fn schedule_maintenance(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<ScheduleRequest>,
) -> Result<(StatusCode, Json<MaintenanceRecord>)> {
    auth.require(&[Role::Admin])?;

    let description = required("description", &req.description)?;
    validate_frequency(req.frequency_days)?;
    let scheduled_for = resolve_scheduled_for(
        req.scheduled_for,
        req.frequency_days,
        Utc::now().date_naive(),
    )?;

    InventoryItem::find_by_id(&state.pool, req.item_id)
        .await?
        .filter(|item| item.is_active)
        .ok_or_else(|| AppError::not_found("Inventory item"))?;

    let record = MaintenanceRecord::schedule(
        &state.pool,
        ScheduleMaintenanceData {
            item_id: req.item_id,
            maintenance_type: req.maintenance_type,
            description,
            scheduled_for,
            frequency_days: req.frequency_days,
            technician: req.technician,
        },
    )
    .await?;

    tracing::info!(
        maintenance_id = %record.id,
        item_id = %record.item_id,
        scheduled_for = %record.scheduled_for,
        "Maintenance scheduled"
    );

    Ok((StatusCode::CREATED, Json(record)))
}

async fn show_maintenance(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<MaintenanceRecord>> {
    auth.require(&[Role::Admin, Role::Trainer])?;

    let record = MaintenanceRecord::find_by_id(&state.pool, id)
        .await?
        .ok_or(MaintenanceError::NotFound)?;
    Ok(Json(record))
}

async fn update_maintenance(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<UpdateRequest>,
) -> Result<Json<MaintenanceRecord>> {
    auth.require(&[Role::Admin])?;

    let description = req
        .description
        .as_deref()
        .map(|d| required("description", d))
        .transpose()?;
    validate_frequency(req.frequency_days)?;
    validate_cost(req.cost_cents)?;

    let record = MaintenanceRecord::update(
        &state.pool,
        id,
        UpdateMaintenanceData {
            description,
            scheduled_for: req.scheduled_for,
            cost_cents: req.cost_cents,
            frequency_days: req.frequency_days,
            technician: req.technician,
        },
    )
    .await?
    .ok_or(MaintenanceError::NotFound)?;

    Ok(Json(record))
}

async fn complete_maintenance(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    body: Option<AppJson<CompleteRequest>>,
) -> Result<Json<CompletedMaintenance>> {
    auth.require(&[Role::Admin])?;

    let req = body.map(|AppJson(req)| req).unwrap_or_default();
    validate_cost(req.cost_cents)?;

    let result =
        MaintenanceRecord::complete(&state.pool, id, req.cost_cents, Utc::now().date_naive())
            .await?;

    tracing::info!(
        maintenance_id = %result.completed.id,
        next_id = ?result.next.as_ref().map(|next| next.id),
        "Maintenance completed"
    );

    Ok(Json(result))
}

async fn delete_maintenance(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode> {
    auth.require(&[Role::Admin])?;

    MaintenanceRecord::delete_scheduled(&state.pool, id).await?;

    tracing::info!(maintenance_id = %id, "Maintenance record deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_explicit_date_wins() {
        let today = date(2024, 5, 1);
        assert_eq!(
            resolve_scheduled_for(Some(date(2024, 6, 1)), Some(30), today).unwrap(),
            date(2024, 6, 1)
        );
    }

    #[test]
    fn test_frequency_schedules_from_today() {
        let today = date(2024, 5, 1);
        assert_eq!(
            resolve_scheduled_for(None, Some(30), today).unwrap(),
            date(2024, 5, 31)
        );
    }

    #[test]
    fn test_huge_frequency_is_rejected_not_panicking() {
        let today = date(2024, 5, 1);
        assert!(resolve_scheduled_for(None, Some(i32::MAX), today).is_err());
        assert!(validate_frequency(Some(i32::MAX)).is_err());
        assert!(validate_frequency(Some(MAX_PERIOD_DAYS + 1)).is_err());
        assert!(validate_frequency(Some(MAX_PERIOD_DAYS)).is_ok());
        assert_eq!(
            AppError::from(MaintenanceError::DateOutOfRange).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_missing_date_and_frequency_rejected() {
        assert!(resolve_scheduled_for(None, None, date(2024, 5, 1)).is_err());
    }

    #[test]
    fn test_already_completed_is_conflict() {
        assert_eq!(
            AppError::from(MaintenanceError::AlreadyCompleted).status(),
            StatusCode::CONFLICT
        );
        assert!(validate_frequency(Some(0)).is_err());
        assert!(validate_cost(Some(-5)).is_err());
    }
}
