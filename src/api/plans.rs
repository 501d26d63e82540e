use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::required;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::plan::{CreatePlanData, Plan, UpdatePlanData};
use crate::models::user::Role;
use crate::models::MAX_PERIOD_DAYS;

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/plans", get(list_plans).post(create_plan))
        .route(
            "/api/plans/:id",
            get(show_plan).put(update_plan).delete(delete_plan),
        )
}

fn validate_price(price_cents: i64) -> Result<()> {
    if price_cents < 0 {
        return Err(AppError::Validation(
            "price_cents must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_duration(duration_days: i32) -> Result<()> {
    if !(1..=MAX_PERIOD_DAYS).contains(&duration_days) {
        return Err(AppError::Validation(format!(
            "duration_days must be between 1 and {}",
            MAX_PERIOD_DAYS
        )));
    }
    Ok(())
}

async fn list_plans(
    State(state): State<AppState>,
    auth: AuthUser,
    AppQuery(query): AppQuery<ListPlansQuery>,
) -> Result<Json<Vec<Plan>>> {
    // Retired plans are an admin concern
    let include_inactive = query.include_inactive && auth.is_admin();
    let plans = Plan::list(&state.pool, include_inactive).await?;
    Ok(Json(plans))
}

async fn create_plan(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(mut data): AppJson<CreatePlanData>,
) -> Result<(StatusCode, Json<Plan>)> {
    auth.require(&[Role::Admin])?;

    data.name = required("name", &data.name)?;
    validate_price(data.price_cents)?;
    validate_duration(data.duration_days)?;

    let plan = Plan::create(&state.pool, data).await?;

    tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan created");

    Ok((StatusCode::CREATED, Json(plan)))
}

async fn show_plan(
    State(state): State<AppState>,
    _auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Plan>> {
    let plan = Plan::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Plan"))?;
    Ok(Json(plan))
}

async fn update_plan(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(mut data): AppJson<UpdatePlanData>,
) -> Result<Json<Plan>> {
    auth.require(&[Role::Admin])?;

    if let Some(name) = data.name.as_deref() {
        data.name = Some(required("name", name)?);
    }
    if let Some(price_cents) = data.price_cents {
        validate_price(price_cents)?;
    }
    if let Some(duration_days) = data.duration_days {
        validate_duration(duration_days)?;
    }

    let plan = Plan::update(&state.pool, id, data)
        .await?
        .ok_or_else(|| AppError::not_found("Plan"))?;

    tracing::info!(plan_id = %plan.id, "Plan updated");

    Ok(Json(plan))
}

async fn delete_plan(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode> {
    auth.require(&[Role::Admin])?;

    if !Plan::deactivate(&state.pool, id).await? {
        return Err(AppError::not_found("Plan"));
    }

    tracing::info!(plan_id = %id, "Plan deactivated");

    Ok(StatusCode::NO_CONTENT)
}
