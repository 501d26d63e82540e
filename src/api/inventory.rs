use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::extract::{AppJson, AppPath, AppQuery};
use crate::api::middleware::auth::AuthUser;
use crate::api::required;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::inventory::{
    CreateItemData, InventoryItem, InventoryMovement, ItemFilter, MovementError, MovementType,
    RecordMovementData, UpdateItemData,
};
use crate::models::user::Role;

const MOVEMENT_HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub category: Option<String>,
    #[serde(default)]
    pub low_stock: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub min_stock: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub min_stock: Option<i32>,
}

/// Body of a stock movement; Spanish field names are accepted too
#[derive(Debug, Deserialize)]
pub struct MovementRequest {
    #[serde(alias = "tipo")]
    pub movement_type: String,
    #[serde(alias = "cantidad")]
    pub quantity: i32,
    #[serde(alias = "nota")]
    pub note: Option<String>,
}

impl MovementRequest {
    /// Checks type and quantity without touching the database
    pub fn validate(&self) -> Result<MovementType> {
        let movement_type: MovementType = self.movement_type.trim().parse().map_err(|_| {
            AppError::Validation(format!(
                "movement_type must be one of: {}",
                MovementType::ALL
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        movement_type
            .validate_quantity(self.quantity)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        Ok(movement_type)
    }
}

#[derive(Debug, Serialize)]
pub struct MovementResponse {
    pub item: InventoryItem,
    pub movement: InventoryMovement,
}

impl From<MovementError> for AppError {
    fn from(error: MovementError) -> Self {
        match error {
            MovementError::ItemNotFound => AppError::not_found("Inventory item"),
            MovementError::Stock(e) => AppError::Validation(e.to_string()),
            MovementError::Database(e) => AppError::Database(e),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/inventory", get(list_items).post(create_item))
        .route(
            "/api/inventory/:id",
            get(show_item).put(update_item).delete(delete_item),
        )
        .route(
            "/api/inventory/:id/movements",
            get(list_movements).post(record_movement),
        )
}

fn non_negative(field: &str, value: i32) -> Result<()> {
    if value < 0 {
        return Err(AppError::Validation(format!("{} must not be negative", field)));
    }
    Ok(())
}

async fn list_items(
    State(state): State<AppState>,
    auth: AuthUser,
    AppQuery(query): AppQuery<ListItemsQuery>,
) -> Result<Json<Vec<InventoryItem>>> {
    auth.require(&[Role::Admin, Role::Trainer])?;

    let items = InventoryItem::list(
        &state.pool,
        &ItemFilter {
            category: query.category.filter(|c| !c.trim().is_empty()),
            low_stock: query.low_stock,
        },
    )
    .await?;

    Ok(Json(items))
}

async fn create_item(
    State(state): State<AppState>,
    auth: AuthUser,
    AppJson(req): AppJson<CreateItemRequest>,
) -> Result<(StatusCode, Json<InventoryItem>)> {
    auth.require(&[Role::Admin])?;

    let name = required("name", &req.name)?;
    let category = required("category", &req.category)?;
    non_negative("stock", req.stock)?;
    non_negative("min_stock", req.min_stock)?;

    let item = InventoryItem::create(
        &state.pool,
        CreateItemData {
            name,
            category,
            description: req.description,
            unit: req.unit.filter(|u| !u.trim().is_empty()),
            stock: req.stock,
            min_stock: req.min_stock,
        },
    )
    .await?;

    tracing::info!(item_id = %item.id, name = %item.name, stock = item.stock, "Inventory item created");

    Ok((StatusCode::CREATED, Json(item)))
}

async fn find_active(state: &AppState, id: Uuid) -> Result<InventoryItem> {
    InventoryItem::find_by_id(&state.pool, id)
        .await?
        .filter(|item| item.is_active)
        .ok_or_else(|| AppError::not_found("Inventory item"))
}

async fn show_item(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<InventoryItem>> {
    auth.require(&[Role::Admin, Role::Trainer])?;
    find_active(&state, id).await.map(Json)
}

async fn update_item(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<UpdateItemRequest>,
) -> Result<Json<InventoryItem>> {
    auth.require(&[Role::Admin])?;

    let name = req.name.as_deref().map(|n| required("name", n)).transpose()?;
    let category = req
        .category
        .as_deref()
        .map(|c| required("category", c))
        .transpose()?;
    if let Some(min_stock) = req.min_stock {
        non_negative("min_stock", min_stock)?;
    }

    // Stock only changes through movements
    let item = InventoryItem::update(
        &state.pool,
        id,
        UpdateItemData {
            name,
            category,
            description: req.description,
            unit: req.unit,
            min_stock: req.min_stock,
        },
    )
    .await?
    .ok_or_else(|| AppError::not_found("Inventory item"))?;

    Ok(Json(item))
}

async fn delete_item(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode> {
    auth.require(&[Role::Admin])?;

    if !InventoryItem::deactivate(&state.pool, id).await? {
        return Err(AppError::not_found("Inventory item"));
    }

    tracing::info!(item_id = %id, "Inventory item deactivated");

    Ok(StatusCode::NO_CONTENT)
}

async fn record_movement(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<MovementRequest>,
) -> Result<(StatusCode, Json<MovementResponse>)> {
    auth.require(&[Role::Admin])?;

    let movement_type = req.validate()?;

    let (item, movement) = InventoryItem::record_movement(
        &state.pool,
        RecordMovementData {
            item_id: id,
            movement_type,
            quantity: req.quantity,
            note: req.note.filter(|n| !n.trim().is_empty()),
            created_by: auth.user_id,
        },
    )
    .await?;

    if item.is_low_stock() {
        tracing::warn!(item_id = %item.id, stock = item.stock, min_stock = item.min_stock, "Item at or below minimum stock");
    }

    Ok((StatusCode::CREATED, Json(MovementResponse { item, movement })))
}

async fn list_movements(
    State(state): State<AppState>,
    auth: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<InventoryMovement>>> {
    auth.require(&[Role::Admin])?;

    InventoryItem::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Inventory item"))?;

    let movements =
        InventoryMovement::list_for_item(&state.pool, id, MOVEMENT_HISTORY_LIMIT).await?;
    Ok(Json(movements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn body(json: &str) -> MovementRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_spanish_aliases_accepted() {
        let req = body(r#"{"tipo": "Salida", "cantidad": 3, "nota": "clase de spinning"}"#);
        assert_eq!(req.validate().unwrap(), MovementType::Exit);
        assert_eq!(req.quantity, 3);
        assert_eq!(req.note.as_deref(), Some("clase de spinning"));
    }

    #[test]
    fn test_unknown_movement_type_is_validation_error() {
        let err = body(r#"{"movement_type": "Robo", "quantity": 1}"#)
            .validate()
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("Entrada, Salida, Ajuste"));
    }

    #[test]
    fn test_quantity_rules_per_type() {
        assert!(body(r#"{"movement_type": "Entrada", "quantity": 0}"#)
            .validate()
            .is_err());
        assert!(body(r#"{"movement_type": "Salida", "quantity": -2}"#)
            .validate()
            .is_err());
        assert!(body(r#"{"movement_type": "Ajuste", "quantity": 0}"#)
            .validate()
            .is_ok());
        assert!(body(r#"{"movement_type": "Ajuste", "quantity": -1}"#)
            .validate()
            .is_err());
    }

    #[test]
    fn test_insufficient_stock_maps_to_bad_request() {
        let err = AppError::from(MovementError::Stock(
            MovementType::Exit.apply(2, 5).unwrap_err(),
        ));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_string(),
            "insufficient stock: 2 available, 5 requested"
        );
    }
}
