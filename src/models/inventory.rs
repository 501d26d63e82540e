use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

text_enum! {
    pub enum MovementType {
        Entry => "Entrada",
        Exit => "Salida",
        Adjustment => "Ajuste",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StockError {
    #[error("quantity must be greater than zero")]
    NonPositiveQuantity,

    #[error("adjusted stock cannot be negative")]
    NegativeAdjustment,

    #[error("insufficient stock: {available} available, {requested} requested")]
    Insufficient { available: i32, requested: i32 },

    #[error("stock would exceed the supported maximum")]
    Overflow,
}

impl MovementType {
    /// Validates a requested quantity for this movement type
    pub fn validate_quantity(&self, quantity: i32) -> Result<(), StockError> {
        match self {
            MovementType::Adjustment if quantity < 0 => Err(StockError::NegativeAdjustment),
            MovementType::Adjustment => Ok(()),
            _ if quantity <= 0 => Err(StockError::NonPositiveQuantity),
            _ => Ok(()),
        }
    }

    /// Computes the stock after applying a movement.
    ///
    /// Entrada adds, Salida subtracts and may not go below zero, Ajuste sets
    /// the stock to `quantity` directly.
    pub fn apply(&self, current: i32, quantity: i32) -> Result<i32, StockError> {
        self.validate_quantity(quantity)?;

        match self {
            MovementType::Entry => current.checked_add(quantity).ok_or(StockError::Overflow),
            MovementType::Exit if quantity > current => Err(StockError::Insufficient {
                available: current,
                requested: quantity,
            }),
            MovementType::Exit => Ok(current - quantity),
            MovementType::Adjustment => Ok(quantity),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub unit: String,
    pub stock: i32,
    pub min_stock: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryMovement {
    pub id: Uuid,
    pub item_id: Uuid,
    #[sqlx(try_from = "String")]
    pub movement_type: MovementType,
    pub quantity: i32,
    pub previous_stock: i32,
    pub new_stock: i32,
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateItemData {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub stock: i32,
    pub min_stock: i32,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateItemData {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub min_stock: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub category: Option<String>,
    pub low_stock: bool,
}

#[derive(Debug, Clone)]
pub struct RecordMovementData {
    pub item_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub note: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum MovementError {
    #[error("Inventory item not found")]
    ItemNotFound,

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl InventoryItem {
    pub async fn create(pool: &PgPool, data: CreateItemData) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO inventory_items (name, category, description, unit, stock, min_stock)
            VALUES ($1, $2, $3, COALESCE($4, 'unidad'), $5, $6)
            RETURNING *
            "#,
        )
        .bind(data.name)
        .bind(data.category)
        .bind(data.description)
        .bind(data.unit)
        .bind(data.stock)
        .bind(data.min_stock)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM inventory_items WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lists active items, optionally by category or only those at or below `min_stock`
    pub async fn list(pool: &PgPool, filter: &ItemFilter) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM inventory_items
            WHERE is_active = TRUE
              AND ($1::TEXT IS NULL OR category = $1)
              AND (NOT $2 OR stock <= min_stock)
            ORDER BY category, name
            "#,
        )
        .bind(filter.category.as_deref())
        .bind(filter.low_stock)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateItemData,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE inventory_items
            SET
                name = COALESCE($2, name),
                category = COALESCE($3, category),
                description = COALESCE($4, description),
                unit = COALESCE($5, unit),
                min_stock = COALESCE($6, min_stock),
                updated_at = NOW()
            WHERE id = $1 AND is_active = TRUE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.category)
        .bind(data.description)
        .bind(data.unit)
        .bind(data.min_stock)
        .fetch_optional(pool)
        .await
    }

    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_items
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1 AND is_active = TRUE
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_low_stock(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM inventory_items WHERE is_active = TRUE AND stock <= min_stock",
        )
        .fetch_one(pool)
        .await
    }

    /// Applies a stock movement atomically.
    ///
    /// The item row is locked for the duration of the transaction; the new stock
    /// and the movement record are written together or not at all.
    pub async fn record_movement(
        pool: &PgPool,
        data: RecordMovementData,
    ) -> Result<(Self, InventoryMovement), MovementError> {
        data.movement_type.validate_quantity(data.quantity)?;

        let mut tx = pool.begin().await?;

        let current: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT stock FROM inventory_items
            WHERE id = $1 AND is_active = TRUE
            FOR UPDATE
            "#,
        )
        .bind(data.item_id)
        .fetch_optional(&mut *tx)
        .await?;

        let previous_stock = current.ok_or(MovementError::ItemNotFound)?;
        // Returning early drops `tx`, which rolls back
        let new_stock = data.movement_type.apply(previous_stock, data.quantity)?;

        let item = sqlx::query_as::<_, Self>(
            r#"
            UPDATE inventory_items
            SET stock = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(data.item_id)
        .bind(new_stock)
        .fetch_one(&mut *tx)
        .await?;

        let movement = sqlx::query_as::<_, InventoryMovement>(
            r#"
            INSERT INTO inventory_movements
                (item_id, movement_type, quantity, previous_stock, new_stock, note, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(data.item_id)
        .bind(data.movement_type.as_str())
        .bind(data.quantity)
        .bind(previous_stock)
        .bind(new_stock)
        .bind(data.note)
        .bind(data.created_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((item, movement))
    }
}

impl InventoryMovement {
    pub async fn list_for_item(
        pool: &PgPool,
        item_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM inventory_movements
            WHERE item_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(item_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
