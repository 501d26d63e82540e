use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

text_enum! {
    pub enum PaymentMethod {
        Cash => "Efectivo",
        Card => "Tarjeta",
        Transfer => "Transferencia",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub member_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub amount_cents: i64,
    #[sqlx(try_from = "String")]
    pub method: PaymentMethod,
    pub concept: Option<String>,
    pub receipt_key: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub paid_at: DateTime<Utc>,
}

/// Payment joined with the names printed on its receipt
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub payment: Payment,
    pub member_name: String,
    pub member_email: String,
    pub plan_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePaymentData {
    pub member_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub concept: Option<String>,
    pub recorded_by: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub member_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Payment {
    pub async fn create(pool: &PgPool, data: CreatePaymentData) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO payments (member_id, plan_id, amount_cents, method, concept, recorded_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(data.member_id)
        .bind(data.plan_id)
        .bind(data.amount_cents)
        .bind(data.method.as_str())
        .bind(data.concept)
        .bind(data.recorded_by)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Locks a payment row inside a transaction
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// True when some membership already references the payment
    pub async fn is_linked(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM memberships WHERE payment_id = $1)")
            .bind(id)
            .fetch_one(conn)
            .await
    }

    pub async fn find_detail(pool: &PgPool, id: Uuid) -> Result<Option<PaymentDetail>, sqlx::Error> {
        sqlx::query_as::<_, PaymentDetail>(
            r#"
            SELECT p.*,
                   m.first_name || ' ' || m.last_name AS member_name,
                   m.email AS member_email,
                   pl.name AS plan_name
            FROM payments p
            JOIN members m ON m.id = p.member_id
            LEFT JOIN plans pl ON pl.id = p.plan_id
            WHERE p.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(pool: &PgPool, filter: &PaymentFilter) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM payments
            WHERE ($1::UUID IS NULL OR member_id = $1)
              AND ($2::TIMESTAMPTZ IS NULL OR paid_at >= $2)
              AND ($3::TIMESTAMPTZ IS NULL OR paid_at < $3)
            ORDER BY paid_at DESC
            "#,
        )
        .bind(filter.member_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(pool)
        .await
    }

    pub async fn list_recent_for_member(
        pool: &PgPool,
        member_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM payments
            WHERE member_id = $1
            ORDER BY paid_at DESC
            LIMIT $2
            "#,
        )
        .bind(member_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn set_receipt_key(pool: &PgPool, id: Uuid, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE payments SET receipt_key = $2 WHERE id = $1")
            .bind(id)
            .bind(key)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Sum of payments with `from <= paid_at < to`
    pub async fn revenue_between(
        pool: &PgPool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0)::BIGINT
            FROM payments
            WHERE paid_at >= $1 AND paid_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await
    }
}

/// Formats cents as a decimal amount, e.g. `125050` -> `"1,250.50"`
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let units = (cents / 100).to_string();

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, ch) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}.{:02}", sign, grouped, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(45000), "450.00");
        assert_eq!(format_cents(125050), "1,250.50");
        assert_eq!(format_cents(123456789), "1,234,567.89");
        assert_eq!(format_cents(-1999), "-19.99");
    }

    #[test]
    fn test_payment_method_accepts_spanish_names() {
        let method: PaymentMethod = serde_json::from_str("\"Tarjeta\"").unwrap();
        assert_eq!(method, PaymentMethod::Card);
        assert!(serde_json::from_str::<PaymentMethod>("\"Bitcoin\"").is_err());
    }
}
