use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

text_enum! {
    /// Dashboard role carried in the bearer token
    pub enum Role {
        Admin => "admin",
        Trainer => "trainer",
        Member => "member",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub member_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUserData {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub member_id: Option<Uuid>,
}

impl User {
    /// Creates a new login
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        data: CreateUserData,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO users (email, password_hash, full_name, role, member_id)
            VALUES (LOWER($1), $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&data.email)
        .bind(&data.password_hash)
        .bind(&data.full_name)
        .bind(data.role.as_str())
        .bind(data.member_id)
        .fetch_one(executor)
        .await
    }

    /// Finds an active login by email (case-insensitive)
    pub async fn find_active_by_email(
        pool: &PgPool,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM users WHERE email = LOWER($1) AND is_active = TRUE
            "#,
        )
        .bind(email.trim())
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// False for disabled logins and for ids that no longer exist
    pub async fn is_active(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COALESCE((SELECT is_active FROM users WHERE id = $1), FALSE)",
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn admin_exists(pool: &PgPool) -> Result<bool, sqlx::Error> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM users WHERE role = 'admin' AND is_active = TRUE)
            "#,
        )
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Keeps the login address of a member in step with the member record
    pub async fn update_email_for_member<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
        email: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET email = LOWER($2) WHERE member_id = $1")
            .bind(member_id)
            .bind(email)
            .execute(executor)
            .await?;

        Ok(())
    }

    /// Disables the login attached to a member
    pub async fn deactivate_for_member<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET is_active = FALSE WHERE member_id = $1")
            .bind(member_id)
            .execute(executor)
            .await?;

        Ok(())
    }
}
