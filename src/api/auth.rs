use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::api::extract::AppJson;
use crate::api::middleware::auth::AuthUser;
use crate::api::state::AppState;
use crate::api::{hash_password, validate_email};
use crate::error::{AppError, Result};
use crate::models::user::{CreateUserData, Role, User};
use crate::services::auth_token::issue_token;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
}

/// Checks credentials and issues a token.
///
/// Unknown email and wrong password both end in `Unauthorized`.
pub async fn authenticate(state: &AppState, email: &str, password: &str) -> Result<LoginResponse> {
    let user = User::find_active_by_email(&state.pool, email)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let hash = user.password_hash.clone();
    let password = password.to_string();
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .unwrap_or(false);

    if !valid {
        tracing::info!(user_id = %user.id, "Login rejected");
        return Err(AppError::Unauthorized);
    }

    let token = issue_token(
        &user,
        state.config.jwt_secret.expose_secret(),
        state.config.token_ttl_hours,
    )
    .map_err(|e| AppError::Internal(e.into()))?;

    tracing::info!(user_id = %user.id, role = %user.role, "User logged in");

    Ok(LoginResponse { token, user })
}

/// Creates the first administrator from config when no active admin exists
pub async fn ensure_bootstrap_admin(state: &AppState) -> Result<()> {
    let (Some(email), Some(password)) = (
        state.config.bootstrap_admin_email.as_deref(),
        state.config.bootstrap_admin_password.as_ref(),
    ) else {
        return Ok(());
    };

    if User::admin_exists(&state.pool).await? {
        return Ok(());
    }

    let email = validate_email(email)?;
    let password_hash = hash_password(password.expose_secret()).await?;

    let admin = User::create(
        &state.pool,
        CreateUserData {
            email,
            password_hash,
            full_name: "Administrador".to_string(),
            role: Role::Admin,
            member_id: None,
        },
    )
    .await?;

    tracing::info!(user_id = %admin.id, email = %admin.email, "Bootstrap administrator created");

    Ok(())
}

async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::Validation(
            "email and password are required".to_string(),
        ));
    }

    authenticate(&state, &req.email, &req.password).await.map(Json)
}

async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<User>> {
    let user = User::find_by_id(&state.pool, auth.user_id)
        .await?
        .filter(|user| user.is_active)
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(user))
}
