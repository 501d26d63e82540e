use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, Method},
};
use chrono::Utc;
use cookie::Cookie;
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::api::state::AppState;
use crate::error::AppError;
use crate::models::user::{Role, User};
use crate::services::auth_token::verify_token;

/// Cookie used by the dashboard pages to carry the bearer token
pub const TOKEN_COOKIE: &str = "token";

/// Tokens older than this have their account re-checked before any write
const RECHECK_AFTER_SECS: i64 = 300;

/// The caller, decoded from a verified bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
    pub member_id: Option<Uuid>,
    pub name: String,
}

impl AuthUser {
    /// Fails with 403 unless the caller holds one of `roles`
    pub fn require(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            tracing::debug!(user_id = %self.user_id, role = %self.role, "Role not allowed");
            Err(AppError::Forbidden)
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The member record behind a member login
    pub fn own_member_id(&self) -> Result<Uuid, AppError> {
        match (self.role, self.member_id) {
            (Role::Member, Some(id)) => Ok(id),
            _ => Err(AppError::Forbidden),
        }
    }

    /// Admins and trainers see every member; members only themselves
    pub fn can_view_member(&self, member_id: Uuid) -> bool {
        match self.role {
            Role::Admin | Role::Trainer => true,
            Role::Member => self.member_id == Some(member_id),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| cookie_token(parts))
            .ok_or(AppError::Unauthorized)?;

        let claims = verify_token(&token, state.config.jwt_secret.expose_secret()).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            AppError::Unauthorized
        })?;

        if needs_account_check(&parts.method, claims.iat, Utc::now().timestamp())
            && !User::is_active(&state.pool, claims.sub).await?
        {
            tracing::info!(user_id = %claims.sub, "Write attempted with a deactivated account");
            return Err(AppError::Unauthorized);
        }

        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
            member_id: claims.member_id,
            name: claims.name,
        })
    }
}

/// Reads trust the token until it expires; writes from older tokens hit the users table
fn needs_account_check(method: &Method, issued_at: i64, now: i64) -> bool {
    !method.is_safe() && now - issued_at > RECHECK_AFTER_SECS
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();

    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == TOKEN_COOKIE)
        .map(|cookie| cookie.value_trimmed().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(name: header::HeaderName, value: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(name, value)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn user(role: Role, member_id: Option<Uuid>) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            role,
            member_id,
            name: "Test".to_string(),
        }
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(
            bearer_token(&parts(header::AUTHORIZATION, "Bearer abc.def")).as_deref(),
            Some("abc.def")
        );
        assert_eq!(bearer_token(&parts(header::AUTHORIZATION, "Basic abc")), None);
        assert_eq!(bearer_token(&parts(header::AUTHORIZATION, "Bearer ")), None);
    }

    #[test]
    fn test_cookie_token_parsing() {
        assert_eq!(
            cookie_token(&parts(header::COOKIE, "theme=dark; token=abc.def")).as_deref(),
            Some("abc.def")
        );
        assert_eq!(cookie_token(&parts(header::COOKIE, "tokens=x")), None);
        assert_eq!(cookie_token(&parts(header::COOKIE, "token=")), None);
    }

    #[test]
    fn test_quoted_cookie_value_is_unwrapped() {
        assert_eq!(
            cookie_token(&parts(header::COOKIE, "token=\"abc.def\"; theme=dark")).as_deref(),
            Some("abc.def")
        );
    }

    #[test]
    fn test_only_aged_writes_recheck_the_account() {
        let now = 1_700_000_000;
        let aged = now - RECHECK_AFTER_SECS - 1;

        assert!(needs_account_check(&Method::POST, aged, now));
        assert!(needs_account_check(&Method::PATCH, aged, now));
        assert!(needs_account_check(&Method::DELETE, aged, now));
        assert!(!needs_account_check(&Method::GET, aged, now));
        assert!(!needs_account_check(&Method::POST, now - 10, now));
    }

    #[test]
    fn test_require_role() {
        let trainer = user(Role::Trainer, None);
        assert!(trainer.require(&[Role::Admin, Role::Trainer]).is_ok());
        assert!(matches!(
            trainer.require(&[Role::Admin]),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn test_member_visibility() {
        let own = Uuid::new_v4();
        let member = user(Role::Member, Some(own));
        assert!(member.can_view_member(own));
        assert!(!member.can_view_member(Uuid::new_v4()));
        assert!(user(Role::Trainer, None).can_view_member(own));
        assert_eq!(member.own_member_id().unwrap(), own);
        assert!(user(Role::Admin, None).own_member_id().is_err());
    }
}
