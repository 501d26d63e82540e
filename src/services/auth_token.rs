use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::{Role, User};

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error("Token encoding failed: {0}")]
    Encode(jsonwebtoken::errors::Error),

    #[error("Invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
}

/// JWT claims carried by every bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    pub role: Role,
    #[serde(default)]
    pub member_id: Option<Uuid>,
    pub name: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Issues an HS256 token for a user
pub fn issue_token(user: &User, secret: &str, ttl_hours: i64) -> Result<String, TokenError> {
    let now = Utc::now();

    let claims = Claims {
        sub: user.id,
        role: user.role,
        member_id: user.member_id,
        name: user.full_name.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(TokenError::Encode)
}

/// Verifies signature and expiry, returning the decoded claims
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(TokenError::Invalid)?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn user(role: Role, member_id: Option<Uuid>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            password_hash: String::new(),
            full_name: "Ana Pérez".to_string(),
            role,
            member_id,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let member_id = Uuid::new_v4();
        let user = user(Role::Member, Some(member_id));

        let token = issue_token(&user, SECRET, 12).unwrap();
        let claims = verify_token(&token, SECRET).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::Member);
        assert_eq!(claims.member_id, Some(member_id));
        assert_eq!(claims.name, "Ana Pérez");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let token = issue_token(&user(Role::Admin, None), SECRET, 12).unwrap();
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn test_expired_token_fails() {
        // Validation allows 60s of leeway, so expire well beyond it
        let token = issue_token(&user(Role::Trainer, None), SECRET, -2).unwrap();
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_garbage_token_fails() {
        assert!(verify_token("invalid.token.here", SECRET).is_err());
    }
}
