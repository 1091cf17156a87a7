//! Authentication utilities
//!
//! Provides:
//! - Confirmation codes bound to an identity's login state
//! - JWT access token generation and validation
//! - Caller extraction from the Authorization header

mod confirmation;

pub use confirmation::ConfirmationCodes;

use crate::access::{Caller, Principal};
use crate::db::{DbPool, Repository};
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const ACCESS_TOKEN_TYPE: &str = "access";

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Token ID
    pub jti: String,

    pub token_type: String,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: i64::try_from(expiration_secs).unwrap_or(i64::MAX / 2),
        }
    }

    /// Issue an access token for a user
    pub fn issue_access_token(&self, user_id: i32) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal {
                message: format!("Failed to generate token: {}", e),
            })
    }

    /// Validate a token and return the user ID it was issued for
    pub fn verify(&self, token: &str) -> Result<i32> {
        let claims = decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })?;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AppError::InvalidToken);
        }

        claims.sub.parse().map_err(|_| AppError::InvalidToken)
    }
}

/// Extract the token from a `Bearer` Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum extractor for the request's caller.
///
/// A missing header yields an anonymous caller. A header that is present
/// but unusable is rejected with 401 instead of silently downgrading.
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    Arc<JwtManager>: FromRef<S>,
    DbPool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Caller::Anonymous);
        };

        let header = header.to_str().map_err(|_| AppError::Unauthorized {
            message: "Malformed Authorization header".to_string(),
        })?;

        let token = extract_bearer(header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must use the Bearer scheme".to_string(),
        })?;

        let user_id = Arc::<JwtManager>::from_ref(state).verify(token)?;

        let repo = Repository::new(DbPool::from_ref(state));
        let user = repo
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized {
                message: "User no longer exists".to_string(),
            })?;

        Ok(Caller::User(Principal::from(&user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("abc.def"), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test_secret", 3600);

        let token = manager.issue_access_token(42).unwrap();
        assert_eq!(manager.verify(&token).unwrap(), 42);
    }

    #[test]
    fn test_tokens_are_distinct() {
        let manager = JwtManager::new("test_secret", 3600);
        let a = manager.issue_access_token(1).unwrap();
        let b = manager.issue_access_token(1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let issuer = JwtManager::new("secret_a", 3600);
        let verifier = JwtManager::new("secret_b", 3600);

        let token = issuer.issue_access_token(1).unwrap();
        assert!(matches!(verifier.verify(&token), Err(AppError::InvalidToken)));
        assert!(matches!(verifier.verify("garbage"), Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_expired_token() {
        let manager = JwtManager::new("test_secret", 3600);
        let past = Utc::now() - Duration::hours(2);
        let claims = JwtClaims {
            sub: "1".into(),
            exp: past.timestamp(),
            iat: (past - Duration::hours(1)).timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: ACCESS_TOKEN_TYPE.into(),
        };
        let token = encode(&Header::default(), &claims, &manager.encoding_key).unwrap();

        assert!(matches!(manager.verify(&token), Err(AppError::ExpiredToken)));
    }

    #[test]
    fn test_non_access_token_rejected() {
        let manager = JwtManager::new("test_secret", 3600);
        let claims = JwtClaims {
            sub: "1".into(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            iat: Utc::now().timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: "refresh".into(),
        };
        let token = encode(&Header::default(), &claims, &manager.encoding_key).unwrap();

        assert!(matches!(manager.verify(&token), Err(AppError::InvalidToken)));
    }
}
