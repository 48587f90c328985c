//! Bearer-token checks for mutating endpoints.
//!
//! Tokens are HS256 JWTs issued by the external auth service. Only the
//! signature, expiry and a non-empty `sub` claim are checked.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::routes::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Malformed authorization header")]
    MalformedHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Token has no subject")]
    MissingSubject,
}

pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)?.claims;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(claims)
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MalformedHeader)
}

/// Caller identity. `subject` is `None` when auth is disabled.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub subject: Option<String>,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(validator) = &state.auth else {
            return Ok(Self { subject: None });
        };
        let claims = validator.validate(bearer_token(parts)?)?;
        Ok(Self {
            subject: Some(claims.sub),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, secret: &str, exp_offset: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as u64;
        encode(
            &Header::default(),
            &Claims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_subject() {
        let claims = JwtValidator::new(SECRET)
            .validate(&token("user-7", SECRET, 3600))
            .unwrap();
        assert_eq!(claims.sub, "user-7");
    }

    #[test]
    fn test_rejects_wrong_secret_and_expiry() {
        let validator = JwtValidator::new(SECRET);
        assert!(matches!(
            validator.validate(&token("user-7", "other", 3600)),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            validator.validate(&token("user-7", SECRET, -3600)),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_rejects_blank_subject() {
        assert!(matches!(
            JwtValidator::new(SECRET).validate(&token("  ", SECRET, 3600)),
            Err(AuthError::MissingSubject)
        ));
    }

    #[test]
    fn test_bearer_header_parsing() {
        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Bearer abc.def")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts).unwrap(), "abc.def");

        let (parts, _) = Request::builder()
            .header(AUTHORIZATION, "Basic Zm9v")
            .body(())
            .unwrap()
            .into_parts();
        assert!(matches!(bearer_token(&parts), Err(AuthError::MalformedHeader)));

        let (parts, _) = Request::builder().body(()).unwrap().into_parts();
        assert!(matches!(bearer_token(&parts), Err(AuthError::MissingToken)));
    }
}
