//! Bearer-token authentication.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use palaver_store::{Database, User};
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// The user behind the request's `Authorization: Bearer <api_token>` header.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ServerError::Unauthorized)?;
        let db = state.db.lock().await;
        authenticate(&db, token).map(AuthUser)
    }
}

pub fn authenticate(db: &Database, token: &str) -> Result<User, ServerError> {
    if token.is_empty() {
        return Err(ServerError::Unauthorized);
    }
    db.get_user_by_token(token)?.ok_or(ServerError::Unauthorized)
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// 32 random bytes, hex encoded.
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("").as_bytes();
    let expected = expected.as_bytes();
    if token.len() != expected.len() || token.ct_eq(expected).unwrap_u8() != 1 {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_generated_tokens() {
        let a = generate_api_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, generate_api_token());
    }

    #[test]
    fn test_admin_token() {
        let mut config = ServerConfig::default();
        assert!(verify_admin_token(&headers("Bearer x"), &config).is_err());

        config.admin_token = Some("secret".into());
        assert!(verify_admin_token(&headers("Bearer secret"), &config).is_ok());
        assert!(verify_admin_token(&headers("Bearer secreT"), &config).is_err());
        assert!(verify_admin_token(&HeaderMap::new(), &config).is_err());
    }
}
