use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use bson::oid::ObjectId;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use parley_error::{AppError, AppResult};

/// Claims carried by every token. The `UserID` field name is part of the
/// wire contract shared with existing clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "UserID")]
    pub user_id: String,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

/// HS256 token issuing and verification, configured from a process-wide
/// signing secret injected at startup.
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl AuthManager {
    pub fn new(secret: &str, expiration_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl: Duration::hours(expiration_hours),
        }
    }

    /// Issue a token. Returns the encoded token and its expiry instant.
    pub fn generate_token(
        &self,
        user_id: &str,
        username: &str,
    ) -> AppResult<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + self.token_ttl;

        let claims = Claims {
            user_id: user_id.to_string(),
            username: username.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok((token, expires_at))
    }

    /// Verify signature and expiry; returns the claims on success.
    pub fn verify_token(&self, token: &str) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

/// Anything that can hand out the process's [`AuthManager`]. Implemented by
/// each service's context so the extractor below works everywhere.
pub trait AuthState {
    fn auth_manager(&self) -> &AuthManager;
}

/// The caller's identity, extracted and verified from the bearer token.
///
/// ```ignore
/// async fn handler(user: AuthenticatedUser, ...) -> AppResult<...> {
///     let caller = user.user_id;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: ObjectId,
    pub username: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: AuthState + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let claims = state.auth_manager().verify_token(token).map_err(|e| {
            tracing::warn!(error = %e, "token verification failed");
            AppError::auth("invalid or expired token")
        })?;

        let user_id = ObjectId::parse_str(&claims.user_id)
            .map_err(|_| AppError::auth("token carries a malformed user id"))?;

        Ok(AuthenticatedUser {
            user_id,
            username: claims.username,
        })
    }
}

/// Pull the raw token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::auth("missing Authorization header"))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::auth("invalid Authorization header format"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_verify_round_trip() {
        let manager = AuthManager::new("test-secret", 24);
        let id = ObjectId::new().to_hex();
        let (token, expires_at) = manager.generate_token(&id, "alice").unwrap();
        assert!(expires_at > Utc::now());

        let claims = manager.verify_token(&token).unwrap();
        assert_eq!(claims.user_id, id);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = AuthManager::new("secret-a", 24);
        let verifier = AuthManager::new("secret-b", 24);
        let (token, _) = issuer.generate_token("u1", "alice").unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let manager = AuthManager::new("test-secret", -1);
        let (token, _) = manager.generate_token("u1", "alice").unwrap();
        assert!(manager.verify_token(&token).is_err());
    }

    #[test]
    fn claims_use_wire_field_name() {
        let claims = Claims {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            exp: 0,
            iat: 0,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["UserID"], "u1");
    }

    #[test]
    fn bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, "Token abc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc");
    }
}
