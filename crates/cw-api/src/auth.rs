//! Bearer authentication.
//!
//! Validates JWTs against the identity collaborator's JWKS and derives the
//! applicant's owner identity. The core never issues tokens; it only
//! validates them and enforces ownership on every operation.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cw_domain::OwnerId;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Identity provider configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Issuer URL (e.g., "https://auth.example.gov")
    pub issuer: String,
    /// Expected audience
    pub audience: String,
    /// JWKS endpoint (defaults to {issuer}/.well-known/jwks.json)
    pub jwks_uri: Option<String>,
    /// Whether to skip validation (for testing only)
    pub skip_validation: bool,
}

impl AuthConfig {
    pub fn local_dev() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            audience: "casework".to_string(),
            jwks_uri: None,
            skip_validation: false,
        }
    }

    /// Validation disabled; the raw bearer token becomes the owner id.
    pub fn test_mode() -> Self {
        Self {
            issuer: "test-issuer".to_string(),
            audience: "test-audience".to_string(),
            jwks_uri: None,
            skip_validation: true,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::local_dev();
        Self {
            issuer: std::env::var("AUTH_ISSUER").unwrap_or(defaults.issuer),
            audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.audience),
            jwks_uri: std::env::var("AUTH_JWKS_URI").ok(),
            skip_validation: std::env::var("AUTH_SKIP_VALIDATION")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }

    pub fn jwks_uri(&self) -> String {
        self.jwks_uri
            .clone()
            .unwrap_or_else(|| format!("{}/.well-known/jwks.json", self.issuer))
    }
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    #[error("token expired")]
    TokenExpired,

    #[error("missing bearer credential")]
    MissingCredential,

    #[error("provider error: {message}")]
    Provider { message: String },
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": 401,
            "error_code": "UNAUTHENTICATED",
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Expected JWT claims.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

/// The validated caller.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub owner_id: OwnerId,
    pub subject: String,
    pub email: Option<String>,
}

/// JWKS-backed bearer validator.
pub struct BearerAuth {
    config: AuthConfig,
    jwks: RwLock<Option<JwkSet>>,
    http_client: reqwest::Client,
}

impl BearerAuth {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            jwks: RwLock::new(None),
            http_client: reqwest::Client::new(),
        }
    }

    /// Fetch the JWKS ahead of the first request.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        if self.config.skip_validation {
            info!("bearer validation disabled (test mode)");
            return Ok(());
        }
        self.refresh_jwks().await
    }

    pub async fn refresh_jwks(&self) -> Result<(), AuthError> {
        let jwks_uri = self.config.jwks_uri();
        debug!(uri = %jwks_uri, "fetching JWKS");

        let response = self
            .http_client
            .get(&jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::Provider {
                message: format!("failed to fetch JWKS: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(AuthError::Provider {
                message: format!("JWKS endpoint returned status {}", response.status()),
            });
        }
        let jwks: JwkSet = response.json().await.map_err(|e| AuthError::Provider {
            message: format!("failed to parse JWKS: {e}"),
        })?;

        let mut guard = self.jwks.write().await;
        *guard = Some(jwks);
        info!("JWKS refreshed");
        Ok(())
    }

    /// Validate a bearer token and derive the caller identity.
    pub async fn validate_token(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if self.config.skip_validation {
            // Test mode: the raw token is the owner id.
            return Ok(AuthenticatedUser {
                owner_id: OwnerId::from_string(token.to_string()),
                subject: token.to_string(),
                email: None,
            });
        }

        let header = decode_header(token).map_err(|e| AuthError::InvalidToken {
            reason: format!("invalid JWT header: {e}"),
        })?;
        let kid = header.kid.ok_or(AuthError::InvalidToken {
            reason: "token missing 'kid'".to_string(),
        })?;

        let guard = self.jwks.read().await;
        let jwks = guard.as_ref().ok_or(AuthError::Provider {
            message: "JWKS not loaded".to_string(),
        })?;
        let jwk = jwks.find(&kid).ok_or(AuthError::InvalidToken {
            reason: format!("unknown signing key: {kid}"),
        })?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::Provider {
            message: format!("unusable JWK: {e}"),
        })?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);

        let data = decode::<Claims>(token, &key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken {
                    reason: e.to_string(),
                },
            }
        })?;

        Ok(AuthenticatedUser {
            owner_id: OwnerId::from_string(data.claims.sub.clone()),
            subject: data.claims.sub,
            email: data.claims.email,
        })
    }
}

#[async_trait]
impl<St> FromRequestParts<St> for AuthenticatedUser
where
    Arc<BearerAuth>: FromRef<St>,
    St: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &St) -> Result<Self, Self::Rejection> {
        let auth = Arc::<BearerAuth>::from_ref(state);
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingCredential)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingCredential)?;
        auth.validate_token(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mode_uses_the_token_as_owner() {
        let auth = BearerAuth::new(AuthConfig::test_mode());
        auth.initialize().await.unwrap();
        let user = auth.validate_token("owner-42").await.unwrap();
        assert_eq!(user.owner_id.as_str(), "owner-42");
    }

    #[tokio::test]
    async fn garbage_tokens_are_rejected_when_validating() {
        let auth = BearerAuth::new(AuthConfig::local_dev());
        let err = auth.validate_token("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    #[test]
    fn jwks_uri_defaults_to_well_known() {
        let config = AuthConfig::local_dev();
        assert_eq!(
            config.jwks_uri(),
            "http://localhost:8080/.well-known/jwks.json"
        );
    }
}
