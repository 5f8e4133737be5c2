//! Request-scoped sessions from `Authorization: Bearer` tokens.

use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;

use drive_import::{Principal, Role};

use crate::error::AppError;
use crate::server::AppState;

/// Turns a bearer token into a verified principal.
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Principal, AppError>;
}

#[derive(Debug, Deserialize)]
struct AppMetadata {
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    app_metadata: Option<AppMetadata>,
}

/// HS256 session tokens signed with the backend's JWT secret.
///
/// The role comes from `app_metadata.role` when present, else `role`.
pub struct JwtSessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtSessionVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl SessionVerifier for JwtSessionVerifier {
    fn verify(&self, token: &str) -> Result<Principal, AppError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AppError::unauthorized(format!("invalid session: {e}")))?;
        let claims = data.claims;
        let role = claims
            .app_metadata
            .and_then(|m| m.role)
            .or(claims.role)
            .map(|r| Role::from_claim(&r))
            .unwrap_or(Role::Student);
        Ok(Principal::new(claims.sub, role))
    }
}

/// Extractor for the caller's verified identity.
pub struct Session(pub Principal);

impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

        state.sessions.verify(token).map(Session)
    }
}
