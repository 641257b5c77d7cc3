//! Authentication middleware and request context extractors

use axum::{
    extract::{State, Request},
    middleware::Next,
    response::Response,
    http::{header::{AUTHORIZATION, USER_AGENT}, HeaderMap},
};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, AppError};
use crate::models::{RequestOrigin, UserRole};

/// Identifier used when the caller sends neither a body identifier nor a proxy header
pub const FALLBACK_IP: &str = "127.0.0.1";

/// Width of the IP and country columns; longer header values are cut to fit
pub const MAX_ORIGIN_FIELD_LEN: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // User ID
    pub role: String,     // User role
    pub exp: usize,       // Expiration timestamp
    pub iat: usize,       // Issued at
}

/// User context extracted from JWT
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl UserContext {
    /// Check if user has admin role
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// RBAC: Require admin role
pub fn require_admin(user: &UserContext) -> Result<(), AppError> {
    if !user.is_admin() {
        tracing::warn!("Admin required but user {} has role '{}'", user.user_id, user.role.as_str());
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Decode the bearer token into a user context
fn authenticate(state: &AppState, req: &Request) -> Result<UserContext, AppError> {
    let token = extract_bearer_token(req)?;

    // Decode JWT
    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default()
    )?;

    let claims = token_data.claims;

    Ok(UserContext {
        user_id: Uuid::parse_str(&claims.sub).map_err(|_| AppError::TokenInvalid)?,
        role: UserRole::parse(&claims.role).ok_or(AppError::TokenInvalid)?,
    })
}

/// Middleware: JWT authentication for any role
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_ctx = authenticate(&state, &req)?;
    req.extensions_mut().insert(user_ctx);
    Ok(next.run(req).await)
}

/// Middleware: JWT authentication plus admin role, for the incident dashboard
pub async fn require_admin_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_ctx = authenticate(&state, &req)?;
    require_admin(&user_ctx)?;

    // Insert into request extensions
    req.extensions_mut().insert(user_ctx);

    Ok(next.run(req).await)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(req: &Request) -> Result<String, AppError> {
    let auth_header = req.headers()
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

/// First `X-Forwarded-For` entry, if any
pub fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| bounded(s.trim()))
        .filter(|s| !s.is_empty())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn bounded(value: &str) -> String {
    value.chars().take(MAX_ORIGIN_FIELD_LEN).collect()
}

impl RequestOrigin {
    /// Prefer an identifier supplied in the request body over the proxy header
    pub fn with_identifier(mut self, identifier: Option<&str>) -> Self {
        if let Some(id) = identifier.map(str::trim).filter(|id| !id.is_empty()) {
            self.ip_address = Some(id.to_string());
        }
        self
    }

    /// Rate-limit identifier; always present after extraction
    pub fn identifier(&self) -> &str {
        self.ip_address.as_deref().unwrap_or(FALLBACK_IP)
    }
}

// Implement FromRequestParts for UserContext
#[axum::async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions
            .get::<UserContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

// Implement FromRequestParts for RequestOrigin
#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestOrigin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestOrigin {
            ip_address: Some(forwarded_ip(&parts.headers).unwrap_or_else(|| FALLBACK_IP.to_string())),
            user_agent: header_string(&parts.headers, USER_AGENT.as_str()),
            country: header_string(&parts.headers, "CF-IPCountry").map(|c| bounded(&c)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn origin_of(headers: &[(&str, String)]) -> RequestOrigin {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        RequestOrigin::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_origin_prefers_first_forwarded_entry() {
        let origin = origin_of(&[
            ("X-Forwarded-For", " 198.51.100.7 , 10.0.0.1".to_string()),
            ("User-Agent", "Mozilla/5.0".to_string()),
            ("CF-IPCountry", "FR".to_string()),
        ])
        .await;
        assert_eq!(origin.identifier(), "198.51.100.7");
        assert_eq!(origin.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(origin.country.as_deref(), Some("FR"));

        let bare = origin_of(&[]).await;
        assert_eq!(bare.identifier(), FALLBACK_IP);
        assert_eq!(bare.country, None);
    }

    #[tokio::test]
    async fn test_oversized_origin_headers_are_cut_to_column_width() {
        let origin = origin_of(&[
            ("X-Forwarded-For", format!("{}, 10.0.0.1", "a".repeat(300))),
            ("CF-IPCountry", "Z".repeat(100)),
        ])
        .await;
        assert_eq!(origin.identifier(), "a".repeat(MAX_ORIGIN_FIELD_LEN));
        assert_eq!(origin.country.map(|c| c.len()), Some(MAX_ORIGIN_FIELD_LEN));
    }
}
