//! Login guard handlers
//!
//! The login form calls these around its own credential check:
//! `check-login` before, `record-login-failure` on a bad password and
//! `reset-login` after a successful sign-in.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::{AppState, AppResult};
use crate::models::RequestOrigin;
use crate::rate_limit::LoginDecision;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginGuardRequest {
    /// Client IP; the proxy header is used when absent
    #[validate(length(min = 1, max = 64))]
    pub identifier: Option<String>,
}

fn resolve(origin: RequestOrigin, req: &LoginGuardRequest) -> AppResult<RequestOrigin> {
    req.validate()?;
    Ok(origin.with_identifier(req.identifier.as_deref()))
}

/// 200 with the decision, or 429 with the same fields when blocked
pub async fn check_login(
    State(state): State<AppState>,
    origin: RequestOrigin,
    Json(req): Json<LoginGuardRequest>,
) -> AppResult<Json<LoginDecision>> {
    let origin = resolve(origin, &req)?;
    let decision = state.guard.check_fail_closed(origin.identifier()).await;
    Ok(Json(decision.ensure_allowed()?))
}

pub async fn record_login_failure(
    State(state): State<AppState>,
    origin: RequestOrigin,
    Json(req): Json<LoginGuardRequest>,
) -> AppResult<Json<Value>> {
    let origin = resolve(origin, &req)?;
    state.guard.record_failure(origin.identifier(), &origin).await?;
    Ok(Json(json!({})))
}

pub async fn reset_login(
    State(state): State<AppState>,
    origin: RequestOrigin,
    Json(req): Json<LoginGuardRequest>,
) -> AppResult<Json<Value>> {
    let origin = resolve(origin, &req)?;
    state.guard.reset(origin.identifier()).await?;
    Ok(Json(json!({})))
}
