//! Assessment session handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{AppState, AppResult};
use crate::assessment::{AnswerOutcome, SessionProgress, SessionResult};
use crate::middleware::auth::UserContext;
use crate::models::RequestOrigin;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[validate(range(min = 1, max = 100))]
    pub question_count: Option<u32>,
    #[validate(range(min = 1, max = 180))]
    pub time_limit_minutes: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub total_questions: i32,
    pub time_limit_minutes: i32,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    /// `true` when the learner judges the item to be phishing
    pub judgment: bool,
}

/// Start a new timed assessment for the signed-in user
pub async fn create(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateSessionRequest>,
) -> AppResult<(StatusCode, Json<CreateSessionResponse>)> {
    req.validate()?;

    let defaults = state.config.assessment;
    let question_count = req.question_count.unwrap_or(defaults.default_question_count);
    let time_limit = req.time_limit_minutes.unwrap_or(defaults.default_time_limit_minutes);

    let session = state
        .engine
        .create(user.user_id, question_count as usize, time_limit as i32)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            total_questions: session.total_questions(),
            time_limit_minutes: session.time_limit_minutes,
        }),
    ))
}

pub async fn current(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: UserContext,
) -> AppResult<Json<SessionProgress>> {
    Ok(Json(state.engine.current(id, user.user_id).await?))
}

pub async fn answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: UserContext,
    origin: RequestOrigin,
    Json(req): Json<AnswerRequest>,
) -> AppResult<Json<AnswerOutcome>> {
    Ok(Json(state.engine.answer(id, user.user_id, req.judgment, &origin).await?))
}

pub async fn advance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: UserContext,
) -> AppResult<Json<SessionProgress>> {
    Ok(Json(state.engine.advance(id, user.user_id).await?))
}

pub async fn result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: UserContext,
) -> AppResult<Json<SessionResult>> {
    Ok(Json(state.engine.result(id, user.user_id).await?))
}
