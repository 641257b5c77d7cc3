//! Admin incident dashboard handlers

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::{AppState, AppResult};
use crate::dashboard::Heatmap;
use crate::middleware::auth::UserContext;
use crate::models::TimelineEntry;
use crate::risk::DashboardStats;

#[derive(Debug, Deserialize, Validate)]
pub struct TimelineQuery {
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<i64>,
}

/// Most recent incidents
pub async fn timeline(
    State(state): State<AppState>,
    Query(query): Query<TimelineQuery>,
) -> AppResult<Json<Vec<TimelineEntry>>> {
    query.validate()?;
    let limit = query.limit.unwrap_or(100);
    Ok(Json(state.dashboard.timeline(limit).await?))
}

/// Users ranked by risk plus the organization distribution
pub async fn heatmap(State(state): State<AppState>) -> AppResult<Json<Heatmap>> {
    Ok(Json(state.dashboard.heatmap().await?))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<DashboardStats>> {
    Ok(Json(state.dashboard.stats().await?))
}

pub async fn export_csv(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<impl IntoResponse> {
    let csv = state.dashboard.export_csv().await?;
    tracing::info!("Incident export requested by {}", user.user_id);

    let filename = format!(
        "attachment; filename=\"security-incidents-{}.csv\"",
        state.clock.now().format("%Y-%m-%d")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        csv,
    ))
}
