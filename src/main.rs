//! PhishGuard Cloud Server
//!
//! Phishing assessment and incident risk engine behind the awareness
//! training portal.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PHISHGUARD CLOUD                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐ │
//! │  │  Login    │  │ Assessment│  │  Incident Dashboard     │ │
//! │  │  Guard    │  │  Engine   │  │  (risk scoring, JWT)    │ │
//! │  └─────┬─────┘  └─────┬─────┘  └────────────┬────────────┘ │
//! │        └──────► Incident Recorder ◄──────────┘              │
//! │                       ▼                                     │
//! │           ┌────────────────────────┐                       │
//! │           │ RecordStore (PG / mem) │                       │
//! │           └────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod assessment;
mod clock;
mod config;
mod dashboard;
mod db;
mod error;
mod handlers;
mod incident;
mod middleware;
mod models;
mod rate_limit;
mod risk;
mod store;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::assessment::AssessmentEngine;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StoreBackend};
use crate::dashboard::Dashboard;
use crate::incident::IncidentRecorder;
use crate::rate_limit::RateLimitGuard;
use crate::store::{MemoryStore, PgStore, RecordStore};

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "phishguard_cloud=debug,tower_http=debug".into());
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("PhishGuard Cloud Server starting...");

    let store = open_store(&config).await?;
    let state = AppState::new(config.clone(), store, Arc::new(SystemClock));

    spawn_expiry_sweep(state.engine.clone(), config.assessment.sweep_interval_secs);

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    if config.is_production() && config.store_backend == StoreBackend::Memory {
        anyhow::bail!("STORE_BACKEND=memory is not supported in production");
    }

    match config.store_backend {
        StoreBackend::Postgres => {
            tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
            let pool = db::create_pool(&config.database_url).await?;

            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;

            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory record store, data is lost on restart");
            let store = MemoryStore::new();
            if let Some(path) = &config.item_pool_file {
                let count = store.load_items(Path::new(path))?;
                tracing::info!("Loaded {} test items from {}", count, path);
            }
            Ok(Arc::new(store))
        }
    }
}

/// Complete sessions whose time limit passed without further access
fn spawn_expiry_sweep(engine: Arc<AssessmentEngine>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match engine.sweep_expired().await {
                Ok(0) => {}
                Ok(expired) => tracing::info!("Expiry sweep completed {} sessions", expired),
                Err(e) => tracing::error!("Expiry sweep failed: {}", e),
            }
        }
    });
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub guard: RateLimitGuard,
    pub engine: Arc<AssessmentEngine>,
    pub dashboard: Dashboard,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        let recorder = IncidentRecorder::new(store.clone(), clock.clone());
        Self {
            guard: RateLimitGuard::new(store.clone(), recorder.clone(), clock.clone(), config.rate_limit),
            engine: Arc::new(AssessmentEngine::new(store.clone(), recorder, clock.clone())),
            dashboard: Dashboard::new(store, config.risk),
            clock,
            config,
        }
    }
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/api/v1/auth/check-login", post(handlers::auth::check_login))
        .route("/api/v1/auth/record-login-failure", post(handlers::auth::record_login_failure))
        .route("/api/v1/auth/reset-login", post(handlers::auth::reset_login));

    // Assessment routes (JWT auth, sessions scoped to their owner)
    let session_routes = Router::new()
        .route("/api/v1/sessions", post(handlers::sessions::create))
        .route("/api/v1/sessions/:id/current", get(handlers::sessions::current))
        .route("/api/v1/sessions/:id/answers", post(handlers::sessions::answer))
        .route("/api/v1/sessions/:id/advance", post(handlers::sessions::advance))
        .route("/api/v1/sessions/:id/result", get(handlers::sessions::result))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth
        ));

    // Dashboard routes (admin JWT auth)
    let dashboard_routes = Router::new()
        .route("/api/v1/dashboard/timeline", get(handlers::dashboard::timeline))
        .route("/api/v1/dashboard/heatmap", get(handlers::dashboard::heatmap))
        .route("/api/v1/dashboard/stats", get(handlers::dashboard::stats))
        .route("/api/v1/dashboard/export.csv", get(handlers::dashboard::export_csv))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_admin_auth
        ));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(dashboard_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::clock::ManualClock;
    use crate::config::{AssessmentConfig, RateLimitConfig, RiskConfig};
    use crate::middleware::auth::Claims;
    use crate::models::{Difficulty, TestItem};

    const SECRET: &str = "router-test-secret";

    fn test_config() -> Config {
        Config {
            database_url: String::new(),
            port: 0,
            jwt_secret: SECRET.to_string(),
            environment: "test".to_string(),
            store_backend: StoreBackend::Memory,
            log_json: false,
            item_pool_file: None,
            rate_limit: RateLimitConfig::default(),
            risk: RiskConfig::default(),
            assessment: AssessmentConfig {
                default_question_count: 3,
                ..AssessmentConfig::default()
            },
        }
    }

    fn items(count: usize) -> Vec<TestItem> {
        (0..count)
            .map(|i| TestItem {
                id: Uuid::new_v4(),
                title: format!("Parcel notice {}", i),
                description: None,
                image_url: None,
                category: None,
                is_phishing: true,
                explanation: "Courier links never ask for card details".to_string(),
                difficulty: Difficulty::Intermediate,
                indicators: vec!["payment_request".to_string()],
            })
            .collect()
    }

    fn app(pool: usize) -> Router {
        let store = Arc::new(MemoryStore::with_items(items(pool)));
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()));
        create_router(AppState::new(test_config(), store, clock))
    }

    fn token(role: &str) -> String {
        token_for(Uuid::new_v4(), role)
    }

    fn token_for(user_id: Uuid, role: &str) -> String {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp: now + 3600,
            iat: now,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_json_as(uri: &str, body: Value, bearer: &str) -> Request<Body> {
        let mut req = post_json(uri, body);
        req.headers_mut()
            .insert(header::AUTHORIZATION, format!("Bearer {}", bearer).parse().unwrap());
        req
    }

    fn get_as(uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(0), get_as("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_login_guard_blocks_after_five_failures() {
        let app = app(0);
        let ip = json!({ "identifier": "203.0.113.1" });

        for _ in 0..5 {
            let (status, _) = send(&app, post_json("/api/v1/auth/record-login-failure", ip.clone())).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(&app, post_json("/api/v1/auth/check-login", ip.clone())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["allowed"], false);
        assert_eq!(body["remainingAttempts"], 0);
        assert_eq!(body["retryAfterSeconds"], 900);

        let (status, _) = send(&app, post_json("/api/v1/auth/reset-login", ip.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, post_json("/api/v1/auth/check-login", ip)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remainingAttempts"], 5);
    }

    #[tokio::test]
    async fn test_login_guard_falls_back_to_forwarded_header() {
        let app = app(0);
        let mut req = post_json("/api/v1/auth/record-login-failure", json!({}));
        req.headers_mut()
            .insert("X-Forwarded-For", "198.51.100.4, 10.0.0.1".parse().unwrap());
        send(&app, req).await;

        let (_, body) = send(
            &app,
            post_json("/api/v1/auth/check-login", json!({ "identifier": "198.51.100.4" })),
        )
        .await;
        assert_eq!(body["remainingAttempts"], 4);

        let (_, body) = send(&app, post_json("/api/v1/auth/check-login", json!({}))).await;
        assert_eq!(body["remainingAttempts"], 5);
    }

    #[tokio::test]
    async fn test_session_flow() {
        let app = app(5);
        let user = Uuid::new_v4();
        let learner = token_for(user, "learner");

        let (status, body) = send(&app, post_json_as("/api/v1/sessions", json!({}), &learner)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["totalQuestions"], 3);
        let id = body["sessionId"].as_str().unwrap().to_string();

        let (status, body) = send(&app, get_as(&format!("/api/v1/sessions/{}/current", id), Some(&learner))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentQuestion"], 1);
        assert!(body["item"].get("isPhishing").is_none());

        let answer_uri = format!("/api/v1/sessions/{}/answers", id);
        let (status, body) = send(&app, post_json_as(&answer_uri, json!({ "judgment": false }), &learner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["correct"], false);
        assert_eq!(body["sessionComplete"], false);
        assert_eq!(body["explanation"], "Courier links never ask for card details");

        let (status, _) = send(&app, post_json_as(&answer_uri, json!({ "judgment": true }), &learner)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let advance_uri = format!("/api/v1/sessions/{}/advance", id);
        let (status, body) = send(&app, post_json_as(&advance_uri, json!({}), &learner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentQuestion"], 2);

        let (status, body) = send(&app, get_as(&format!("/api/v1/sessions/{}/result", id), Some(&learner))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userId"], user.to_string());
        assert_eq!(body["completed"], false);
        assert_eq!(body["answers"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_errors() {
        let app = app(2);
        let learner = token("learner");

        let (status, body) = send(
            &app,
            post_json_as("/api/v1/sessions", json!({ "questionCount": 4 }), &learner),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], 422);

        let (status, _) = send(
            &app,
            post_json_as("/api/v1/sessions", json!({ "questionCount": 0 }), &learner),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/v1/sessions/{}/answers", Uuid::new_v4());
        let (status, _) = send(&app, post_json_as(&uri, json!({ "judgment": true }), &learner)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_routes_require_token() {
        let app = app(5);

        let (status, _) = send(&app, post_json("/api/v1/sessions", json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let uri = format!("/api/v1/sessions/{}/current", Uuid::new_v4());
        let (status, _) = send(&app, get_as(&uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, get_as(&uri, Some("not-a-jwt"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_foreign_session_is_not_found() {
        let app = app(5);
        let owner = token("learner");
        let other = token("learner");

        let (_, body) = send(&app, post_json_as("/api/v1/sessions", json!({}), &owner)).await;
        let id = body["sessionId"].as_str().unwrap().to_string();

        let (status, _) = send(&app, get_as(&format!("/api/v1/sessions/{}/current", id), Some(&other))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let answer_uri = format!("/api/v1/sessions/{}/answers", id);
        let (status, _) = send(&app, post_json_as(&answer_uri, json!({ "judgment": true }), &other)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get_as(&format!("/api/v1/sessions/{}/result", id), Some(&other))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // the owner's question is still unanswered
        let (status, body) = send(&app, get_as(&format!("/api/v1/sessions/{}/current", id), Some(&owner))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["awaitingAdvance"], false);
    }

    #[tokio::test]
    async fn test_dashboard_requires_admin() {
        let app = app(0);

        let (status, _) = send(&app, get_as("/api/v1/dashboard/stats", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, get_as("/api/v1/dashboard/stats", Some("not-a-jwt"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let learner = token("learner");
        let (status, _) = send(&app, get_as("/api/v1/dashboard/heatmap", Some(&learner))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = token("admin");
        let (status, body) = send(&app, get_as("/api/v1/dashboard/stats", Some(&admin))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalIncidents"], 0);
    }

    #[tokio::test]
    async fn test_dashboard_reflects_lockout_incident() {
        let app = app(0);
        for _ in 0..5 {
            send(
                &app,
                post_json("/api/v1/auth/record-login-failure", json!({ "identifier": "203.0.113.1" })),
            )
            .await;
        }

        let admin = token("admin");
        let (status, body) = send(&app, get_as("/api/v1/dashboard/timeline?limit=10", Some(&admin))).await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["incidentType"], "brute_force");
        assert_eq!(entries[0]["severity"], "high");

        let (status, _) = send(&app, get_as("/api/v1/dashboard/timeline?limit=0", Some(&admin))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(get_as("/api/v1/dashboard/export.csv", Some(&admin)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains(",brute_force,high,203.0.113.1,,"));
    }
}
