//! Login brute-force guard
//!
//! Counts failed logins per identifier (client IP) inside a fixed window
//! that opens on the first failure. Expiry is lazy: a window older than the
//! configured duration is never incremented, the next failure opens a new one.
//!
//! # Failure policy
//!
//! The guard exists to block, so callers that cannot evaluate it must treat
//! the login as blocked. [`RateLimitGuard::check_fail_closed`] does that.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::clock::{self, Clock};
use crate::config::RateLimitConfig;
use crate::error::{EngineError, EngineResult};
use crate::incident::IncidentRecorder;
use crate::models::{
    AttemptWindow, IncidentContext, IncidentType, RequestOrigin, LOGIN_ENDPOINT, SYSTEM_USER_ID,
};
use crate::store::RecordStore;

/// Outcome of a login pre-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginDecision {
    pub allowed: bool,
    pub remaining_attempts: i32,
    pub retry_after_seconds: i64,
}

impl LoginDecision {
    /// `RateLimited` when the login must be refused
    pub fn ensure_allowed(self) -> EngineResult<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(EngineError::RateLimited { retry_after_seconds: self.retry_after_seconds })
        }
    }
}

#[derive(Clone)]
pub struct RateLimitGuard {
    store: Arc<dyn RecordStore>,
    recorder: IncidentRecorder,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimitGuard {
    pub fn new(
        store: Arc<dyn RecordStore>,
        recorder: IncidentRecorder,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
    ) -> Self {
        Self { store, recorder, clock, config }
    }

    /// Whether `identifier` may attempt another login right now
    pub async fn check(&self, identifier: &str) -> EngineResult<LoginDecision> {
        let now = self.clock.now();
        let window = self
            .store
            .find_attempt_window(identifier, LOGIN_ENDPOINT, clock::window_floor(now, self.config.window()))
            .await?;

        let count = window.as_ref().map_or(0, |w| w.attempt_count);

        if count >= self.config.max_attempts {
            let first_attempt_at = window.map_or(now, |w| w.first_attempt_at);
            // the window still counts at its closing instant
            let retry_after_seconds =
                clock::seconds_until_close(first_attempt_at, now, self.config.window()).max(1);
            tracing::warn!(ip = %identifier, attempts = count, retry_after_seconds, "Login blocked by rate limit");

            return Ok(LoginDecision {
                allowed: false,
                remaining_attempts: 0,
                retry_after_seconds,
            });
        }

        Ok(LoginDecision {
            allowed: true,
            remaining_attempts: self.config.max_attempts - count,
            retry_after_seconds: 0,
        })
    }

    /// [`check`](Self::check), but a store failure blocks for a full window
    pub async fn check_fail_closed(&self, identifier: &str) -> LoginDecision {
        match self.check(identifier).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(ip = %identifier, error = %err, "Rate limit check failed, blocking login");
                LoginDecision {
                    allowed: false,
                    remaining_attempts: 0,
                    retry_after_seconds: self.config.window().num_seconds(),
                }
            }
        }
    }

    /// Count one failed login. The failure that reaches the limit logs a
    /// `brute_force` incident.
    pub async fn record_failure(
        &self,
        identifier: &str,
        origin: &RequestOrigin,
    ) -> EngineResult<AttemptWindow> {
        let now = self.clock.now();
        let window = self
            .store
            .increment_attempt_window(
                identifier,
                LOGIN_ENDPOINT,
                now,
                clock::window_floor(now, self.config.window()),
            )
            .await?;

        tracing::debug!(ip = %identifier, attempts = window.attempt_count, "Recorded failed login");

        if window.attempt_count == self.config.max_attempts {
            let blocked_until = window.first_attempt_at + self.config.window();
            let context = IncidentContext {
                ip_address: Some(identifier.to_string()),
                raw: json!({
                    "identifier": identifier,
                    "attempt_count": window.attempt_count,
                    "blocked_until": blocked_until.to_rfc3339(),
                }),
                ..IncidentContext::from_origin(origin)
            };
            tracing::warn!(ip = %identifier, %blocked_until, "Login attempt limit reached");
            self.recorder.record(SYSTEM_USER_ID, IncidentType::BruteForce, context).await;
        }

        Ok(window)
    }

    /// Forget the identifier's failures after a successful login
    pub async fn reset(&self, identifier: &str) -> EngineResult<()> {
        let removed = self.store.delete_attempt_windows(identifier, LOGIN_ENDPOINT).await?;
        if removed > 0 {
            tracing::info!(ip = %identifier, "Cleared login rate limit");
        }
        Ok(())
    }
}
