//! Record store seam
//!
//! Every table the engine touches is reached through [`RecordStore`]. The
//! PostgreSQL implementation is used in deployments; [`MemoryStore`] backs
//! tests and the `STORE_BACKEND=memory` development mode.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{AnswerRecord, AssessmentSession, AttemptWindow, SecurityIncident, TestItem};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    // ------------------------------------------------------------------
    // Attempt windows
    // ------------------------------------------------------------------

    /// Window for `identifier` that opened at or after `since`
    async fn find_attempt_window(
        &self,
        identifier: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Option<AttemptWindow>>;

    /// Atomically bump the window opened at or after `since`, or replace
    /// whatever is stored with a fresh window of one attempt at `now`.
    async fn increment_attempt_window(
        &self,
        identifier: &str,
        endpoint: &str,
        now: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> EngineResult<AttemptWindow>;

    async fn delete_attempt_windows(&self, identifier: &str, endpoint: &str) -> EngineResult<u64>;

    // ------------------------------------------------------------------
    // Item pool (read-only, owned by course content)
    // ------------------------------------------------------------------

    async fn list_test_items(&self) -> EngineResult<Vec<TestItem>>;

    // ------------------------------------------------------------------
    // Sessions and answers
    // ------------------------------------------------------------------

    async fn insert_session(&self, session: &AssessmentSession) -> EngineResult<()>;

    async fn find_session(&self, id: Uuid) -> EngineResult<Option<AssessmentSession>>;

    /// Overwrite the stored session unless the stored copy is already
    /// completed. Returns `false` when nothing was written.
    async fn update_session(&self, session: &AssessmentSession) -> EngineResult<bool>;

    async fn list_open_session_ids(&self) -> EngineResult<Vec<Uuid>>;

    async fn insert_answer(&self, answer: &AnswerRecord) -> EngineResult<()>;

    /// Ordered by question number
    async fn list_answers(&self, session_id: Uuid) -> EngineResult<Vec<AnswerRecord>>;

    // ------------------------------------------------------------------
    // Incidents
    // ------------------------------------------------------------------

    async fn insert_incident(&self, incident: &SecurityIncident) -> EngineResult<()>;

    /// Newest first
    async fn list_incidents(&self, limit: Option<i64>) -> EngineResult<Vec<SecurityIncident>>;

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    async fn display_names(&self, user_ids: &[Uuid]) -> EngineResult<HashMap<Uuid, String>>;
}
