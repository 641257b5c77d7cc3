//! Timed phishing assessment engine
//!
//! Owns the persistence and concurrency around the session state machine:
//! - question sampling without replacement at creation
//! - at most one in-flight mutation per session (per-session async lock,
//!   backed by the store refusing writes to completed sessions)
//! - lazy time-limit expiry on every access, plus an idempotent sweep
//! - a `phishing_failure` incident for every wrong answer

pub mod machine;
pub mod scoring;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::incident::IncidentRecorder;
use crate::models::{
    AnswerRecord, AssessmentSession, IncidentContext, IncidentType, PresentedItem, RequestOrigin,
    SessionState,
};
use crate::store::RecordStore;

pub use scoring::PerformanceLevel;

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub correct: bool,
    pub explanation: String,
    pub question_number: i32,
    /// The final question was just answered; call `advance` to finalize
    pub session_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: Uuid,
    pub state: SessionState,
    pub current_question: i32,
    pub total_questions: i32,
    pub correct_count: i32,
    pub remaining_seconds: i64,
    pub awaiting_advance: bool,
    pub item: Option<PresentedItem>,
}

impl SessionProgress {
    fn of(session: &AssessmentSession, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id,
            state: session.state,
            current_question: session.current_question.min(session.total_questions()),
            total_questions: session.total_questions(),
            correct_count: session.score,
            remaining_seconds: session.remaining_seconds(now),
            awaiting_advance: session.current_answered,
            item: session.current_item().map(PresentedItem::from),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub completed: bool,
    pub correct_count: i32,
    pub total_questions: i32,
    pub score: i32,
    pub performance_level: PerformanceLevel,
    pub message: &'static str,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub answers: Vec<AnswerRecord>,
}

// ============================================================================
// SESSION LOCKS
// ============================================================================

/// One async mutex per session id, held only while some call uses it
#[derive(Default)]
struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, id: Uuid) -> SessionGuard<'_> {
        let lock = self.locks.lock().entry(id).or_default().clone();
        let mut guard = SessionGuard { locks: self, id, held: None };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Releases the session lock on drop, and removes the map entry when no
/// other call holds or waits for it
struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    id: Uuid,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // waiters clone the Arc under this map lock, so the count is stable here
        let mut locks = self.locks.locks.lock();
        drop(self.held.take());
        if locks.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.id);
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct AssessmentEngine {
    store: Arc<dyn RecordStore>,
    recorder: IncidentRecorder,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
}

impl AssessmentEngine {
    pub fn new(store: Arc<dyn RecordStore>, recorder: IncidentRecorder, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            recorder,
            clock,
            locks: SessionLocks::default(),
        }
    }

    /// Start a session over `question_count` distinct items drawn at random
    pub async fn create(
        &self,
        user_id: Uuid,
        question_count: usize,
        time_limit_minutes: i32,
    ) -> EngineResult<AssessmentSession> {
        if question_count == 0 {
            return Err(EngineError::InvalidTransition("a session needs at least one question"));
        }

        let mut pool = self.store.list_test_items().await?;
        if pool.len() < question_count {
            tracing::warn!(
                requested = question_count,
                available = pool.len(),
                "Item pool too small for assessment"
            );
            return Err(EngineError::InsufficientItems {
                requested: question_count,
                available: pool.len(),
            });
        }

        pool.shuffle(&mut rand::thread_rng());
        pool.truncate(question_count);

        let session = AssessmentSession::start(user_id, pool, time_limit_minutes, self.clock.now());
        self.store.insert_session(&session).await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %user_id,
            questions = question_count,
            time_limit_minutes,
            "Assessment session created"
        );
        Ok(session)
    }

    async fn load(&self, id: Uuid) -> EngineResult<AssessmentSession> {
        self.store.find_session(id).await?.ok_or(EngineError::SessionNotFound)
    }

    /// Sessions of other users read as missing
    async fn load_owned(&self, id: Uuid, owner: Uuid) -> EngineResult<AssessmentSession> {
        let session = self.load(id).await?;
        if session.user_id != owner {
            tracing::warn!(session_id = %id, user_id = %owner, "Session accessed by non-owner");
            return Err(EngineError::SessionNotFound);
        }
        Ok(session)
    }

    /// Write a mutated session; `SessionCompleted` if someone completed it first
    async fn persist(&self, session: &AssessmentSession) -> EngineResult<()> {
        if !self.store.update_session(session).await? {
            return Err(EngineError::SessionCompleted);
        }
        Ok(())
    }

    /// Persist whatever a rejected transition changed (an expiry) and hand
    /// the rejection back
    async fn persist_rejection(
        &self,
        before: &AssessmentSession,
        after: &AssessmentSession,
        err: EngineError,
    ) -> EngineError {
        if before != after {
            if let Err(store_err) = self.persist(after).await {
                tracing::debug!(session_id = %after.id, error = %store_err, "Expiry already persisted");
            }
            tracing::info!(session_id = %after.id, score = after.final_score(), "Assessment expired");
        }
        err
    }

    /// Question currently presented, expiring the session first if its time is up
    pub async fn current(&self, id: Uuid, owner: Uuid) -> EngineResult<SessionProgress> {
        let _guard = self.locks.acquire(id).await;
        let mut session = self.load_owned(id, owner).await?;
        let now = self.clock.now();

        if session.expire_if_timed_out(now) {
            self.persist(&session).await?;
            tracing::info!(session_id = %id, score = session.final_score(), "Assessment expired");
        }
        Ok(SessionProgress::of(&session, now))
    }

    /// Judge the current question
    ///
    /// The answer record is written before the session, so a failed write
    /// leaves the session untouched and the call can be retried.
    pub async fn answer(
        &self,
        id: Uuid,
        owner: Uuid,
        judgment: bool,
        origin: &RequestOrigin,
    ) -> EngineResult<AnswerOutcome> {
        let _guard = self.locks.acquire(id).await;
        let mut session = self.load_owned(id, owner).await?;
        let before = session.clone();
        let now = self.clock.now();

        let applied = match session.apply_answer(judgment, now) {
            Ok(applied) => applied,
            Err(err) => return Err(self.persist_rejection(&before, &session, err).await),
        };

        self.store
            .insert_answer(&AnswerRecord {
                id: Uuid::new_v4(),
                session_id: session.id,
                user_id: session.user_id,
                item_id: applied.item.id,
                user_answer: judgment,
                is_correct: applied.correct,
                time_taken_seconds: applied.latency_secs,
                question_number: applied.question_number,
                answered_at: now,
            })
            .await?;
        self.persist(&session).await?;

        if !applied.correct {
            let context = IncidentContext {
                decision_latency_secs: Some(applied.latency_secs),
                missed_indicators: applied.item.indicators.clone(),
                difficulty: Some(applied.item.difficulty),
                raw: json!({
                    "session_id": session.id,
                    "item_id": applied.item.id,
                    "question_number": applied.question_number,
                    "user_answer": judgment,
                    "is_phishing": applied.item.is_phishing,
                    "difficulty": applied.item.difficulty.as_str(),
                }),
                ..IncidentContext::from_origin(origin)
            };
            self.recorder
                .record(session.user_id, IncidentType::PhishingFailure, context)
                .await;
        }

        tracing::debug!(
            session_id = %id,
            question = applied.question_number,
            correct = applied.correct,
            latency_secs = applied.latency_secs,
            "Answer recorded"
        );

        Ok(AnswerOutcome {
            correct: applied.correct,
            explanation: applied.item.explanation,
            question_number: applied.question_number,
            session_complete: applied.is_final,
        })
    }

    /// Move past an answered question; completes the session after the last one
    pub async fn advance(&self, id: Uuid, owner: Uuid) -> EngineResult<SessionProgress> {
        let _guard = self.locks.acquire(id).await;
        let mut session = self.load_owned(id, owner).await?;
        let before = session.clone();
        let now = self.clock.now();

        if let Err(err) = session.advance(now) {
            return Err(self.persist_rejection(&before, &session, err).await);
        }
        self.persist(&session).await?;

        if session.is_completed() {
            tracing::info!(
                session_id = %id,
                score = session.final_score(),
                "Assessment completed"
            );
        }
        Ok(SessionProgress::of(&session, now))
    }

    /// Idempotent; `true` only when this call completed the session
    pub async fn expire_if_timed_out(&self, id: Uuid) -> EngineResult<bool> {
        let _guard = self.locks.acquire(id).await;
        let mut session = self.load(id).await?;

        if !session.expire_if_timed_out(self.clock.now()) {
            return Ok(false);
        }
        match self.persist(&session).await {
            Ok(()) => {
                tracing::info!(session_id = %id, score = session.final_score(), "Assessment expired");
                Ok(true)
            }
            // another instance got there first
            Err(EngineError::SessionCompleted) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Expire every open session whose time is up
    pub async fn sweep_expired(&self) -> EngineResult<usize> {
        let mut expired = 0;
        for id in self.store.list_open_session_ids().await? {
            match self.expire_if_timed_out(id).await {
                Ok(true) => expired += 1,
                Ok(false) | Err(EngineError::SessionNotFound) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(expired)
    }

    /// Score report; lazily expires the session first
    pub async fn result(&self, id: Uuid, owner: Uuid) -> EngineResult<SessionResult> {
        self.load_owned(id, owner).await?;
        self.expire_if_timed_out(id).await?;
        let session = self.load(id).await?;
        let answers = self.store.list_answers(id).await?;
        let score = session.final_score();
        let level = PerformanceLevel::from_percentage(score);

        Ok(SessionResult {
            session_id: session.id,
            user_id: session.user_id,
            completed: session.is_completed(),
            correct_count: session.score,
            total_questions: session.total_questions(),
            score,
            performance_level: level,
            message: level.message(),
            started_at: session.started_at,
            completed_at: session.completed_at,
            answers,
        })
    }
}
