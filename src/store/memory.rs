//! In-memory record store

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::RecordStore;
use crate::error::{EngineError, EngineResult};
use crate::models::{AnswerRecord, AssessmentSession, AttemptWindow, SecurityIncident, TestItem};

#[derive(Default)]
struct Tables {
    attempts: HashMap<(String, String), AttemptWindow>,
    items: Vec<TestItem>,
    sessions: HashMap<Uuid, AssessmentSession>,
    answers: Vec<AnswerRecord>,
    incidents: Vec<SecurityIncident>,
    profiles: HashMap<Uuid, String>,
}

/// Single-process store; every table sits behind one lock so each call is atomic
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    incidents_unavailable: AtomicBool,
    answers_unavailable: AtomicBool,
    session_writes_unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_items(items: Vec<TestItem>) -> Self {
        let store = Self::new();
        store.tables.lock().items = items;
        store
    }

    /// Seed the item pool from a JSON array of test items
    pub fn load_items(&self, path: &Path) -> anyhow::Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let items: Vec<TestItem> = serde_json::from_str(&raw)?;
        let count = items.len();
        self.tables.lock().items.extend(items);
        Ok(count)
    }

    #[cfg(test)]
    pub fn insert_profile(&self, user_id: Uuid, full_name: impl Into<String>) {
        self.tables.lock().profiles.insert(user_id, full_name.into());
    }

    /// Make every call fail as if the backing service were down
    #[cfg(test)]
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Fail only incident writes
    #[cfg(test)]
    pub fn set_incidents_unavailable(&self, down: bool) {
        self.incidents_unavailable.store(down, Ordering::SeqCst);
    }

    /// Fail only answer writes
    #[cfg(test)]
    pub fn set_answers_unavailable(&self, down: bool) {
        self.answers_unavailable.store(down, Ordering::SeqCst);
    }

    /// Fail only session updates
    #[cfg(test)]
    pub fn set_session_writes_unavailable(&self, down: bool) {
        self.session_writes_unavailable.store(down, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> EngineResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::StoreUnavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_attempt_window(
        &self,
        identifier: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Option<AttemptWindow>> {
        self.ensure_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .attempts
            .get(&(identifier.to_string(), endpoint.to_string()))
            .filter(|w| w.first_attempt_at >= since)
            .cloned())
    }

    async fn increment_attempt_window(
        &self,
        identifier: &str,
        endpoint: &str,
        now: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> EngineResult<AttemptWindow> {
        self.ensure_available()?;
        let mut tables = self.tables.lock();
        let key = (identifier.to_string(), endpoint.to_string());

        let window = match tables.attempts.get_mut(&key) {
            Some(existing) if existing.first_attempt_at >= since => {
                existing.attempt_count += 1;
                existing.last_attempt_at = now;
                existing.clone()
            }
            _ => {
                let fresh = AttemptWindow {
                    id: Uuid::new_v4(),
                    ip_address: identifier.to_string(),
                    endpoint: endpoint.to_string(),
                    attempt_count: 1,
                    first_attempt_at: now,
                    last_attempt_at: now,
                };
                tables.attempts.insert(key, fresh.clone());
                fresh
            }
        };

        Ok(window)
    }

    async fn delete_attempt_windows(&self, identifier: &str, endpoint: &str) -> EngineResult<u64> {
        self.ensure_available()?;
        let removed = self
            .tables
            .lock()
            .attempts
            .remove(&(identifier.to_string(), endpoint.to_string()));
        Ok(removed.map_or(0, |_| 1))
    }

    async fn list_test_items(&self) -> EngineResult<Vec<TestItem>> {
        self.ensure_available()?;
        Ok(self.tables.lock().items.clone())
    }

    async fn insert_session(&self, session: &AssessmentSession) -> EngineResult<()> {
        self.ensure_available()?;
        self.tables.lock().sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> EngineResult<Option<AssessmentSession>> {
        self.ensure_available()?;
        Ok(self.tables.lock().sessions.get(&id).cloned())
    }

    async fn update_session(&self, session: &AssessmentSession) -> EngineResult<bool> {
        self.ensure_available()?;
        if self.session_writes_unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::StoreUnavailable("session table offline".to_string()));
        }
        let mut tables = self.tables.lock();
        match tables.sessions.get_mut(&session.id) {
            Some(stored) if stored.completed_at.is_none() => {
                *stored = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_open_session_ids(&self) -> EngineResult<Vec<Uuid>> {
        self.ensure_available()?;
        Ok(self
            .tables
            .lock()
            .sessions
            .values()
            .filter(|s| s.completed_at.is_none())
            .map(|s| s.id)
            .collect())
    }

    async fn insert_answer(&self, answer: &AnswerRecord) -> EngineResult<()> {
        self.ensure_available()?;
        if self.answers_unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::StoreUnavailable("answer table offline".to_string()));
        }
        // one record per (session, question)
        let mut tables = self.tables.lock();
        let existing = tables
            .answers
            .iter()
            .position(|a| a.session_id == answer.session_id && a.question_number == answer.question_number);
        match existing {
            Some(i) => tables.answers[i] = answer.clone(),
            None => tables.answers.push(answer.clone()),
        }
        Ok(())
    }

    async fn list_answers(&self, session_id: Uuid) -> EngineResult<Vec<AnswerRecord>> {
        self.ensure_available()?;
        let mut answers: Vec<AnswerRecord> = self
            .tables
            .lock()
            .answers
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        answers.sort_by_key(|a| a.question_number);
        Ok(answers)
    }

    async fn insert_incident(&self, incident: &SecurityIncident) -> EngineResult<()> {
        self.ensure_available()?;
        if self.incidents_unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::StoreUnavailable("incident table offline".to_string()));
        }
        self.tables.lock().incidents.push(incident.clone());
        Ok(())
    }

    async fn list_incidents(&self, limit: Option<i64>) -> EngineResult<Vec<SecurityIncident>> {
        self.ensure_available()?;
        let mut incidents = self.tables.lock().incidents.clone();
        // later inserts first among equal timestamps
        incidents.reverse();
        incidents.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            incidents.truncate(limit.max(0) as usize);
        }
        Ok(incidents)
    }

    async fn display_names(&self, user_ids: &[Uuid]) -> EngineResult<HashMap<Uuid, String>> {
        self.ensure_available()?;
        let tables = self.tables.lock();
        Ok(user_ids
            .iter()
            .filter_map(|id| tables.profiles.get(id).map(|name| (*id, name.clone())))
            .collect())
    }
}
