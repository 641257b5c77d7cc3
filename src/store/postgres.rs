//! PostgreSQL record store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::RecordStore;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AnswerRecord, AssessmentSession, AttemptWindow, Difficulty, IncidentType, Profile,
    SecurityIncident, SessionState, Severity, TestItem,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// ROW TYPES
// ============================================================================

#[derive(FromRow)]
struct ItemRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    image_url: Option<String>,
    category: Option<String>,
    is_phishing: bool,
    explanation: String,
    difficulty_level: Option<String>,
    indicators: Json<Vec<String>>,
}

impl From<ItemRow> for TestItem {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            image_url: row.image_url,
            category: row.category,
            is_phishing: row.is_phishing,
            explanation: row.explanation,
            difficulty: Difficulty::parse_lenient(row.difficulty_level.as_deref()),
            indicators: row.indicators.0,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    current_question: i32,
    score: i32,
    started_at: DateTime<Utc>,
    time_limit_minutes: i32,
    questions_data: Json<Vec<TestItem>>,
    status: String,
    question_presented_at: DateTime<Utc>,
    current_answered: bool,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for AssessmentSession {
    type Error = EngineError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let state = SessionState::parse(&row.status).ok_or_else(|| {
            EngineError::StoreUnavailable(format!("session {} has unknown status '{}'", row.id, row.status))
        })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            questions: row.questions_data.0,
            current_question: row.current_question,
            score: row.score,
            started_at: row.started_at,
            time_limit_minutes: row.time_limit_minutes,
            state,
            question_presented_at: row.question_presented_at,
            current_answered: row.current_answered,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct AnswerRow {
    id: Uuid,
    session_id: Uuid,
    user_id: Uuid,
    photo_test_id: Uuid,
    user_answer: bool,
    is_correct: bool,
    time_taken_seconds: i32,
    question_number: i32,
    created_at: DateTime<Utc>,
}

impl From<AnswerRow> for AnswerRecord {
    fn from(row: AnswerRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            user_id: row.user_id,
            item_id: row.photo_test_id,
            user_answer: row.user_answer,
            is_correct: row.is_correct,
            time_taken_seconds: row.time_taken_seconds,
            question_number: row.question_number,
            answered_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct IncidentRow {
    id: Uuid,
    user_id: Uuid,
    incident_type: String,
    severity: String,
    timestamp: DateTime<Utc>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    geolocation_country: Option<String>,
    time_to_decision_seconds: Option<i32>,
    missed_iocs: Json<Vec<String>>,
    raw_event_data: Option<serde_json::Value>,
}

impl IncidentRow {
    fn into_incident(self) -> Option<SecurityIncident> {
        let Some(incident_type) = IncidentType::parse(&self.incident_type) else {
            tracing::warn!(incident_id = %self.id, "Skipping incident with unknown type '{}'", self.incident_type);
            return None;
        };

        Some(SecurityIncident {
            id: self.id,
            user_id: self.user_id,
            incident_type,
            severity: Severity::parse_or_medium(&self.severity),
            timestamp: self.timestamp,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            geolocation_country: self.geolocation_country,
            time_to_decision_seconds: self.time_to_decision_seconds,
            missed_iocs: self.missed_iocs.0,
            raw_event_data: self.raw_event_data.unwrap_or(serde_json::Value::Null),
        })
    }
}

// ============================================================================
// STORE
// ============================================================================

#[async_trait]
impl RecordStore for PgStore {
    async fn find_attempt_window(
        &self,
        identifier: &str,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Option<AttemptWindow>> {
        let window = sqlx::query_as::<_, AttemptWindow>(
            r#"
            SELECT * FROM rate_limit_attempts
            WHERE ip_address = $1 AND endpoint = $2 AND first_attempt_at >= $3
            "#
        )
        .bind(identifier)
        .bind(endpoint)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        Ok(window)
    }

    async fn increment_attempt_window(
        &self,
        identifier: &str,
        endpoint: &str,
        now: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> EngineResult<AttemptWindow> {
        // Both CASE arms read the pre-update row, so a stale window is
        // replaced wholesale instead of being extended.
        let window = sqlx::query_as::<_, AttemptWindow>(
            r#"
            INSERT INTO rate_limit_attempts (id, ip_address, endpoint, attempt_count, first_attempt_at, last_attempt_at)
            VALUES ($1, $2, $3, 1, $4, $4)
            ON CONFLICT (ip_address, endpoint) DO UPDATE SET
                attempt_count = CASE
                    WHEN rate_limit_attempts.first_attempt_at >= $5 THEN rate_limit_attempts.attempt_count + 1
                    ELSE 1
                END,
                first_attempt_at = CASE
                    WHEN rate_limit_attempts.first_attempt_at >= $5 THEN rate_limit_attempts.first_attempt_at
                    ELSE EXCLUDED.first_attempt_at
                END,
                last_attempt_at = EXCLUDED.last_attempt_at
            RETURNING *
            "#
        )
        .bind(Uuid::new_v4())
        .bind(identifier)
        .bind(endpoint)
        .bind(now)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(window)
    }

    async fn delete_attempt_windows(&self, identifier: &str, endpoint: &str) -> EngineResult<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_attempts WHERE ip_address = $1 AND endpoint = $2")
            .bind(identifier)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_test_items(&self) -> EngineResult<Vec<TestItem>> {
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT id, title, description, image_url, category, is_phishing,
                   explanation, difficulty_level, indicators
            FROM phishing_photo_tests
            ORDER BY created_at DESC
            "#
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TestItem::from).collect())
    }

    async fn insert_session(&self, session: &AssessmentSession) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO phishing_test_sessions (
                id, user_id, total_questions, current_question, score, started_at,
                time_limit_minutes, questions_data, status, question_presented_at,
                current_answered, is_completed, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.questions.len() as i32)
        .bind(session.current_question)
        .bind(session.score)
        .bind(session.started_at)
        .bind(session.time_limit_minutes)
        .bind(Json(&session.questions))
        .bind(session.state.as_str())
        .bind(session.question_presented_at)
        .bind(session.current_answered)
        .bind(session.completed_at.is_some())
        .bind(session.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> EngineResult<Option<AssessmentSession>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM phishing_test_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AssessmentSession::try_from).transpose()
    }

    async fn update_session(&self, session: &AssessmentSession) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE phishing_test_sessions
            SET current_question = $2,
                score = $3,
                status = $4,
                question_presented_at = $5,
                current_answered = $6,
                is_completed = $7,
                completed_at = $8
            WHERE id = $1 AND is_completed = false
            "#
        )
        .bind(session.id)
        .bind(session.current_question)
        .bind(session.score)
        .bind(session.state.as_str())
        .bind(session.question_presented_at)
        .bind(session.current_answered)
        .bind(session.completed_at.is_some())
        .bind(session.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_open_session_ids(&self) -> EngineResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM phishing_test_sessions WHERE is_completed = false")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }

    async fn insert_answer(&self, answer: &AnswerRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO phishing_photo_results (
                id, session_id, user_id, photo_test_id, user_answer, is_correct,
                time_taken_seconds, question_number, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (session_id, question_number) DO UPDATE SET
                user_answer = EXCLUDED.user_answer,
                is_correct = EXCLUDED.is_correct,
                time_taken_seconds = EXCLUDED.time_taken_seconds,
                created_at = EXCLUDED.created_at
            "#
        )
        .bind(answer.id)
        .bind(answer.session_id)
        .bind(answer.user_id)
        .bind(answer.item_id)
        .bind(answer.user_answer)
        .bind(answer.is_correct)
        .bind(answer.time_taken_seconds)
        .bind(answer.question_number)
        .bind(answer.answered_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_answers(&self, session_id: Uuid) -> EngineResult<Vec<AnswerRecord>> {
        let rows = sqlx::query_as::<_, AnswerRow>(
            "SELECT * FROM phishing_photo_results WHERE session_id = $1 ORDER BY question_number"
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AnswerRecord::from).collect())
    }

    async fn insert_incident(&self, incident: &SecurityIncident) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO security_incidents (
                id, user_id, incident_type, severity, timestamp, ip_address, user_agent,
                geolocation_country, time_to_decision_seconds, missed_iocs, raw_event_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        )
        .bind(incident.id)
        .bind(incident.user_id)
        .bind(incident.incident_type.as_str())
        .bind(incident.severity.as_str())
        .bind(incident.timestamp)
        .bind(&incident.ip_address)
        .bind(&incident.user_agent)
        .bind(&incident.geolocation_country)
        .bind(incident.time_to_decision_seconds)
        .bind(Json(&incident.missed_iocs))
        .bind(&incident.raw_event_data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_incidents(&self, limit: Option<i64>) -> EngineResult<Vec<SecurityIncident>> {
        // LIMIT NULL means no limit in PostgreSQL
        let rows = sqlx::query_as::<_, IncidentRow>(
            "SELECT * FROM security_incidents ORDER BY timestamp DESC LIMIT $1"
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(IncidentRow::into_incident).collect())
    }

    async fn display_names(&self, user_ids: &[Uuid]) -> EngineResult<HashMap<Uuid, String>> {
        let profiles = sqlx::query_as::<_, Profile>(
            "SELECT user_id, full_name FROM profiles WHERE user_id = ANY($1)"
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles
            .into_iter()
            .filter_map(|p| p.full_name.map(|name| (p.user_id, name)))
            .collect())
    }
}
