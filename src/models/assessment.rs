//! Assessment session, test item and answer models

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// Content authors type this by hand; anything unrecognised is beginner
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("advanced") => Difficulty::Advanced,
            Some("intermediate") => Difficulty::Intermediate,
            _ => Difficulty::Beginner,
        }
    }
}

/// One judgment item from the read-only pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestItem {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    /// Ground truth
    pub is_phishing: bool,
    pub explanation: String,
    pub difficulty: Difficulty,
    /// Indicator identifiers a correct judgment should have noticed
    #[serde(default)]
    pub indicators: Vec<String>,
}

/// Item as shown to the test taker, without the answer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedItem {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub difficulty: Difficulty,
}

impl From<&TestItem> for PresentedItem {
    fn from(item: &TestItem) -> Self {
        Self {
            id: item.id,
            title: item.title.clone(),
            description: item.description.clone(),
            image_url: item.image_url.clone(),
            category: item.category.clone(),
            difficulty: item.difficulty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    InProgress,
    Completed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::InProgress => "in_progress",
            SessionState::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(SessionState::Created),
            "in_progress" => Some(SessionState::InProgress),
            "completed" => Some(SessionState::Completed),
            _ => None,
        }
    }
}

/// One timed run of the judgment test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub questions: Vec<TestItem>,
    /// 1-based
    pub current_question: i32,
    /// Correct answers so far
    pub score: i32,
    pub started_at: DateTime<Utc>,
    pub time_limit_minutes: i32,
    pub state: SessionState,
    pub question_presented_at: DateTime<Utc>,
    /// The current question has an answer and is waiting for `advance`
    pub current_answered: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Append-only; one per answered question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub user_answer: bool,
    pub is_correct: bool,
    pub time_taken_seconds: i32,
    pub question_number: i32,
    pub answered_at: DateTime<Utc>,
}
