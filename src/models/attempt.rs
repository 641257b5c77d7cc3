//! Login attempt window model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Endpoint key for the login guard
pub const LOGIN_ENDPOINT: &str = "auth";

/// Failed attempts from one identifier against one endpoint in one window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AttemptWindow {
    pub id: Uuid,
    pub ip_address: String,
    pub endpoint: String,
    pub attempt_count: i32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}
