//! Security incident model

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::Difficulty;

/// Owner of incidents that are not tied to a signed-in user (login lockouts)
pub const SYSTEM_USER_ID: Uuid = Uuid::nil();

// ============================================================================
// INCIDENT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    PhishingFailure,
    BruteForce,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::PhishingFailure => "phishing_failure",
            IncidentType::BruteForce => "brute_force",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "phishing_failure" => Some(IncidentType::PhishingFailure),
            "brute_force" => Some(IncidentType::BruteForce),
            _ => None,
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Unknown stored values read back as medium, the dashboard's display default
    pub fn parse_or_medium(value: &str) -> Self {
        match value {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIncident {
    pub id: Uuid,
    pub user_id: Uuid,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub geolocation_country: Option<String>,
    pub time_to_decision_seconds: Option<i32>,
    pub missed_iocs: Vec<String>,
    pub raw_event_data: serde_json::Value,
}

/// Everything the recorder needs besides user and type
#[derive(Debug, Clone, Default)]
pub struct IncidentContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub decision_latency_secs: Option<i32>,
    pub missed_indicators: Vec<String>,
    /// Declared difficulty of the item that was missed
    pub difficulty: Option<Difficulty>,
    pub raw: serde_json::Value,
}

/// Network details captured from the calling request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
}

impl IncidentContext {
    pub fn from_origin(origin: &RequestOrigin) -> Self {
        Self {
            ip_address: origin.ip_address.clone(),
            user_agent: origin.user_agent.clone(),
            country: origin.country.clone(),
            ..Default::default()
        }
    }
}

/// Timeline row: an incident with the subject's display name joined in
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    #[serde(flatten)]
    pub incident: SecurityIncident,
    pub user_name: Option<String>,
}
