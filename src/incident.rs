//! Incident recorder
//!
//! Turns a missed phishing cue or a login lockout into a `SecurityIncident`.
//! Recording is best-effort: a store failure is logged and swallowed so the
//! answer submission or login check that triggered it still completes.

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{Difficulty, IncidentContext, IncidentType, SecurityIncident, Severity};
use crate::store::RecordStore;

/// Severity for a new incident.
///
/// Missing an advanced cue is a stronger signal than missing a beginner one.
pub fn classify(incident_type: IncidentType, difficulty: Option<Difficulty>) -> Severity {
    match incident_type {
        IncidentType::PhishingFailure if difficulty == Some(Difficulty::Advanced) => Severity::High,
        IncidentType::PhishingFailure => Severity::Medium,
        IncidentType::BruteForce => Severity::High,
    }
}

#[derive(Clone)]
pub struct IncidentRecorder {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl IncidentRecorder {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append an incident. Returns `None` when the write failed.
    pub async fn record(
        &self,
        user_id: Uuid,
        incident_type: IncidentType,
        context: IncidentContext,
    ) -> Option<Uuid> {
        let incident = SecurityIncident {
            id: Uuid::new_v4(),
            user_id,
            incident_type,
            severity: classify(incident_type, context.difficulty),
            timestamp: self.clock.now(),
            ip_address: context.ip_address,
            user_agent: context.user_agent,
            geolocation_country: context.country,
            time_to_decision_seconds: context.decision_latency_secs,
            missed_iocs: context.missed_indicators,
            raw_event_data: context.raw,
        };

        match self.store.insert_incident(&incident).await {
            Ok(()) => {
                tracing::info!(
                    incident_id = %incident.id,
                    user_id = %user_id,
                    severity = %incident.severity,
                    "Recorded {} incident",
                    incident_type
                );
                Some(incident.id)
            }
            Err(err) => {
                tracing::error!(
                    user_id = %user_id,
                    error = %err,
                    "Failed to record {} incident",
                    incident_type
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryStore;

    #[test]
    fn test_severity_rules() {
        assert_eq!(classify(IncidentType::PhishingFailure, Some(Difficulty::Advanced)), Severity::High);
        assert_eq!(classify(IncidentType::PhishingFailure, Some(Difficulty::Intermediate)), Severity::Medium);
        assert_eq!(classify(IncidentType::PhishingFailure, None), Severity::Medium);
        assert_eq!(classify(IncidentType::BruteForce, None), Severity::High);
        assert_eq!(classify(IncidentType::BruteForce, Some(Difficulty::Beginner)), Severity::High);
    }

    #[tokio::test]
    async fn test_record_appends_incident() {
        let store = Arc::new(MemoryStore::new());
        let recorder = IncidentRecorder::new(store.clone(), Arc::new(SystemClock));
        let user = Uuid::new_v4();

        let context = IncidentContext {
            decision_latency_secs: Some(4),
            missed_indicators: vec!["spoofed_sender".to_string()],
            difficulty: Some(Difficulty::Advanced),
            ..Default::default()
        };
        let id = recorder.record(user, IncidentType::PhishingFailure, context).await;
        assert!(id.is_some());

        let incidents = store.list_incidents(None).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].id, id.unwrap());
        assert_eq!(incidents[0].severity, Severity::High);
        assert_eq!(incidents[0].missed_iocs, vec!["spoofed_sender".to_string()]);
        assert_eq!(incidents[0].time_to_decision_seconds, Some(4));
    }

    #[tokio::test]
    async fn test_record_swallows_store_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_incidents_unavailable(true);
        let recorder = IncidentRecorder::new(store.clone(), Arc::new(SystemClock));

        let id = recorder
            .record(Uuid::new_v4(), IncidentType::BruteForce, IncidentContext::default())
            .await;
        assert!(id.is_none());
    }
}
