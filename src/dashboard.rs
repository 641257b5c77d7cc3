//! Read-only views for the admin incident dashboard

use std::sync::Arc;

use serde::Serialize;

use crate::config::RiskConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{SecurityIncident, TimelineEntry};
use crate::risk::{self, DashboardStats, TierDistribution, UserRiskScore};
use crate::store::RecordStore;

/// CSV column headers.
pub const CSV_HEADERS: &[&str] = &[
    "Timestamp",
    "User ID",
    "Incident Type",
    "Severity",
    "IP Address",
    "Decision Time (s)",
    "Missed IoCs",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapRow {
    #[serde(flatten)]
    pub score: UserRiskScore,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heatmap {
    /// Highest risk first
    pub users: Vec<HeatmapRow>,
    pub distribution: TierDistribution,
}

#[derive(Clone)]
pub struct Dashboard {
    store: Arc<dyn RecordStore>,
    risk: RiskConfig,
}

impl Dashboard {
    pub fn new(store: Arc<dyn RecordStore>, risk: RiskConfig) -> Self {
        Self { store, risk }
    }

    /// Most recent incidents with the subject's display name
    pub async fn timeline(&self, limit: i64) -> EngineResult<Vec<TimelineEntry>> {
        let incidents = self.store.list_incidents(Some(limit)).await?;

        let mut user_ids: Vec<_> = incidents.iter().map(|i| i.user_id).collect();
        user_ids.sort();
        user_ids.dedup();
        let names = self.store.display_names(&user_ids).await?;

        Ok(incidents
            .into_iter()
            .map(|incident| TimelineEntry {
                user_name: names.get(&incident.user_id).cloned(),
                incident,
            })
            .collect())
    }

    pub async fn heatmap(&self) -> EngineResult<Heatmap> {
        let incidents = self.store.list_incidents(None).await?;
        let mut scores = risk::compute_risk_scores(&incidents, &self.risk);
        // stable: equal scores keep first-seen order
        scores.sort_by(|a, b| b.risk_score.cmp(&a.risk_score));

        let user_ids: Vec<_> = scores.iter().map(|s| s.user_id).collect();
        let mut names = self.store.display_names(&user_ids).await?;

        Ok(Heatmap {
            distribution: TierDistribution::of(&scores),
            users: scores
                .into_iter()
                .map(|score| HeatmapRow {
                    full_name: names.remove(&score.user_id),
                    score,
                })
                .collect(),
        })
    }

    pub async fn stats(&self) -> EngineResult<DashboardStats> {
        let incidents = self.store.list_incidents(None).await?;
        let scores = risk::compute_risk_scores(&incidents, &self.risk);
        Ok(DashboardStats::compute(&incidents, &scores))
    }

    /// Every incident, newest first, as CSV
    pub async fn export_csv(&self) -> EngineResult<String> {
        let incidents = self.store.list_incidents(None).await?;
        render_csv(&incidents)
    }
}

fn render_csv(incidents: &[SecurityIncident]) -> EngineResult<String> {
    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    wtr.write_record(CSV_HEADERS).map_err(export_failed)?;

    for incident in incidents {
        let latency = incident
            .time_to_decision_seconds
            .map(|s| s.to_string())
            .unwrap_or_default();
        wtr.write_record([
            incident.timestamp.to_rfc3339().as_str(),
            incident.user_id.to_string().as_str(),
            incident.incident_type.as_str(),
            incident.severity.as_str(),
            incident.ip_address.as_deref().unwrap_or(""),
            latency.as_str(),
            incident.missed_iocs.join(";").as_str(),
        ])
        .map_err(export_failed)?;
    }

    let bytes = wtr.into_inner().map_err(export_failed)?;
    String::from_utf8(bytes).map_err(export_failed)
}

fn export_failed(err: impl std::fmt::Display) -> EngineError {
    EngineError::ExportFailed(err.to_string())
}
