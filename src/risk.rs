//! Per-user risk scoring over the incident history
//!
//! Pure functions: callers pass a snapshot of incidents, nothing here reads
//! the store. A stale snapshot is fine.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::config::RiskConfig;
use crate::models::{IncidentType, SecurityIncident};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s > 80 => RiskTier::Critical,
            s if s > 60 => RiskTier::High,
            s if s > 30 => RiskTier::Medium,
            _ => RiskTier::Low,
        }
    }

    pub fn is_at_risk(&self) -> bool {
        matches!(self, RiskTier::High | RiskTier::Critical)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRiskScore {
    pub user_id: Uuid,
    pub total_incidents: u32,
    pub phishing_failures: u32,
    /// Seconds; the configured default when no incident carried a latency
    pub avg_decision_time: f64,
    pub risk_score: i32,
    pub risk_tier: RiskTier,
}

/// Users per tier across the organization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierDistribution {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl TierDistribution {
    pub fn of(scores: &[UserRiskScore]) -> Self {
        let mut dist = Self::default();
        for score in scores {
            match score.risk_tier {
                RiskTier::Critical => dist.critical += 1,
                RiskTier::High => dist.high += 1,
                RiskTier::Medium => dist.medium += 1,
                RiskTier::Low => dist.low += 1,
            }
        }
        dist
    }
}

#[derive(Default)]
struct Tally {
    incidents: u32,
    failures: u32,
    total_latency: i64,
    latency_count: u32,
}

/// `clamp(0, 100, base + weight * failures + fast-decision penalty)`
pub fn score(failures: u32, avg_latency_secs: f64, config: &RiskConfig) -> i32 {
    let penalty = if avg_latency_secs < config.fast_decision_secs {
        config.fast_decision_penalty
    } else {
        0
    };
    let raw = config.base_score + config.failure_weight * failures as i64 + penalty;
    raw.clamp(0, 100) as i32
}

/// One score per user appearing in `incidents`, in first-seen order
pub fn compute_risk_scores(incidents: &[SecurityIncident], config: &RiskConfig) -> Vec<UserRiskScore> {
    let mut order = Vec::new();
    let mut tallies: HashMap<Uuid, Tally> = HashMap::new();

    for incident in incidents {
        let tally = tallies.entry(incident.user_id).or_insert_with(|| {
            order.push(incident.user_id);
            Tally::default()
        });
        tally.incidents += 1;
        if incident.incident_type == IncidentType::PhishingFailure {
            tally.failures += 1;
        }
        if let Some(latency) = incident.time_to_decision_seconds {
            tally.total_latency += latency as i64;
            tally.latency_count += 1;
        }
    }

    order
        .into_iter()
        .filter_map(|user_id| {
            let tally = tallies.remove(&user_id)?;
            let avg_decision_time = if tally.latency_count > 0 {
                tally.total_latency as f64 / tally.latency_count as f64
            } else {
                config.default_latency_secs
            };
            let risk_score = score(tally.failures, avg_decision_time, config);

            Some(UserRiskScore {
                user_id,
                total_incidents: tally.incidents,
                phishing_failures: tally.failures,
                avg_decision_time,
                risk_score,
                risk_tier: RiskTier::from_score(risk_score),
            })
        })
        .collect()
}

/// Headline numbers for the incident dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_incidents: u32,
    /// Severity high or critical
    pub critical_incidents: u32,
    /// Users in the high or critical tier
    pub users_at_risk: u32,
    /// Rounded seconds; incidents without a latency count as 0
    pub avg_decision_time: i64,
}

impl DashboardStats {
    pub fn compute(incidents: &[SecurityIncident], scores: &[UserRiskScore]) -> Self {
        let total = incidents.len() as u32;
        let total_latency: i64 = incidents
            .iter()
            .map(|i| i.time_to_decision_seconds.unwrap_or(0) as i64)
            .sum();

        Self {
            total_incidents: total,
            critical_incidents: incidents.iter().filter(|i| i.severity.is_high()).count() as u32,
            users_at_risk: scores.iter().filter(|s| s.risk_tier.is_at_risk()).count() as u32,
            avg_decision_time: (total_latency as f64 / total.max(1) as f64).round() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use chrono::Utc;
    use serde_json::Value;

    fn incident(user_id: Uuid, incident_type: IncidentType, latency: Option<i32>) -> SecurityIncident {
        SecurityIncident {
            id: Uuid::new_v4(),
            user_id,
            incident_type,
            severity: Severity::Medium,
            timestamp: Utc::now(),
            ip_address: None,
            user_agent: None,
            geolocation_country: None,
            time_to_decision_seconds: latency,
            missed_iocs: vec![],
            raw_event_data: Value::Null,
        }
    }

    fn failures(user_id: Uuid, count: usize, latency: i32) -> Vec<SecurityIncident> {
        (0..count)
            .map(|_| incident(user_id, IncidentType::PhishingFailure, Some(latency)))
            .collect()
    }

    #[test]
    fn test_tier_boundaries_are_exact() {
        assert_eq!(RiskTier::from_score(100), RiskTier::Critical);
        assert_eq!(RiskTier::from_score(81), RiskTier::Critical);
        assert_eq!(RiskTier::from_score(80), RiskTier::High);
        assert_eq!(RiskTier::from_score(61), RiskTier::High);
        assert_eq!(RiskTier::from_score(60), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(31), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(30), RiskTier::Low);
        assert_eq!(RiskTier::from_score(0), RiskTier::Low);
    }

    #[test]
    fn test_three_failures_at_five_seconds_is_high() {
        let user = Uuid::new_v4();
        let scores = compute_risk_scores(&failures(user, 3, 5), &RiskConfig::default());

        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].risk_score, 80);
        assert_eq!(scores[0].risk_tier, RiskTier::High);
        assert_eq!(scores[0].avg_decision_time, 5.0);
    }

    #[test]
    fn test_fast_decisions_add_penalty() {
        let user = Uuid::new_v4();
        let scores = compute_risk_scores(&failures(user, 3, 2), &RiskConfig::default());

        assert_eq!(scores[0].risk_score, 95);
        assert_eq!(scores[0].risk_tier, RiskTier::Critical);
    }

    #[test]
    fn test_missing_latency_uses_neutral_default() {
        let user = Uuid::new_v4();
        let incidents = vec![incident(user, IncidentType::BruteForce, None)];
        let scores = compute_risk_scores(&incidents, &RiskConfig::default());

        assert_eq!(scores[0].avg_decision_time, 10.0);
        assert_eq!(scores[0].phishing_failures, 0);
        assert_eq!(scores[0].total_incidents, 1);
        assert_eq!(scores[0].risk_score, 50);
        assert_eq!(scores[0].risk_tier, RiskTier::Medium);
    }

    #[test]
    fn test_score_is_clamped() {
        let user = Uuid::new_v4();
        let scores = compute_risk_scores(&failures(user, 12, 1), &RiskConfig::default());
        assert_eq!(scores[0].risk_score, 100);
    }

    #[test]
    fn test_extra_failure_never_lowers_score() {
        let config = RiskConfig::default();
        let user = Uuid::new_v4();

        for latency in [0, 1, 2, 3, 4, 10, 60] {
            let mut incidents = vec![incident(user, IncidentType::BruteForce, None)];
            let mut previous = compute_risk_scores(&incidents, &config)[0].risk_score;

            for _ in 0..8 {
                incidents.push(incident(user, IncidentType::PhishingFailure, None));
                // latency-free failures keep the average fixed
                if latency > 0 {
                    incidents[0].time_to_decision_seconds = Some(latency);
                }
                let current = compute_risk_scores(&incidents, &config)[0].risk_score;
                assert!(current >= previous, "latency {}: {} < {}", latency, current, previous);
                previous = current;
            }
        }
    }

    #[test]
    fn test_users_scored_independently() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut incidents = failures(a, 4, 8);
        incidents.extend(failures(b, 1, 8));

        let scores = compute_risk_scores(&incidents, &RiskConfig::default());
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].user_id, a);
        assert_eq!(scores[0].risk_score, 90);
        assert_eq!(scores[1].user_id, b);
        assert_eq!(scores[1].risk_score, 60);

        let dist = TierDistribution::of(&scores);
        assert_eq!(dist, TierDistribution { critical: 1, high: 0, medium: 1, low: 0 });
    }

    #[test]
    fn test_configured_thresholds_apply() {
        let config = RiskConfig {
            fast_decision_secs: 6.0,
            ..RiskConfig::default()
        };
        assert_eq!(score(0, 5.0, &config), 65);
        assert_eq!(score(0, 6.0, &config), 50);
    }

    #[test]
    fn test_stats_average_counts_missing_latency_as_zero() {
        let user = Uuid::new_v4();
        let mut incidents = vec![
            incident(user, IncidentType::PhishingFailure, Some(4)),
            incident(user, IncidentType::PhishingFailure, Some(5)),
            incident(user, IncidentType::BruteForce, None),
        ];
        incidents[2].severity = Severity::High;

        let scores = compute_risk_scores(&incidents, &RiskConfig::default());
        let stats = DashboardStats::compute(&incidents, &scores);

        assert_eq!(stats.total_incidents, 3);
        assert_eq!(stats.critical_incidents, 1);
        assert_eq!(stats.users_at_risk, 1);
        // (4 + 5 + 0) / 3
        assert_eq!(stats.avg_decision_time, 3);
    }

    #[test]
    fn test_stats_on_empty_history() {
        let stats = DashboardStats::compute(&[], &[]);
        assert_eq!(
            stats,
            DashboardStats { total_incidents: 0, critical_incidents: 0, users_at_risk: 0, avg_decision_time: 0 }
        );
    }
}
