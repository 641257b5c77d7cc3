//! Session scoring and performance bands

use serde::Serialize;

/// `round(100 * correct / total)`, 0 for an empty session
pub fn percentage(correct: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    let pct = (100.0 * correct as f64 / total as f64).round() as i32;
    pct.clamp(0, 100)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PerformanceLevel {
    Expert,
    Advanced,
    Good,
    Fair,
    #[serde(rename = "Needs Improvement")]
    NeedsImprovement,
}

impl PerformanceLevel {
    pub fn from_percentage(pct: i32) -> Self {
        match pct {
            p if p >= 90 => PerformanceLevel::Expert,
            p if p >= 80 => PerformanceLevel::Advanced,
            p if p >= 70 => PerformanceLevel::Good,
            p if p >= 60 => PerformanceLevel::Fair,
            _ => PerformanceLevel::NeedsImprovement,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PerformanceLevel::Expert => "Outstanding! You're excellent at identifying phishing attempts.",
            PerformanceLevel::Advanced => "Great job! You have strong phishing detection skills.",
            PerformanceLevel::Good => "Good work! You're getting better at spotting threats.",
            PerformanceLevel::Fair => "Not bad! Keep practicing to improve your skills.",
            PerformanceLevel::NeedsImprovement => {
                "Keep learning! Consider reviewing phishing awareness materials."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounds_half_up() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(0, 5), 0);
        assert_eq!(percentage(5, 5), 100);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn test_percentage_bounded_for_every_split() {
        for total in 1..=25 {
            for correct in 0..=total {
                let pct = percentage(correct, total);
                assert!((0..=100).contains(&pct), "{}/{} gave {}", correct, total, pct);
            }
        }
    }

    #[test]
    fn test_performance_bands() {
        assert_eq!(PerformanceLevel::from_percentage(100), PerformanceLevel::Expert);
        assert_eq!(PerformanceLevel::from_percentage(90), PerformanceLevel::Expert);
        assert_eq!(PerformanceLevel::from_percentage(89), PerformanceLevel::Advanced);
        assert_eq!(PerformanceLevel::from_percentage(70), PerformanceLevel::Good);
        assert_eq!(PerformanceLevel::from_percentage(60), PerformanceLevel::Fair);
        assert_eq!(PerformanceLevel::from_percentage(59), PerformanceLevel::NeedsImprovement);
    }
}
