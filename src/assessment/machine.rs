//! Session state machine
//!
//! `Created -> InProgress -> Completed`. Transitions are plain methods on
//! [`AssessmentSession`] that take the current time; persistence and
//! locking live in the engine.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::scoring::percentage;
use crate::clock;
use crate::error::{EngineError, EngineResult};
use crate::models::{AssessmentSession, SessionState, TestItem};

/// What an accepted answer produced
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAnswer {
    pub item: TestItem,
    pub judgment: bool,
    pub correct: bool,
    pub question_number: i32,
    pub latency_secs: i32,
    /// This was the last question; `advance` finalizes the session
    pub is_final: bool,
}

impl AssessmentSession {
    pub fn start(user_id: Uuid, questions: Vec<TestItem>, time_limit_minutes: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            questions,
            current_question: 1,
            score: 0,
            started_at: now,
            time_limit_minutes,
            state: SessionState::Created,
            question_presented_at: now,
            current_answered: false,
            completed_at: None,
        }
    }

    pub fn total_questions(&self) -> i32 {
        self.questions.len() as i32
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn time_limit(&self) -> Duration {
        Duration::minutes(self.time_limit_minutes as i64)
    }

    pub fn has_timed_out(&self, now: DateTime<Utc>) -> bool {
        clock::is_expired(self.started_at, now, self.time_limit())
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        if self.is_completed() {
            return 0;
        }
        clock::seconds_until_close(self.started_at, now, self.time_limit())
    }

    pub fn current_item(&self) -> Option<&TestItem> {
        if self.is_completed() || self.current_question < 1 {
            return None;
        }
        self.questions.get(self.current_question as usize - 1)
    }

    /// Percentage over the full question count; unanswered questions count as wrong
    pub fn final_score(&self) -> i32 {
        percentage(self.score, self.total_questions())
    }

    fn complete(&mut self, now: DateTime<Utc>) {
        self.state = SessionState::Completed;
        self.completed_at = Some(now);
    }

    /// Force completion once the time limit has passed. Returns `true` only
    /// on the call that performed the transition.
    pub fn expire_if_timed_out(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_completed() || !self.has_timed_out(now) {
            return false;
        }
        self.complete(now);
        true
    }

    fn ensure_open(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        if self.is_completed() {
            return Err(EngineError::SessionCompleted);
        }
        if self.expire_if_timed_out(now) {
            return Err(EngineError::SessionExpired { score: self.final_score() });
        }
        Ok(())
    }

    pub fn apply_answer(&mut self, judgment: bool, now: DateTime<Utc>) -> EngineResult<AppliedAnswer> {
        self.ensure_open(now)?;
        if self.current_answered {
            return Err(EngineError::InvalidTransition("current question already answered"));
        }

        let item = self
            .current_item()
            .cloned()
            .ok_or(EngineError::InvalidTransition("no question to answer"))?;

        let correct = judgment == item.is_phishing;
        if correct {
            self.score += 1;
        }
        self.state = SessionState::InProgress;
        self.current_answered = true;

        Ok(AppliedAnswer {
            judgment,
            correct,
            question_number: self.current_question,
            latency_secs: clock::elapsed_seconds(self.question_presented_at, now),
            is_final: self.current_question == self.total_questions(),
            item,
        })
    }

    pub fn advance(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.ensure_open(now)?;
        if !self.current_answered {
            return Err(EngineError::InvalidTransition("current question not answered"));
        }

        self.current_question += 1;
        self.current_answered = false;

        if self.current_question > self.total_questions() {
            self.complete(now);
        } else {
            self.question_presented_at = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;
    use chrono::TimeZone;

    fn item(is_phishing: bool) -> TestItem {
        TestItem {
            id: Uuid::new_v4(),
            title: "Invoice overdue".to_string(),
            description: None,
            image_url: None,
            category: Some("email".to_string()),
            is_phishing,
            explanation: "Look at the sender domain".to_string(),
            difficulty: Difficulty::Beginner,
            indicators: vec![],
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 10, 14, 0, 0).unwrap()
    }

    fn session(truths: &[bool]) -> AssessmentSession {
        let questions = truths.iter().map(|t| item(*t)).collect();
        AssessmentSession::start(Uuid::new_v4(), questions, 10, t0())
    }

    #[test]
    fn test_first_answer_moves_to_in_progress() {
        let mut s = session(&[true, false]);
        assert_eq!(s.state, SessionState::Created);

        let applied = s.apply_answer(true, t0() + Duration::seconds(7)).unwrap();
        assert!(applied.correct);
        assert_eq!(applied.latency_secs, 7);
        assert_eq!(applied.question_number, 1);
        assert!(!applied.is_final);
        assert_eq!(s.state, SessionState::InProgress);
        assert_eq!(s.score, 1);
    }

    #[test]
    fn test_full_run_completes_on_final_advance() {
        let mut s = session(&[true, false, true]);
        let mut now = t0();

        for (i, truth) in [true, false, true].iter().enumerate() {
            now += Duration::seconds(5);
            let applied = s.apply_answer(*truth, now).unwrap();
            assert_eq!(applied.is_final, i == 2);
            s.advance(now).unwrap();
        }

        assert!(s.is_completed());
        assert_eq!(s.completed_at, Some(now));
        assert_eq!(s.final_score(), 100);
        assert_eq!(s.apply_answer(true, now), Err(EngineError::SessionCompleted));
    }

    #[test]
    fn test_all_wrong_scores_zero() {
        let mut s = session(&[true, true]);
        for _ in 0..2 {
            assert!(!s.apply_answer(false, t0()).unwrap().correct);
            s.advance(t0()).unwrap();
        }
        assert_eq!(s.final_score(), 0);
    }

    #[test]
    fn test_latency_measured_from_presentation() {
        let mut s = session(&[true, true]);
        s.apply_answer(true, t0() + Duration::seconds(20)).unwrap();
        s.advance(t0() + Duration::seconds(25)).unwrap();

        let applied = s.apply_answer(true, t0() + Duration::seconds(28)).unwrap();
        assert_eq!(applied.latency_secs, 3);
    }

    #[test]
    fn test_out_of_order_calls_rejected() {
        let mut s = session(&[true, true]);
        assert!(matches!(s.advance(t0()), Err(EngineError::InvalidTransition(_))));

        s.apply_answer(true, t0()).unwrap();
        assert!(matches!(s.apply_answer(true, t0()), Err(EngineError::InvalidTransition(_))));
        assert_eq!(s.score, 1);
    }

    #[test]
    fn test_timeout_freezes_partial_score() {
        // 4 questions, 10 minute limit, 1 of 2 answered correctly before time runs out
        let mut s = session(&[true, true, false, false]);
        s.apply_answer(true, t0() + Duration::minutes(1)).unwrap();
        s.advance(t0() + Duration::minutes(1)).unwrap();
        s.apply_answer(false, t0() + Duration::minutes(2)).unwrap();
        s.advance(t0() + Duration::minutes(2)).unwrap();

        let late = t0() + Duration::minutes(10) + Duration::seconds(1);
        assert_eq!(s.apply_answer(false, late), Err(EngineError::SessionExpired { score: 25 }));
        assert!(s.is_completed());
        assert_eq!(s.completed_at, Some(late));
        assert_eq!(s.score, 1);
        assert_eq!(s.remaining_seconds(late), 0);
    }

    #[test]
    fn test_expire_is_idempotent() {
        let mut s = session(&[true]);
        let late = t0() + Duration::minutes(11);
        assert!(s.expire_if_timed_out(late));
        assert!(!s.expire_if_timed_out(late + Duration::minutes(1)));
        assert_eq!(s.completed_at, Some(late));
    }

    #[test]
    fn test_exact_limit_is_not_expired() {
        let mut s = session(&[true]);
        assert!(!s.expire_if_timed_out(t0() + Duration::minutes(10)));
        assert!(s.apply_answer(true, t0() + Duration::minutes(10)).is_ok());
    }
}
