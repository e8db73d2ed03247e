//! Gate evaluation for completion and forward navigation
//!
//! Pure and synchronous: the decision is recomputed from in-memory quiz
//! state every time it is asked for, with no network involvement.

use serde::{Deserialize, Serialize};

use crate::quiz::{Quiz, QuizAttempt};

/// Reason given when a quiz gate is not yet satisfied
pub const QUIZ_GATE_REASON: &str = "submit and pass the quiz first";

/// Prerequisite attached to a content unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateRule {
    #[default]
    None,
    MinScore {
        threshold: u32,
        total_questions: u32,
    },
}

impl GateRule {
    pub fn min_score(threshold: u32, total_questions: u32) -> Self {
        GateRule::MinScore {
            threshold,
            total_questions,
        }
    }

    pub fn is_gated(&self) -> bool {
        !matches!(self, GateRule::None)
    }
}

/// Outcome of a gate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Blocked(String),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

/// Decide whether a completion write is permitted for this gate given the
/// latest attempt. The attempt is scored against `quiz`; a gated unit with
/// no answer key can never be completed.
pub fn can_complete(gate: &GateRule, quiz: Option<&Quiz>, attempt: &QuizAttempt) -> GateDecision {
    match gate {
        GateRule::None => GateDecision::Allowed,
        GateRule::MinScore { threshold, .. } => {
            let Some(quiz) = quiz else {
                return GateDecision::Blocked(QUIZ_GATE_REASON.to_string());
            };
            if attempt.submitted && attempt.score(quiz) >= *threshold {
                GateDecision::Allowed
            } else {
                GateDecision::Blocked(QUIZ_GATE_REASON.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::QuizQuestion;

    fn five_question_quiz() -> Quiz {
        Quiz::new(
            (0..5)
                .map(|i| QuizQuestion {
                    id: format!("q{}", i),
                    prompt: String::new(),
                    options: Vec::new(),
                    correct_index: 1,
                })
                .collect(),
        )
    }

    fn attempt_with(correct: usize, submitted: bool) -> QuizAttempt {
        let mut attempt = QuizAttempt::new();
        for i in 0..5 {
            attempt.select(format!("q{}", i), if i < correct { 1 } else { 0 });
        }
        if submitted {
            attempt.submit();
        }
        attempt
    }

    #[test]
    fn test_ungated_always_allowed() {
        assert_eq!(
            can_complete(&GateRule::None, None, &QuizAttempt::new()),
            GateDecision::Allowed
        );
    }

    #[test]
    fn test_min_score_boundary() {
        let quiz = five_question_quiz();
        let gate = GateRule::min_score(4, 5);

        for correct in 0..4 {
            let decision = can_complete(&gate, Some(&quiz), &attempt_with(correct, true));
            assert_eq!(decision, GateDecision::Blocked(QUIZ_GATE_REASON.to_string()));
        }
        assert!(can_complete(&gate, Some(&quiz), &attempt_with(4, true)).is_allowed());
        assert!(can_complete(&gate, Some(&quiz), &attempt_with(5, true)).is_allowed());
    }

    #[test]
    fn test_unsubmitted_attempt_blocked() {
        let quiz = five_question_quiz();
        let gate = GateRule::min_score(4, 5);
        assert!(!can_complete(&gate, Some(&quiz), &attempt_with(5, false)).is_allowed());
    }

    #[test]
    fn test_resubmission_is_scored_from_its_own_answers() {
        let quiz = five_question_quiz();
        let gate = GateRule::min_score(4, 5);

        let mut attempt = attempt_with(3, true);
        assert!(!can_complete(&gate, Some(&quiz), &attempt).is_allowed());

        // Fix one answer; the old submission no longer counts
        attempt.select("q3", 1);
        assert!(!can_complete(&gate, Some(&quiz), &attempt).is_allowed());

        attempt.submit();
        assert!(can_complete(&gate, Some(&quiz), &attempt).is_allowed());

        // Breaking an answer and resubmitting blocks again
        attempt.select("q0", 0);
        attempt.select("q1", 0);
        attempt.submit();
        assert!(!can_complete(&gate, Some(&quiz), &attempt).is_allowed());
    }

    #[test]
    fn test_gated_without_quiz_blocked() {
        let gate = GateRule::min_score(1, 1);
        let mut attempt = QuizAttempt::new();
        attempt.submit();
        assert!(!can_complete(&gate, None, &attempt).is_allowed());
    }

    #[test]
    fn test_gate_rule_toml_shape() {
        #[derive(Deserialize)]
        struct Wrapper {
            gate: GateRule,
        }
        let w: Wrapper =
            toml::from_str("gate = { type = \"min_score\", threshold = 4, total_questions = 5 }")
                .unwrap();
        assert_eq!(w.gate, GateRule::min_score(4, 5));
    }
}
