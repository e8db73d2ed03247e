//! Quiz answer keys and in-page attempts
//!
//! Attempts live only in page memory. The score is derived from the answers
//! against the quiz's answer key; nothing here is persisted remotely.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One multiple-choice question with its correct option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_index: usize,
}

/// Answer key for a gated unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
}

impl Quiz {
    pub fn new(questions: Vec<QuizQuestion>) -> Self {
        Self { questions }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn question(&self, id: &str) -> Option<&QuizQuestion> {
        self.questions.iter().find(|q| q.id == id)
    }
}

/// A learner's answers on the current page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuizAttempt {
    pub answers: BTreeMap<String, usize>,
    pub submitted: bool,
}

impl QuizAttempt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose an option. Editing a submitted attempt withdraws the
    /// submission, so it has to be submitted (and scored) again.
    pub fn select(&mut self, question_id: impl Into<String>, option_index: usize) {
        let question_id = question_id.into();
        if self.answers.get(&question_id) != Some(&option_index) {
            self.submitted = false;
        }
        self.answers.insert(question_id, option_index);
    }

    pub fn submit(&mut self) {
        self.submitted = true;
    }

    pub fn reset(&mut self) {
        self.answers.clear();
        self.submitted = false;
    }

    /// Number of answers matching the correct option
    pub fn score(&self, quiz: &Quiz) -> u32 {
        quiz.questions
            .iter()
            .filter(|q| self.answers.get(&q.id) == Some(&q.correct_index))
            .count() as u32
    }

    pub fn answered(&self) -> usize {
        self.answers.len()
    }
}

/// Quiz sub-state of a gated page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuizState {
    NotAttempted,
    Submitted { passed: bool, score: u32 },
}
