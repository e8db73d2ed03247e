//! Course catalog: content unit keys, unit metadata and forward routing
//!
//! The catalog is inert content. It is read from TOML and never mutated by
//! the progress core.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::completion::CompletionRecord;
use crate::error::ProgressError;
use crate::gating::GateRule;
use crate::quiz::Quiz;

/// Stable identifier of one trackable lesson, conventionally
/// `"<course>:<week>:<unit>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentUnitKey(String);

impl ContentUnitKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ProgressError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ProgressError::InvalidInput("content unit key is empty".into()));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a namespaced key into `(course, week, unit)`
    pub fn parts(&self) -> Option<(&str, &str, &str)> {
        let mut it = self.0.splitn(3, ':');
        match (it.next(), it.next(), it.next()) {
            (Some(course), Some(week), Some(unit))
                if !course.is_empty() && !week.is_empty() && !unit.is_empty() =>
            {
                Some((course, week, unit))
            }
            _ => None,
        }
    }

    pub fn course(&self) -> Option<&str> {
        self.parts().map(|(course, _, _)| course)
    }
}

impl TryFrom<String> for ContentUnitKey {
    type Error = ProgressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentUnitKey> for String {
    fn from(key: ContentUnitKey) -> Self {
        key.0
    }
}

impl fmt::Display for ContentUnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table-of-contents entry on a lesson page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocSection {
    pub id: String,
    pub label: String,
    pub order: u32,
}

impl TocSection {
    pub fn new(id: impl Into<String>, label: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            order,
        }
    }
}

/// One trackable lesson page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub key: ContentUnitKey,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub gate: GateRule,
    #[serde(default)]
    pub quiz: Option<Quiz>,
    #[serde(default)]
    pub sections: Vec<TocSection>,
    /// Explicit next unit; otherwise catalog order decides
    #[serde(default)]
    pub next: Option<ContentUnitKey>,
}

impl ContentUnit {
    pub fn ungated(key: ContentUnitKey, title: impl Into<String>) -> Self {
        Self {
            key,
            title: title.into(),
            gate: GateRule::None,
            quiz: None,
            sections: Vec::new(),
            next: None,
        }
    }

    pub fn with_quiz(mut self, gate: GateRule, quiz: Quiz) -> Self {
        self.gate = gate;
        self.quiz = Some(quiz);
        self
    }

    pub fn with_sections(mut self, sections: Vec<TocSection>) -> Self {
        self.sections = sections;
        self
    }

    pub fn with_next(mut self, next: ContentUnitKey) -> Self {
        self.next = Some(next);
        self
    }
}

/// Completion summary across a course
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseProgress {
    pub course_id: String,
    pub total_units: usize,
    pub completed_units: usize,
    pub percent: f32,
    /// First unit in catalog order not yet completed
    pub next_incomplete: Option<ContentUnitKey>,
}

/// Ordered list of units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub units: Vec<ContentUnit>,
}

impl Course {
    pub fn new(id: impl Into<String>, title: impl Into<String>, units: Vec<ContentUnit>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            units,
        }
    }

    /// Load a catalog from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProgressError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ProgressError> {
        let course: Course = toml::from_str(content)
            .map_err(|e| ProgressError::Config(format!("Invalid course catalog: {}", e)))?;
        course.validate()?;
        Ok(course)
    }

    fn validate(&self) -> Result<(), ProgressError> {
        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert(&unit.key) {
                return Err(ProgressError::Config(format!("Duplicate unit key: {}", unit.key)));
            }
            if let GateRule::MinScore { threshold, total_questions } = unit.gate {
                let quiz_len = unit.quiz.as_ref().map(Quiz::len).unwrap_or(0);
                if quiz_len == 0 {
                    return Err(ProgressError::Config(format!(
                        "Unit {} is gated on a quiz but has no questions",
                        unit.key
                    )));
                }
                if threshold > total_questions || quiz_len as u32 != total_questions {
                    return Err(ProgressError::Config(format!(
                        "Unit {} gate {}/{} does not match its {} questions",
                        unit.key, threshold, total_questions, quiz_len
                    )));
                }
            }
        }
        for unit in &self.units {
            if let Some(ref next) = unit.next {
                if self.unit(next).is_none() {
                    return Err(ProgressError::Config(format!(
                        "Unit {} routes to unknown unit {}",
                        unit.key, next
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn unit(&self, key: &ContentUnitKey) -> Option<&ContentUnit> {
        self.units.iter().find(|u| &u.key == key)
    }

    /// Unit that follows `key`, or None at the end of the course
    pub fn next_unit(&self, key: &ContentUnitKey) -> Option<&ContentUnit> {
        let pos = self.units.iter().position(|u| &u.key == key)?;
        match self.units[pos].next {
            Some(ref next) => self.unit(next),
            None => self.units.get(pos + 1),
        }
    }

    pub fn unit_keys(&self) -> Vec<ContentUnitKey> {
        self.units.iter().map(|u| u.key.clone()).collect()
    }

    /// Summarise completion across the catalog
    pub fn progress(&self, records: &[CompletionRecord]) -> CourseProgress {
        let done: HashSet<&ContentUnitKey> = records
            .iter()
            .filter(|r| r.completed)
            .map(|r| &r.unit_key)
            .collect();

        let completed_units = self.units.iter().filter(|u| done.contains(&u.key)).count();
        let total_units = self.units.len();
        let percent = if total_units == 0 {
            0.0
        } else {
            completed_units as f32 * 100.0 / total_units as f32
        };

        CourseProgress {
            course_id: self.id.clone(),
            total_units,
            completed_units,
            percent,
            next_incomplete: self
                .units
                .iter()
                .find(|u| !done.contains(&u.key))
                .map(|u| u.key.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LearnerId;

    const CATALOG: &str = r#"
id = "ethics"
title = "AI Ethics"

[[units]]
key = "ethics:week1:intro"
title = "Introduction"
sections = [
  { id = "why", label = "Why it matters", order = 0 },
  { id = "history", label = "History", order = 1 },
]

[[units]]
key = "ethics:week1:privacy"
title = "Privacy"

[[units]]
key = "ethics:week1:quiz"
title = "Week 1 quiz"
gate = { type = "min_score", threshold = 1, total_questions = 2 }
next = "ethics:week2:bias"

[units.quiz]
questions = [
  { id = "q1", prompt = "Which is PII?", options = ["email", "weather"], correct_index = 0 },
  { id = "q2", prompt = "Consent is...", options = ["optional", "required"], correct_index = 1 },
]

[[units]]
key = "ethics:week2:extra"

[[units]]
key = "ethics:week2:bias"
title = "Bias"
"#;

    fn key(s: &str) -> ContentUnitKey {
        ContentUnitKey::new(s).unwrap()
    }

    #[test]
    fn test_key_parts() {
        assert_eq!(key("ethics:week1:privacy").parts(), Some(("ethics", "week1", "privacy")));
        assert_eq!(key("ethics:week1:privacy").course(), Some("ethics"));
        assert_eq!(key("standalone").parts(), None);
        assert!(ContentUnitKey::new("  ").is_err());
    }

    #[test]
    fn test_load_catalog() {
        let course = Course::from_toml(CATALOG).unwrap();
        assert_eq!(course.units.len(), 5);

        let intro = course.unit(&key("ethics:week1:intro")).unwrap();
        assert_eq!(intro.sections.len(), 2);
        assert_eq!(intro.gate, GateRule::None);

        let quiz = course.unit(&key("ethics:week1:quiz")).unwrap();
        assert_eq!(quiz.gate, GateRule::min_score(1, 2));
        assert_eq!(quiz.quiz.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_next_unit_routing() {
        let course = Course::from_toml(CATALOG).unwrap();
        assert_eq!(
            course.next_unit(&key("ethics:week1:intro")).map(|u| u.key.clone()),
            Some(key("ethics:week1:privacy"))
        );
        // Explicit `next` skips the catalog neighbour
        assert_eq!(
            course.next_unit(&key("ethics:week1:quiz")).map(|u| u.key.clone()),
            Some(key("ethics:week2:bias"))
        );
        assert!(course.next_unit(&key("ethics:week2:bias")).is_none());
        assert!(course.next_unit(&key("ethics:week9:missing")).is_none());
    }

    #[test]
    fn test_rejects_bad_catalogs() {
        let dup = "id = \"c\"\n[[units]]\nkey = \"c:w:a\"\n[[units]]\nkey = \"c:w:a\"\n";
        assert!(matches!(Course::from_toml(dup), Err(ProgressError::Config(_))));

        let gated_no_quiz = "id = \"c\"\n[[units]]\nkey = \"c:w:a\"\ngate = { type = \"min_score\", threshold = 1, total_questions = 1 }\n";
        assert!(Course::from_toml(gated_no_quiz).is_err());

        let dangling = "id = \"c\"\n[[units]]\nkey = \"c:w:a\"\nnext = \"c:w:z\"\n";
        assert!(Course::from_toml(dangling).is_err());

        let empty_key = "id = \"c\"\n[[units]]\nkey = \"\"\n";
        assert!(Course::from_toml(empty_key).is_err());
    }

    #[test]
    fn test_progress_summary() {
        let course = Course::from_toml(CATALOG).unwrap();
        let learner = LearnerId::new("u1");
        let records = vec![
            CompletionRecord::completed_now(learner.clone(), key("ethics:week1:intro")),
            CompletionRecord::completed_now(learner.clone(), key("ethics:week1:privacy")),
            CompletionRecord::completed_now(learner, key("other:week1:x")),
        ];

        let progress = course.progress(&records);
        assert_eq!(progress.total_units, 5);
        assert_eq!(progress.completed_units, 2);
        assert!((progress.percent - 40.0).abs() < 0.01);
        assert_eq!(progress.next_incomplete, Some(key("ethics:week1:quiz")));
    }
}
