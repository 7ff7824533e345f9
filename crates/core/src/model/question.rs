use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::model::ids::QuestionId;
use crate::model::selection::{Difficulty, ExamProfile, SelectionKey};

/// Every question is multiple choice with exactly this many options.
pub const OPTION_COUNT: usize = 4;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuestionError {
    #[error("question text cannot be empty")]
    EmptyText,
    #[error("expected {OPTION_COUNT} options, got {0}")]
    WrongOptionCount(usize),
    #[error("option {0} is empty")]
    EmptyOption(usize),
    #[error("correct option index {0} is out of range")]
    CorrectIndexOutOfRange(usize),
    #[error("pattern tag must be lowercase kebab-case: {0:?}")]
    InvalidPatternTag(String),
}

//
// ─── PATTERN TAG ──────────────────────────────────────────────────────────────
//

/// Groups questions that share the same fastest-safe solution method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternTag(String);

impl PatternTag {
    /// # Errors
    ///
    /// Returns `QuestionError::InvalidPatternTag` unless the tag matches
    /// `^[a-z0-9]+(-[a-z0-9]+)*$`.
    pub fn new(raw: impl Into<String>) -> Result<Self, QuestionError> {
        let raw = raw.into();
        let well_formed = raw.split('-').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        });
        if well_formed {
            Ok(Self(raw))
        } else {
            Err(QuestionError::InvalidPatternTag(raw))
        }
    }

    /// Tag used for questions that were authored without one.
    #[must_use]
    pub fn fallback_for(subtopic: &str) -> Self {
        Self(format!("{subtopic}-default"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//
// ─── OPTIMAL PATH ─────────────────────────────────────────────────────────────
//

/// The "fastest safe method" for a question, shown during reinforcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimalPath {
    pub exists: bool,
    pub preconditions: Option<String>,
    pub steps: Vec<String>,
    pub sanity_check: Option<String>,
}

//
// ─── DRAFT ────────────────────────────────────────────────────────────────────
//

/// Unvalidated question as produced by an authoring backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionDraft {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
    /// Target solve time in seconds, per exam profile.
    pub time_targets: BTreeMap<ExamProfile, u32>,
    pub optimal_path: OptimalPath,
    pub solution_steps: Vec<String>,
    pub pattern_tag: Option<String>,
}

impl QuestionDraft {
    /// Validate the draft and bind it to an id and a practice context.
    ///
    /// A missing pattern tag falls back to `"{subtopic}-default"`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` when text, options, the correct index, or the pattern
    /// tag are malformed.
    pub fn validate(self, id: QuestionId, key: &SelectionKey) -> Result<Question, QuestionError> {
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(QuestionError::EmptyText);
        }

        let count = self.options.len();
        let options: [String; OPTION_COUNT] = self
            .options
            .try_into()
            .map_err(|_| QuestionError::WrongOptionCount(count))?;
        if let Some(pos) = options.iter().position(|o| o.trim().is_empty()) {
            return Err(QuestionError::EmptyOption(pos));
        }
        if self.correct_option_index >= OPTION_COUNT {
            return Err(QuestionError::CorrectIndexOutOfRange(self.correct_option_index));
        }

        let pattern_tag = match self.pattern_tag {
            Some(tag) if !tag.trim().is_empty() => PatternTag::new(tag.trim())?,
            _ => PatternTag::fallback_for(key.subtopic()),
        };

        Ok(Question {
            id,
            exam_profile: key.exam_profile(),
            topic: key.topic().to_string(),
            subtopic: key.subtopic().to_string(),
            difficulty: key.difficulty(),
            text,
            options,
            correct_option_index: self.correct_option_index,
            time_targets: self.time_targets,
            optimal_path: self.optimal_path,
            solution_steps: self.solution_steps,
            pattern_tag,
        })
    }
}

//
// ─── QUESTION ─────────────────────────────────────────────────────────────────
//

/// Immutable practice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    exam_profile: ExamProfile,
    topic: String,
    subtopic: String,
    difficulty: Difficulty,
    text: String,
    options: [String; OPTION_COUNT],
    correct_option_index: usize,
    time_targets: BTreeMap<ExamProfile, u32>,
    optimal_path: OptimalPath,
    solution_steps: Vec<String>,
    pattern_tag: PatternTag,
}

impl Question {
    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn exam_profile(&self) -> ExamProfile {
        self.exam_profile
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn subtopic(&self) -> &str {
        &self.subtopic
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn options(&self) -> &[String; OPTION_COUNT] {
        &self.options
    }

    #[must_use]
    pub fn correct_option_index(&self) -> usize {
        self.correct_option_index
    }

    #[must_use]
    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct_option_index
    }

    #[must_use]
    pub fn time_targets(&self) -> &BTreeMap<ExamProfile, u32> {
        &self.time_targets
    }

    /// Target solve time for the given profile, if the question defines one.
    #[must_use]
    pub fn target_time(&self, profile: ExamProfile) -> Option<Duration> {
        self.time_targets
            .get(&profile)
            .filter(|secs| **secs > 0)
            .map(|secs| Duration::from_secs(u64::from(*secs)))
    }

    #[must_use]
    pub fn optimal_path(&self) -> &OptimalPath {
        &self.optimal_path
    }

    #[must_use]
    pub fn solution_steps(&self) -> &[String] {
        &self.solution_steps
    }

    #[must_use]
    pub fn pattern_tag(&self) -> &PatternTag {
        &self.pattern_tag
    }

    /// The practice context this question belongs to.
    #[must_use]
    pub fn selection_key(&self) -> SelectionKey {
        SelectionKey::from_canonical(
            self.exam_profile,
            self.topic.clone(),
            self.subtopic.clone(),
            self.difficulty,
        )
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
