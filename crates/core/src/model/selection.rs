use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("unknown exam profile: {0}")]
    UnknownExamProfile(String),
    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),
    #[error("topic cannot be empty")]
    EmptyTopic,
    #[error("subtopic cannot be empty")]
    EmptySubtopic,
}

//
// ─── EXAM PROFILE ─────────────────────────────────────────────────────────────
//

/// Entrance exam a learner is preparing for.
///
/// Each profile carries its own per-question time budget; questions may override it
/// through their time targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamProfile {
    JeeMain,
    JeeAdvanced,
    Cat,
    Eamcet,
    MhtCet,
    Wbjee,
    Kcet,
    Gujcet,
    Keam,
}

/// Fallback per-question time budget when neither question nor profile define one.
pub const FALLBACK_TIME_LIMIT_SECS: u32 = 45;

impl ExamProfile {
    pub const ALL: [ExamProfile; 9] = [
        ExamProfile::JeeMain,
        ExamProfile::JeeAdvanced,
        ExamProfile::Cat,
        ExamProfile::Eamcet,
        ExamProfile::MhtCet,
        ExamProfile::Wbjee,
        ExamProfile::Kcet,
        ExamProfile::Gujcet,
        ExamProfile::Keam,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExamProfile::JeeMain => "jee_main",
            ExamProfile::JeeAdvanced => "jee_advanced",
            ExamProfile::Cat => "cat",
            ExamProfile::Eamcet => "eamcet",
            ExamProfile::MhtCet => "mht_cet",
            ExamProfile::Wbjee => "wbjee",
            ExamProfile::Kcet => "kcet",
            ExamProfile::Gujcet => "gujcet",
            ExamProfile::Keam => "keam",
        }
    }

    /// Per-question time limit used by timed sessions when a question has no
    /// target for this profile.
    #[must_use]
    pub fn default_time_limit(self) -> Duration {
        let secs = match self {
            ExamProfile::JeeMain | ExamProfile::Cat => 120,
            ExamProfile::JeeAdvanced => 300,
            ExamProfile::MhtCet => 54,
            ExamProfile::Wbjee => 90,
            ExamProfile::Eamcet | ExamProfile::Kcet | ExamProfile::Gujcet | ExamProfile::Keam => 60,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for ExamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamProfile {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        ExamProfile::ALL
            .into_iter()
            .find(|profile| profile.as_str() == needle)
            .ok_or_else(|| SelectionError::UnknownExamProfile(s.to_string()))
    }
}

//
// ─── DIFFICULTY ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(SelectionError::UnknownDifficulty(s.to_string())),
        }
    }
}

//
// ─── SELECTION KEY ────────────────────────────────────────────────────────────
//

/// Identifies a practice context: exam profile, topic, subtopic and difficulty.
///
/// Topic and subtopic are always stored in their canonical slug form so that a
/// display label ("Free Body Diagrams") and a value ("free-body-diagrams") address
/// the same buffer and the same store rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SelectionKey {
    exam_profile: ExamProfile,
    topic: String,
    subtopic: String,
    difficulty: Difficulty,
}

impl SelectionKey {
    /// Build a key, canonicalising topic and subtopic.
    ///
    /// # Errors
    ///
    /// Returns `SelectionError::EmptyTopic` / `EmptySubtopic` if either is blank
    /// once canonicalised.
    pub fn new(
        exam_profile: ExamProfile,
        topic: impl AsRef<str>,
        subtopic: impl AsRef<str>,
        difficulty: Difficulty,
    ) -> Result<Self, SelectionError> {
        let topic = canonical_slug(topic.as_ref());
        if topic.is_empty() {
            return Err(SelectionError::EmptyTopic);
        }
        let subtopic = canonical_slug(subtopic.as_ref());
        if subtopic.is_empty() {
            return Err(SelectionError::EmptySubtopic);
        }
        Ok(Self {
            exam_profile,
            topic,
            subtopic,
            difficulty,
        })
    }

    /// Rebuild a key from parts that are already canonical (e.g. read back from a
    /// validated question).
    pub(crate) fn from_canonical(
        exam_profile: ExamProfile,
        topic: String,
        subtopic: String,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            exam_profile,
            topic,
            subtopic,
            difficulty,
        }
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

    /// Same practice context at another difficulty.
    #[must_use]
    pub fn with_difficulty(&self, difficulty: Difficulty) -> Self {
        Self {
            difficulty,
            ..self.clone()
        }
    }
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.exam_profile, self.topic, self.subtopic, self.difficulty
        )
    }
}

/// Lowercase, hyphen-separated form of a topic or subtopic label.
#[must_use]
pub fn canonical_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if (ch.is_whitespace() || ch == '_' || ch == '-')
            && !out.is_empty()
            && !out.ends_with('-')
        {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
