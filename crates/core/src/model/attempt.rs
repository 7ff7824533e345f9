use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::QuestionId;
use crate::model::question::PatternTag;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid mastery level: {0}")]
pub struct MasteryLevelParseError(String);

/// Mastery of a single solution pattern, as tracked by the mastery service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryLevel {
    #[default]
    Novice,
    Learning,
    Verified,
}

impl MasteryLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MasteryLevel::Novice => "novice",
            MasteryLevel::Learning => "learning",
            MasteryLevel::Verified => "verified",
        }
    }
}

impl fmt::Display for MasteryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MasteryLevel {
    type Err = MasteryLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "novice" => Ok(MasteryLevel::Novice),
            "learning" => Ok(MasteryLevel::Learning),
            "verified" => Ok(MasteryLevel::Verified),
            _ => Err(MasteryLevelParseError(s.to_string())),
        }
    }
}

/// One terminal action on a question, sent to the mastery service.
///
/// `skip_drill = true` records a skipped reinforcement drill (debt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub question_id: QuestionId,
    pub pattern_tag: PatternTag,
    pub is_correct: bool,
    pub time_ms: u64,
    pub target_time_ms: u64,
    pub selected_option_index: usize,
    pub skip_drill: bool,
}

impl AttemptRecord {
    /// Whether the attempt was solved within its target time.
    #[must_use]
    pub fn is_fast(&self) -> bool {
        self.time_ms <= self.target_time_ms
    }
}

/// Mastery service response. Consumed for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteryResult {
    pub new_streak: u32,
    pub new_mastery_level: MasteryLevel,
    pub is_now_in_debt: bool,
}

/// Streak needed before a pattern counts as verified.
pub const VERIFIED_STREAK: u32 = 3;

/// Per-user progress on one pattern, as kept by local mastery adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatternProgress {
    pub streak: u32,
    pub level: MasteryLevel,
    pub in_debt: bool,
    pub attempts: u32,
}

impl PatternProgress {
    /// Fold one attempt into the progress and return the service-shaped result.
    ///
    /// Correct and fast extends the streak and clears debt; a skipped drill puts the
    /// pattern in debt; anything else resets the streak.
    pub fn apply(&mut self, record: &AttemptRecord) -> MasteryResult {
        self.attempts = self.attempts.saturating_add(1);
        if record.skip_drill {
            self.streak = 0;
            self.in_debt = true;
        } else if record.is_correct && record.is_fast() {
            self.streak = self.streak.saturating_add(1);
            self.in_debt = false;
        } else {
            self.streak = 0;
        }
        self.level = match self.streak {
            0 => MasteryLevel::Novice,
            s if s >= VERIFIED_STREAK => MasteryLevel::Verified,
            _ => MasteryLevel::Learning,
        };
        self.result()
    }

    #[must_use]
    pub fn result(&self) -> MasteryResult {
        MasteryResult {
            new_streak: self.streak,
            new_mastery_level: self.level,
            is_now_in_debt: self.in_debt,
        }
    }
}
