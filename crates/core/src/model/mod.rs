mod attempt;
mod ids;
mod question;
mod selection;

pub use ids::{ParseIdError, QuestionId, UserId};

pub use attempt::{
    AttemptRecord, MasteryLevel, MasteryLevelParseError, MasteryResult, PatternProgress,
    VERIFIED_STREAK,
};
pub use question::{OPTION_COUNT, OptimalPath, PatternTag, Question, QuestionDraft, QuestionError};
pub use selection::{
    Difficulty, ExamProfile, FALLBACK_TIME_LIMIT_SECS, SelectionError, SelectionKey,
    canonical_slug,
};
