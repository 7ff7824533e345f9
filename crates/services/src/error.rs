//! Shared error types for the services crate.

use thiserror::Error;

use drill_core::model::QuestionError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by a `QuestionGenerator`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("question generation is not configured")]
    Disabled,
    #[error("generation quota exceeded")]
    QuotaExceeded,
    #[error("generation rate limited")]
    RateLimited,
    #[error("generator returned an empty response")]
    EmptyResponse,
    #[error("generator request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("generator returned an invalid question: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    InvalidQuestion(#[from] QuestionError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl GenerationError {
    /// Throttling stops the generation loop but keeps whatever was fetched.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(self, GenerationError::QuotaExceeded | GenerationError::RateLimited)
    }
}

/// What the delivery layer surfaces to a session.
///
/// Network, generation and storage failures are translated into one of these at the
/// buffer and loader boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeliveryError {
    #[error("please sign in to practice")]
    AuthRequired,
    #[error("question generation quota exceeded, serving from cache")]
    QuotaExceeded,
    #[error("no questions available right now, try again")]
    NoQuestionsAvailable,
    #[error("request superseded by a newer one")]
    StaleRequestDiscarded,
    #[error("mastery update failed: {0}")]
    MasteryReportFailure(String),
}

impl DeliveryError {
    /// Whether the learner can simply try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::QuotaExceeded | DeliveryError::NoQuestionsAvailable
        )
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}
