//! Reports attempts to the mastery service and looks up drill variants.

use std::sync::Arc;

use drill_core::model::{AttemptRecord, MasteryResult, PatternTag, Question, QuestionId};
use storage::repository::{MasteryRepository, PatternMasteryRecord};
use tracing::{debug, warn};

use crate::auth::{AuthProvider, require_user};
use crate::error::DeliveryError;

#[derive(Clone)]
pub struct MasteryReporter {
    auth: Arc<dyn AuthProvider>,
    mastery: Arc<dyn MasteryRepository>,
}

impl MasteryReporter {
    #[must_use]
    pub fn new(auth: Arc<dyn AuthProvider>, mastery: Arc<dyn MasteryRepository>) -> Self {
        Self { auth, mastery }
    }

    /// Send one attempt record.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::MasteryReportFailure` (already logged) when the call
    /// fails; callers continue the flow regardless.
    pub async fn report(&self, record: &AttemptRecord) -> Result<MasteryResult, DeliveryError> {
        let outcome = match require_user(self.auth.as_ref()).await {
            Ok(user) => self
                .mastery
                .report_attempt(user, record)
                .await
                .map_err(|e| DeliveryError::MasteryReportFailure(e.to_string())),
            Err(err) => Err(DeliveryError::MasteryReportFailure(err.to_string())),
        };
        match &outcome {
            Ok(result) => debug!(
                question = %record.question_id,
                pattern = %record.pattern_tag,
                skip_drill = record.skip_drill,
                streak = result.new_streak,
                level = %result.new_mastery_level,
                "attempt recorded"
            ),
            Err(err) => warn!(
                question = %record.question_id,
                pattern = %record.pattern_tag,
                error = %err,
                "mastery update failed"
            ),
        }
        outcome
    }

    /// Another question drilling the same pattern, excluding `exclude`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::NoQuestionsAvailable` when the lookup itself fails.
    pub async fn find_drill(
        &self,
        tag: &PatternTag,
        exclude: QuestionId,
    ) -> Result<Option<Question>, DeliveryError> {
        self.mastery
            .question_by_pattern_tag(tag, exclude)
            .await
            .map_err(|err| {
                warn!(pattern = %tag, error = %err, "drill lookup failed");
                DeliveryError::NoQuestionsAvailable
            })
    }

    /// Pattern progress for the signed-in learner.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AuthRequired` when nobody is signed in, or
    /// `DeliveryError::MasteryReportFailure` when progress cannot be read.
    pub async fn progress(&self) -> Result<Vec<PatternMasteryRecord>, DeliveryError> {
        let user = require_user(self.auth.as_ref()).await?;
        self.mastery
            .mastery_for_user(user)
            .await
            .map_err(|e| DeliveryError::MasteryReportFailure(e.to_string()))
    }
}
