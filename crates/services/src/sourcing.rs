//! Pulls unseen questions for a learner: shared cache first, generator on a miss.

use std::sync::Arc;
use std::time::Duration;

use drill_core::model::{Question, SelectionKey, UserId};
use storage::repository::QuestionRepository;
use tracing::{debug, info, warn};

use crate::auth::{AuthProvider, require_user};
use crate::error::{DeliveryError, GenerationError};
use crate::generator::QuestionGenerator;

/// Result of one sourcing pass.
#[derive(Debug, Default)]
pub struct SourcedBatch {
    /// Questions obtained, already marked seen for the learner.
    pub questions: Vec<Question>,
    /// The generator was throttled; the batch may be short.
    pub throttled: bool,
    /// A non-throttle failure stopped the pass early.
    pub failure: Option<String>,
}

impl SourcedBatch {
    /// Translate a batch that came back empty into the error a session shows.
    #[must_use]
    pub fn empty_error(&self) -> DeliveryError {
        if self.throttled {
            DeliveryError::QuotaExceeded
        } else {
            DeliveryError::NoQuestionsAvailable
        }
    }
}

#[derive(Clone)]
pub struct QuestionSource {
    auth: Arc<dyn AuthProvider>,
    questions: Arc<dyn QuestionRepository>,
    generator: Arc<dyn QuestionGenerator>,
    pacing: Duration,
}

impl QuestionSource {
    #[must_use]
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        questions: Arc<dyn QuestionRepository>,
        generator: Arc<dyn QuestionGenerator>,
        pacing: Duration,
    ) -> Self {
        Self {
            auth,
            questions,
            generator,
            pacing,
        }
    }

    /// Resolve the signed-in learner.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AuthRequired` when nobody is signed in.
    pub async fn user(&self) -> Result<UserId, DeliveryError> {
        require_user(self.auth.as_ref()).await
    }

    /// Obtain up to `count` questions the learner has never seen for `key`.
    ///
    /// One batch read from the cache, then one generation call at a time for the
    /// shortfall, `pacing` apart. Every question is marked seen before it is
    /// returned. Throttling or any other generation failure ends the pass and keeps
    /// what was already obtained.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AuthRequired` when nobody is signed in.
    pub async fn fetch(&self, key: &SelectionKey, count: usize) -> Result<SourcedBatch, DeliveryError> {
        let user = self.user().await?;
        let mut batch = SourcedBatch::default();
        if count == 0 {
            return Ok(batch);
        }

        match self.questions.get_unseen_questions(user, key, count).await {
            Ok(cached) if !cached.is_empty() => {
                let ids: Vec<_> = cached.iter().map(Question::id).collect();
                match self.questions.mark_seen(user, &ids).await {
                    Ok(()) => batch.questions = cached,
                    Err(err) => {
                        warn!(selection = %key, error = %err, "could not mark cached questions seen");
                        batch.failure = Some(err.to_string());
                        return Ok(batch);
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(selection = %key, error = %err, "question cache read failed");
            }
        }
        debug!(selection = %key, from_cache = batch.questions.len(), wanted = count, "cache pass done");

        let mut first_call = true;
        while batch.questions.len() < count {
            if !first_call && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            first_call = false;

            match self.generate_one(user, key).await {
                Ok(question) => batch.questions.push(question),
                Err(err) if err.is_throttled() => {
                    info!(selection = %key, error = %err, "generator throttled, serving from cache");
                    batch.throttled = true;
                    break;
                }
                Err(err) => {
                    warn!(selection = %key, error = %err, "question generation stopped");
                    batch.failure = Some(err.to_string());
                    break;
                }
            }
        }

        Ok(batch)
    }

    /// A single unseen question for `key` (cache first, generator on a miss).
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AuthRequired` when nobody is signed in,
    /// `DeliveryError::QuotaExceeded` when nothing is cached and the generator is
    /// throttled, and `DeliveryError::NoQuestionsAvailable` otherwise when nothing
    /// could be obtained.
    pub async fn fetch_one(&self, key: &SelectionKey) -> Result<Question, DeliveryError> {
        let batch = self.fetch(key, 1).await?;
        let error = batch.empty_error();
        batch.questions.into_iter().next().ok_or(error)
    }

    async fn generate_one(&self, user: UserId, key: &SelectionKey) -> Result<Question, GenerationError> {
        let question = self.generator.generate_question(key).await?;

        // Cached, then marked seen. A failed write still hands the question out.
        if let Err(err) = self.questions.cache_question(user, key, &question).await {
            warn!(selection = %key, question = %question.id(), error = %err, "could not cache generated question");
        }
        if let Err(err) = self.questions.mark_seen(user, &[question.id()]).await {
            warn!(selection = %key, question = %question.id(), error = %err, "could not mark generated question seen");
        }
        Ok(question)
    }
}
