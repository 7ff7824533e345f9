//! One-shot preloaded first question, fetched ahead of a practice screen.

use std::sync::{Arc, Mutex, PoisonError};

use drill_core::model::{Question, SelectionKey};
use tracing::{debug, warn};

use crate::sourcing::QuestionSource;

#[derive(Clone)]
pub struct Preloader {
    source: QuestionSource,
    slot: Arc<Mutex<Option<(SelectionKey, Question)>>>,
}

impl Preloader {
    #[must_use]
    pub fn new(source: QuestionSource) -> Self {
        Self {
            source,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Fetch a first question for `key` into the slot, replacing any other key's.
    ///
    /// Failures are logged and leave the slot unchanged. Returns whether a question
    /// is waiting for `key` afterwards.
    pub async fn preload(&self, key: &SelectionKey) -> bool {
        if self.is_ready(key) {
            return true;
        }
        match self.source.fetch_one(key).await {
            Ok(question) => {
                debug!(selection = %key, question = %question.id(), "preloaded first question");
                *self.slot.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((key.clone(), question));
                true
            }
            Err(err) => {
                warn!(selection = %key, error = %err, "failed to preload question");
                false
            }
        }
    }

    /// Hand out the preloaded question if it was fetched for `key`. Single use.
    #[must_use]
    pub fn take(&self, key: &SelectionKey) -> Option<Question> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(k, _)| k == key) {
            slot.take().map(|(_, question)| question)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_ready(&self, key: &SelectionKey) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(k, _)| k == key)
    }
}
