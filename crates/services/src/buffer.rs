//! Look-ahead question buffer, one ordered list per selection key.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use drill_core::model::{Question, SelectionKey};
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::sourcing::QuestionSource;

/// What a top-up achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopUp {
    /// Questions appended to the buffer by this call.
    pub added: usize,
    /// Generation was throttled; the buffer is serving from cache.
    pub throttled: bool,
    /// Another top-up for the key was already running, so this call did nothing.
    pub skipped: bool,
}

#[derive(Debug, Default)]
struct BufferState {
    lists: HashMap<SelectionKey, Vec<Question>>,
    in_flight: HashSet<SelectionKey>,
}

impl BufferState {
    /// Append `question` unless the list already holds its id.
    fn append(&mut self, key: &SelectionKey, question: Question) -> bool {
        let list = self.lists.entry(key.clone()).or_default();
        if list.iter().any(|q| q.id() == question.id()) {
            return false;
        }
        list.push(question);
        true
    }
}

/// Clears the in-flight flag for a key when a top-up ends, however it ends.
struct InFlight<'a> {
    buffer: &'a BufferManager,
    key: SelectionKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.buffer.lock().in_flight.remove(&self.key);
    }
}

#[derive(Clone)]
pub struct BufferManager {
    source: QuestionSource,
    state: Arc<Mutex<BufferState>>,
}

impl BufferManager {
    #[must_use]
    pub fn new(source: QuestionSource) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(BufferState::default())),
        }
    }

    #[must_use]
    pub fn source(&self) -> &QuestionSource {
        &self.source
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // A poisoned buffer only ever holds fully merged lists.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make sure `key` has at least `want_index + 1` questions buffered.
    ///
    /// Single-flight per key: returns immediately with `skipped` set when a top-up
    /// for `key` is already running. Throttling ends the top-up early and keeps the
    /// partial result.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AuthRequired` when nobody is signed in, or
    /// `DeliveryError::NoQuestionsAvailable` when a generation failure left this call
    /// with nothing at all.
    pub async fn ensure_buffer(
        &self,
        key: &SelectionKey,
        want_index: usize,
    ) -> Result<TopUp, DeliveryError> {
        let needed = {
            let mut state = self.lock();
            let have = state.lists.get(key).map_or(0, Vec::len);
            let needed = (want_index + 1).saturating_sub(have);
            if needed == 0 {
                return Ok(TopUp::default());
            }
            if !state.in_flight.insert(key.clone()) {
                debug!(selection = %key, "top-up already in flight");
                return Ok(TopUp {
                    skipped: true,
                    ..TopUp::default()
                });
            }
            needed
        };
        let _in_flight = InFlight {
            buffer: self,
            key: key.clone(),
        };

        debug!(selection = %key, needed, "topping up buffer");
        let batch = self.source.fetch(key, needed).await?;

        let added = {
            let mut state = self.lock();
            batch
                .questions
                .into_iter()
                .map(|q| state.append(key, q))
                .filter(|appended| *appended)
                .count()
        };

        if added == 0 && batch.failure.is_some() {
            return Err(DeliveryError::NoQuestionsAvailable);
        }
        debug!(selection = %key, added, throttled = batch.throttled, "top-up finished");
        Ok(TopUp {
            added,
            throttled: batch.throttled,
            skipped: false,
        })
    }

    /// Run `ensure_buffer` in the background and hand its outcome to `report`.
    pub fn spawn_top_up<F>(&self, key: SelectionKey, want_index: usize, report: F)
    where
        F: FnOnce(Result<TopUp, DeliveryError>) + Send + 'static,
    {
        let buffer = self.clone();
        tokio::spawn(async move {
            let outcome = buffer.ensure_buffer(&key, want_index).await;
            if let Err(err) = &outcome {
                warn!(selection = %key, error = %err, "background top-up failed");
            }
            report(outcome);
        });
    }

    /// Drop every buffered list (selection changed). Running top-ups still merge
    /// into whatever the map holds when they finish.
    pub fn invalidate_all(&self) {
        self.lock().lists.clear();
    }

    /// Put `question` at the front of `key`'s list.
    pub fn seed_front(&self, key: &SelectionKey, question: Question) {
        let mut state = self.lock();
        let list = state.lists.entry(key.clone()).or_default();
        if !list.iter().any(|q| q.id() == question.id()) {
            list.insert(0, question);
        }
    }

    /// Record an on-demand fetch at `index`, or at the end when the list is shorter.
    pub fn place(&self, key: &SelectionKey, index: usize, question: Question) {
        let mut state = self.lock();
        let list = state.lists.entry(key.clone()).or_default();
        if list.iter().any(|q| q.id() == question.id()) {
            return;
        }
        if index < list.len() {
            list.insert(index, question);
        } else {
            list.push(question);
        }
    }

    #[must_use]
    pub fn get(&self, key: &SelectionKey, index: usize) -> Option<Question> {
        self.lock().lists.get(key).and_then(|list| list.get(index)).cloned()
    }

    #[must_use]
    pub fn len(&self, key: &SelectionKey) -> usize {
        self.lock().lists.get(key).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self, key: &SelectionKey) -> bool {
        self.len(key) == 0
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &SelectionKey) -> bool {
        self.lock().in_flight.contains(key)
    }
}
