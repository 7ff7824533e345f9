use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drill_core::Clock;
use drill_core::model::{
    AttemptRecord, MasteryResult, PatternProgress, PatternTag, Question, QuestionId, SelectionKey,
    UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Stored progress for one user on one pattern tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMasteryRecord {
    pub pattern_tag: PatternTag,
    pub progress: PatternProgress,
    pub updated_at: DateTime<Utc>,
}

/// Shared question cache plus per-user seen marks.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Up to `limit` cached questions for `key` that `user` has not seen, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the cache cannot be read.
    async fn get_unseen_questions(
        &self,
        user: UserId,
        key: &SelectionKey,
        limit: usize,
    ) -> Result<Vec<Question>, StorageError>;

    /// Record that `user` has been shown `ids`. Marking twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the marks cannot be written.
    async fn mark_seen(&self, user: UserId, ids: &[QuestionId]) -> Result<(), StorageError>;

    /// Add a freshly generated question to the shared cache under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id is already cached, or other
    /// storage errors.
    async fn cache_question(
        &self,
        user: UserId,
        key: &SelectionKey,
        question: &Question,
    ) -> Result<QuestionId, StorageError>;

    /// How many cached questions for `key` are still unseen by `user`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the cache cannot be read.
    async fn unseen_count(&self, user: UserId, key: &SelectionKey) -> Result<usize, StorageError>;
}

/// Pattern mastery tracking and drill lookup.
#[async_trait]
pub trait MasteryRepository: Send + Sync {
    /// Apply one attempt to the user's pattern progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be recorded.
    async fn report_attempt(
        &self,
        user: UserId,
        record: &AttemptRecord,
    ) -> Result<MasteryResult, StorageError>;

    /// Another cached question with the same pattern tag, excluding `exclude`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the cache cannot be read.
    async fn question_by_pattern_tag(
        &self,
        tag: &PatternTag,
        exclude: QuestionId,
    ) -> Result<Option<Question>, StorageError>;

    /// All pattern progress for `user`, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if progress cannot be read.
    async fn mastery_for_user(&self, user: UserId)
    -> Result<Vec<PatternMasteryRecord>, StorageError>;
}

#[derive(Debug, Clone)]
struct CachedEntry {
    key: SelectionKey,
    question: Question,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    clock: Clock,
    // Insertion order doubles as cache age.
    cached: Arc<Mutex<Vec<CachedEntry>>>,
    seen: Arc<Mutex<HashMap<(UserId, QuestionId), DateTime<Utc>>>>,
    mastery: Arc<Mutex<HashMap<(UserId, PatternTag), PatternMasteryRecord>>>,
    attempts: Arc<Mutex<Vec<(UserId, AttemptRecord)>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            ..Self::default()
        }
    }

    /// Whether `user` has a seen mark for `id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn is_seen(&self, user: UserId, id: QuestionId) -> Result<bool, StorageError> {
        let guard = self
            .seen
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.contains_key(&(user, id)))
    }

    /// Every attempt reported so far, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn attempts(&self) -> Result<Vec<(UserId, AttemptRecord)>, StorageError> {
        let guard = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn get_unseen_questions(
        &self,
        user: UserId,
        key: &SelectionKey,
        limit: usize,
    ) -> Result<Vec<Question>, StorageError> {
        let cached = self
            .cached
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let seen = self
            .seen
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(cached
            .iter()
            .filter(|entry| entry.key == *key)
            .filter(|entry| !seen.contains_key(&(user, entry.question.id())))
            .take(limit)
            .map(|entry| entry.question.clone())
            .collect())
    }

    async fn mark_seen(&self, user: UserId, ids: &[QuestionId]) -> Result<(), StorageError> {
        let now = self.clock.now();
        let mut guard = self
            .seen
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        for id in ids {
            guard.entry((user, *id)).or_insert(now);
        }
        Ok(())
    }

    async fn cache_question(
        &self,
        _user: UserId,
        key: &SelectionKey,
        question: &Question,
    ) -> Result<QuestionId, StorageError> {
        let mut guard = self
            .cached
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if guard.iter().any(|entry| entry.question.id() == question.id()) {
            return Err(StorageError::Conflict);
        }
        guard.push(CachedEntry {
            key: key.clone(),
            question: question.clone(),
        });
        Ok(question.id())
    }

    async fn unseen_count(&self, user: UserId, key: &SelectionKey) -> Result<usize, StorageError> {
        let cached = self
            .cached
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let seen = self
            .seen
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(cached
            .iter()
            .filter(|entry| entry.key == *key && !seen.contains_key(&(user, entry.question.id())))
            .count())
    }
}

#[async_trait]
impl MasteryRepository for InMemoryRepository {
    async fn report_attempt(
        &self,
        user: UserId,
        record: &AttemptRecord,
    ) -> Result<MasteryResult, StorageError> {
        let now = self.clock.now();
        let result = {
            let mut guard = self
                .mastery
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            let entry = guard
                .entry((user, record.pattern_tag.clone()))
                .or_insert_with(|| PatternMasteryRecord {
                    pattern_tag: record.pattern_tag.clone(),
                    progress: PatternProgress::default(),
                    updated_at: now,
                });
            entry.updated_at = now;
            entry.progress.apply(record)
        };
        self.attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .push((user, record.clone()));
        Ok(result)
    }

    async fn question_by_pattern_tag(
        &self,
        tag: &PatternTag,
        exclude: QuestionId,
    ) -> Result<Option<Question>, StorageError> {
        let guard = self
            .cached
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .iter()
            .map(|entry| &entry.question)
            .find(|q| q.pattern_tag() == tag && q.id() != exclude)
            .cloned())
    }

    async fn mastery_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<PatternMasteryRecord>, StorageError> {
        let guard = self
            .mastery
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut out: Vec<PatternMasteryRecord> = guard
            .iter()
            .filter(|((owner, _), _)| *owner == user)
            .map(|(_, record)| record.clone())
            .collect();
        out.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.pattern_tag.cmp(&b.pattern_tag))
        });
        Ok(out)
    }
}

/// Aggregates the question and mastery repositories behind trait objects for easy
/// backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub questions: Arc<dyn QuestionRepository>,
    pub mastery: Arc<dyn MasteryRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryRepository::new())
    }

    /// Wrap an existing in-memory repository, keeping a handle for inspection.
    #[must_use]
    pub fn from_in_memory(repo: InMemoryRepository) -> Self {
        let questions: Arc<dyn QuestionRepository> = Arc::new(repo.clone());
        let mastery: Arc<dyn MasteryRepository> = Arc::new(repo);
        Self { questions, mastery }
    }
}
