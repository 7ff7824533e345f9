use std::sync::Arc;

use drill_core::model::SelectionKey;
use storage::repository::{PatternMasteryRecord, QuestionRepository, Storage};
use storage::sqlite::SqliteRepository;

use crate::Clock;
use crate::auth::AuthProvider;
use crate::buffer::BufferManager;
use crate::config::DeliveryConfig;
use crate::error::AppServicesError;
use crate::generator::QuestionGenerator;
use crate::loader::QuestionLoader;
use crate::mastery::MasteryReporter;
use crate::practice::PracticeSession;
use crate::preload::Preloader;
use crate::sourcing::QuestionSource;
use crate::sprint::SprintSession;

/// Assembles delivery services over one storage backend and hands out sessions.
#[derive(Clone)]
pub struct AppServices {
    config: DeliveryConfig,
    questions: Arc<dyn QuestionRepository>,
    source: QuestionSource,
    preloader: Preloader,
    reporter: MasteryReporter,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        auth: Arc<dyn AuthProvider>,
        generator: Arc<dyn QuestionGenerator>,
        config: DeliveryConfig,
    ) -> Result<Self, AppServicesError> {
        let repo = SqliteRepository::connect(db_url).await?.with_clock(clock);
        repo.migrate().await?;
        let storage = Storage {
            questions: Arc::new(repo.clone()),
            mastery: Arc::new(repo),
        };
        Ok(Self::from_storage(storage, auth, generator, config))
    }

    /// Build services over in-memory storage.
    #[must_use]
    pub fn in_memory(
        auth: Arc<dyn AuthProvider>,
        generator: Arc<dyn QuestionGenerator>,
        config: DeliveryConfig,
    ) -> Self {
        Self::from_storage(Storage::in_memory(), auth, generator, config)
    }

    #[must_use]
    pub fn from_storage(
        storage: Storage,
        auth: Arc<dyn AuthProvider>,
        generator: Arc<dyn QuestionGenerator>,
        config: DeliveryConfig,
    ) -> Self {
        let source = QuestionSource::new(
            Arc::clone(&auth),
            Arc::clone(&storage.questions),
            generator,
            config.pacing,
        );
        Self {
            config,
            questions: storage.questions,
            preloader: Preloader::new(source.clone()),
            reporter: MasteryReporter::new(auth, storage.mastery),
            source,
        }
    }

    #[must_use]
    pub fn config(&self) -> DeliveryConfig {
        self.config
    }

    /// Shared preloader; a question preloaded for a key is served as that key's
    /// first question by the next session started on it.
    #[must_use]
    pub fn preloader(&self) -> Preloader {
        self.preloader.clone()
    }

    #[must_use]
    pub fn reporter(&self) -> MasteryReporter {
        self.reporter.clone()
    }

    /// A practice session with its own buffer and display state.
    #[must_use]
    pub fn practice(&self, key: SelectionKey) -> PracticeSession {
        PracticeSession::new(self.loader(), self.reporter(), self.config, key)
    }

    /// A timed session of `question_count` questions.
    #[must_use]
    pub fn sprint(&self, key: SelectionKey, question_count: usize) -> SprintSession {
        SprintSession::new(self.loader(), self.reporter(), key, question_count)
    }

    /// Pattern progress for the signed-in learner.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Delivery` when nobody is signed in or progress
    /// cannot be read.
    pub async fn progress(&self) -> Result<Vec<PatternMasteryRecord>, AppServicesError> {
        Ok(self.reporter.progress().await?)
    }

    /// Cached questions for `key` the signed-in learner has not seen yet.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` when nobody is signed in or the store fails.
    pub async fn unseen_count(&self, key: &SelectionKey) -> Result<usize, AppServicesError> {
        let user = self.source.user().await?;
        Ok(self.questions.unseen_count(user, key).await?)
    }

    fn loader(&self) -> QuestionLoader {
        QuestionLoader::new(BufferManager::new(self.source.clone()), self.preloader())
    }
}
