#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use drill_core::model::{
    AttemptRecord, Difficulty, ExamProfile, MasteryResult, PatternTag, Question, QuestionDraft,
    QuestionId, SelectionKey, UserId,
};
use services::{
    AppServices, AuthProvider, DeliveryConfig, GenerationError, QuestionGenerator, StaticAuth,
};
use storage::repository::{
    InMemoryRepository, MasteryRepository, PatternMasteryRecord, Storage, StorageError,
};
use tokio::sync::Semaphore;

pub fn key() -> SelectionKey {
    key_for("work-and-time")
}

pub fn key_for(subtopic: &str) -> SelectionKey {
    SelectionKey::new(ExamProfile::Cat, "arithmetic", subtopic, Difficulty::Medium).unwrap()
}

/// A valid question for `key`; option 1 is correct and the target is 45 s.
pub fn question(key: &SelectionKey, n: usize, tag: &str) -> Question {
    QuestionDraft {
        text: format!("Question {n}"),
        options: vec!["1".into(), "2".into(), "3".into(), "4".into()],
        correct_option_index: 1,
        time_targets: BTreeMap::from([(key.exam_profile(), 45)]),
        pattern_tag: Some(tag.to_string()),
        ..QuestionDraft::default()
    }
    .validate(QuestionId::generate(), key)
    .unwrap()
}

pub fn wrong_option(question: &Question) -> usize {
    (question.correct_option_index() + 1) % 4
}

/// Generator that counts calls and can be slowed down, throttled or broken.
#[derive(Default)]
pub struct ScriptedGenerator {
    calls: AtomicUsize,
    latency: Duration,
    tag: Option<String>,
    throttle_after: Option<usize>,
    fail_after: Option<usize>,
    generated: Mutex<Vec<QuestionId>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every question shares `tag`; otherwise each gets its own.
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    /// Succeed `n` times, then report quota exhaustion.
    pub fn throttle_after(mut self, n: usize) -> Self {
        self.throttle_after = Some(n);
        self
    }

    /// Succeed `n` times, then fail with a non-throttle error.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn generated(&self) -> Vec<QuestionId> {
        self.generated.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuestionGenerator for ScriptedGenerator {
    async fn generate_question(&self, key: &SelectionKey) -> Result<Question, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.throttle_after.is_some_and(|limit| n >= limit) {
            return Err(GenerationError::QuotaExceeded);
        }
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(GenerationError::EmptyResponse);
        }
        let tag = self.tag.clone().unwrap_or_else(|| format!("pattern-{n}"));
        let question = question(key, n, &tag);
        self.generated.lock().unwrap().push(question.id());
        Ok(question)
    }
}

/// Mastery adapter over the in-memory store that can be held open or made to fail.
pub struct GatedMastery {
    inner: InMemoryRepository,
    gate: Option<Semaphore>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl GatedMastery {
    pub fn new(inner: InMemoryRepository) -> Self {
        Self {
            inner,
            gate: None,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Each report blocks until its own `release` call.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MasteryRepository for GatedMastery {
    async fn report_attempt(
        &self,
        user: UserId,
        record: &AttemptRecord,
    ) -> Result<MasteryResult, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?
                .forget();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("mastery service unavailable".into()));
        }
        self.inner.report_attempt(user, record).await
    }

    async fn question_by_pattern_tag(
        &self,
        tag: &PatternTag,
        exclude: QuestionId,
    ) -> Result<Option<Question>, StorageError> {
        self.inner.question_by_pattern_tag(tag, exclude).await
    }

    async fn mastery_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<PatternMasteryRecord>, StorageError> {
        self.inner.mastery_for_user(user).await
    }
}

pub struct Harness {
    pub user: UserId,
    pub repo: InMemoryRepository,
    pub generator: Arc<ScriptedGenerator>,
    pub mastery: Arc<GatedMastery>,
    pub services: AppServices,
}

impl Harness {
    pub fn new(generator: ScriptedGenerator) -> Self {
        Self::build(generator, GatedMastery::new, true, test_config())
    }

    pub fn anonymous(generator: ScriptedGenerator) -> Self {
        Self::build(generator, GatedMastery::new, false, test_config())
    }

    pub fn with_config(generator: ScriptedGenerator, config: DeliveryConfig) -> Self {
        Self::build(generator, GatedMastery::new, true, config)
    }

    pub fn with_mastery(
        generator: ScriptedGenerator,
        mastery: impl FnOnce(InMemoryRepository) -> GatedMastery,
    ) -> Self {
        Self::build(generator, mastery, true, test_config())
    }

    fn build(
        generator: ScriptedGenerator,
        mastery: impl FnOnce(InMemoryRepository) -> GatedMastery,
        signed_in: bool,
        config: DeliveryConfig,
    ) -> Self {
        let user = UserId::generate();
        let repo = InMemoryRepository::new();
        let generator = Arc::new(generator);
        let mastery = Arc::new(mastery(repo.clone()));
        let auth: Arc<dyn AuthProvider> = if signed_in {
            Arc::new(StaticAuth::signed_in(user))
        } else {
            Arc::new(StaticAuth::anonymous())
        };
        let storage = Storage {
            questions: Arc::new(repo.clone()),
            mastery: Arc::clone(&mastery) as Arc<dyn MasteryRepository>,
        };
        let services = AppServices::from_storage(
            storage,
            auth,
            Arc::clone(&generator) as Arc<dyn QuestionGenerator>,
            config,
        );
        Self {
            user,
            repo,
            generator,
            mastery,
            services,
        }
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.repo
            .attempts()
            .unwrap()
            .into_iter()
            .map(|(_, record)| record)
            .collect()
    }
}

pub fn test_config() -> DeliveryConfig {
    DeliveryConfig::default().with_pacing(Duration::ZERO)
}

/// Let spawned background work (top-ups, toasts) run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
