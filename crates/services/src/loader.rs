//! Race-safe question loading and the observable display state.
//!
//! Every `load` mints a `LoadToken`. Async work that finishes after a newer token
//! was minted is discarded without touching the display.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use drill_core::flow::{FlowNotice, FlowState};
use drill_core::model::{MasteryResult, Question, SelectionKey};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::debug;

use crate::buffer::{BufferManager, TopUp};
use crate::error::DeliveryError;
use crate::preload::Preloader;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadToken(u64);

#[derive(Debug, Default)]
struct TokenCounter(AtomicU64);

impl TokenCounter {
    fn mint(&self) -> LoadToken {
        LoadToken(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn current(&self) -> LoadToken {
        LoadToken(self.0.load(Ordering::SeqCst))
    }

    fn is_current(&self, token: LoadToken) -> bool {
        self.current() == token
    }
}

/// Soft, non-blocking messages about delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// Generation is throttled; only cached questions are served for now.
    ServingFromCache,
}

/// A question that made it onto the display under `token`.
#[derive(Debug, Clone, PartialEq)]
pub struct Shown {
    pub token: LoadToken,
    pub question: Question,
}

/// Everything a UI needs to render a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    pub key: Option<SelectionKey>,
    pub index: usize,
    pub question: Option<Question>,
    pub selected_option: Option<usize>,
    pub elapsed_secs: u64,
    pub loading: bool,
    pub error: Option<DeliveryError>,
    pub advisory: Option<Advisory>,
    pub flow: FlowState,
    pub notice: Option<FlowNotice>,
    pub mastery: Option<MasteryResult>,
}

#[derive(Debug, Default)]
struct Timer {
    task: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
}

impl Timer {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct LoaderInner {
    buffer: BufferManager,
    preloader: Preloader,
    tokens: TokenCounter,
    display: watch::Sender<DisplayState>,
    timer: Mutex<Timer>,
}

impl Drop for LoaderInner {
    fn drop(&mut self) {
        self.timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .stop();
    }
}

#[derive(Clone)]
pub struct QuestionLoader {
    inner: Arc<LoaderInner>,
}

impl QuestionLoader {
    #[must_use]
    pub fn new(buffer: BufferManager, preloader: Preloader) -> Self {
        let (display, _) = watch::channel(DisplayState::default());
        Self {
            inner: Arc::new(LoaderInner {
                buffer,
                preloader,
                tokens: TokenCounter::default(),
                display,
                timer: Mutex::new(Timer::default()),
            }),
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &BufferManager {
        &self.inner.buffer
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.inner.display.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> DisplayState {
        self.inner.display.borrow().clone()
    }

    #[must_use]
    pub fn current_token(&self) -> LoadToken {
        self.inner.tokens.current()
    }

    #[must_use]
    pub fn is_current(&self, token: LoadToken) -> bool {
        self.inner.tokens.is_current(token)
    }

    /// Mutate the display state unconditionally.
    pub(crate) fn publish(&self, update: impl FnOnce(&mut DisplayState)) {
        self.inner.display.send_modify(update);
    }

    /// Mutate the display state only if `token` is still current.
    fn publish_if_current(&self, token: LoadToken, update: impl FnOnce(&mut DisplayState)) -> bool {
        let tokens = &self.inner.tokens;
        self.inner.display.send_if_modified(|state| {
            if !tokens.is_current(token) {
                return false;
            }
            update(state);
            true
        })
    }

    /// Load the question at `index` for `key` and show it.
    ///
    /// Clears the previous question, starts a background top-up for `index + 1`, then
    /// serves from the preloaded slot (index 0 only), the buffer, or an on-demand
    /// fetch, in that order.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::StaleRequestDiscarded` when a newer load superseded
    /// this one (the display is left to the newer load), or the delivery error that
    /// was shown to the learner.
    pub async fn load(&self, key: &SelectionKey, index: usize) -> Result<Shown, DeliveryError> {
        let token = self.inner.tokens.mint();
        self.reset_timer();
        self.publish(|state| {
            state.key = Some(key.clone());
            state.index = index;
            state.question = None;
            state.selected_option = None;
            state.elapsed_secs = 0;
            state.loading = true;
            state.error = None;
            state.notice = None;
        });
        debug!(selection = %key, index, ?token, "loading question");

        let loader = self.clone();
        self.inner
            .buffer
            .spawn_top_up(key.clone(), index + 1, move |outcome| loader.on_top_up(outcome));

        if index == 0 {
            if let Some(question) = self.inner.preloader.take(key) {
                debug!(selection = %key, "serving preloaded question");
                self.inner.buffer.seed_front(key, question.clone());
                return self.show(token, question);
            }
        }

        if let Some(question) = self.inner.buffer.get(key, index) {
            return self.show(token, question);
        }

        let fetched = self.inner.buffer.source().fetch_one(key).await;
        if !self.is_current(token) {
            debug!(selection = %key, index, ?token, "discarding stale load result");
            return Err(DeliveryError::StaleRequestDiscarded);
        }

        match fetched {
            Ok(question) => {
                self.inner.buffer.place(key, index, question.clone());
                self.show(token, question)
            }
            Err(err) => {
                let throttled = err == DeliveryError::QuotaExceeded;
                let shown = if throttled {
                    DeliveryError::NoQuestionsAvailable
                } else {
                    err
                };
                let applied = self.publish_if_current(token, |state| {
                    state.loading = false;
                    state.error = Some(shown.clone());
                    if throttled {
                        state.advisory = Some(Advisory::ServingFromCache);
                    }
                });
                if applied {
                    Err(shown)
                } else {
                    Err(DeliveryError::StaleRequestDiscarded)
                }
            }
        }
    }

    /// Swap the displayed question in place (same index) under a fresh token.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::StaleRequestDiscarded` if a load started meanwhile.
    pub fn replace_current(&self, question: Question) -> Result<Shown, DeliveryError> {
        let token = self.inner.tokens.mint();
        self.reset_timer();
        self.show(token, question)
    }

    /// Record the option the learner picked.
    pub fn select_option(&self, option: usize) {
        self.publish(|state| state.selected_option = Some(option));
    }

    /// Time since the current question was shown.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.timer()
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Stop the per-second display timer, keeping the elapsed reading.
    pub fn stop_timer(&self) {
        self.timer().stop();
    }

    fn show(&self, token: LoadToken, question: Question) -> Result<Shown, DeliveryError> {
        let applied = self.publish_if_current(token, |state| {
            state.question = Some(question.clone());
            state.selected_option = None;
            state.elapsed_secs = 0;
            state.loading = false;
            state.error = None;
        });
        if !applied || !self.start_timer(token) {
            debug!(question = %question.id(), ?token, "discarding stale question");
            return Err(DeliveryError::StaleRequestDiscarded);
        }
        Ok(Shown { token, question })
    }

    fn on_top_up(&self, outcome: Result<TopUp, DeliveryError>) {
        match outcome {
            Ok(top_up) if top_up.throttled => {
                self.publish(|state| state.advisory = Some(Advisory::ServingFromCache));
            }
            Ok(top_up) if top_up.added > 0 => {
                self.publish(|state| state.advisory = None);
            }
            _ => {}
        }
    }

    fn timer(&self) -> MutexGuard<'_, Timer> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_timer(&self) {
        let mut timer = self.timer();
        timer.stop();
        timer.started_at = None;
    }

    /// Restart the display timer for `token`. A stale token leaves the running
    /// timer alone and returns `false`.
    fn start_timer(&self, token: LoadToken) -> bool {
        let weak: Weak<LoaderInner> = Arc::downgrade(&self.inner);
        let mut timer = self.timer();
        if !self.is_current(token) {
            return false;
        }
        timer.stop();
        timer.started_at = Some(Instant::now());
        timer.task = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + TICK, TICK);
            loop {
                ticks.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !inner.tokens.is_current(token) {
                    break;
                }
                inner.display.send_modify(|state| state.elapsed_secs += 1);
            }
        }));
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use drill_core::model::{Difficulty, ExamProfile, QuestionDraft, QuestionId, UserId};
    use storage::repository::InMemoryRepository;

    use super::*;
    use crate::auth::StaticAuth;
    use crate::generator::ChatQuestionGenerator;
    use crate::sourcing::QuestionSource;

    fn loader() -> QuestionLoader {
        let source = QuestionSource::new(
            Arc::new(StaticAuth::signed_in(UserId::generate())),
            Arc::new(InMemoryRepository::new()),
            Arc::new(ChatQuestionGenerator::new(None)),
            Duration::ZERO,
        );
        QuestionLoader::new(BufferManager::new(source.clone()), Preloader::new(source))
    }

    fn question() -> Question {
        let key =
            SelectionKey::new(ExamProfile::Cat, "arithmetic", "mixtures", Difficulty::Easy).unwrap();
        QuestionDraft {
            text: "Mix 2:3 with 3:2".into(),
            options: vec!["1:1".into(), "2:3".into(), "3:2".into(), "5:5".into()],
            correct_option_index: 0,
            time_targets: BTreeMap::from([(ExamProfile::Cat, 30)]),
            pattern_tag: Some("alligation".into()),
            ..QuestionDraft::default()
        }
        .validate(QuestionId::generate(), &key)
        .unwrap()
    }

    #[test]
    fn tokens_are_monotonic() {
        let counter = TokenCounter::default();
        let first = counter.mint();
        let second = counter.mint();
        assert!(second > first);
        assert!(counter.is_current(second));
        assert!(!counter.is_current(first));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_token_leaves_running_timer_alone() {
        let loader = loader();
        let shown = loader.replace_current(question()).unwrap();
        let stale = LoadToken(shown.token.0 - 1);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(!loader.start_timer(stale));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(loader.snapshot().elapsed_secs, 4);
        assert!(loader.elapsed() >= Duration::from_millis(4_500));
    }
}
