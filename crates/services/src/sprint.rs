//! Timed sprint mode: a fixed number of questions, each with a hard time limit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use drill_core::model::{
    AttemptRecord, FALLBACK_TIME_LIMIT_SECS, OPTION_COUNT, Question, QuestionId, SelectionKey,
};
use drill_core::scoring::sprint_score;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::DeliveryError;
use crate::loader::{DisplayState, LoadToken, QuestionLoader};
use crate::mastery::MasteryReporter;

/// Option index reported for timeouts and skips.
const NO_OPTION: usize = OPTION_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintResult {
    Correct,
    Wrong,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintInput {
    Click,
    Timeout,
}

/// Outcome of one sprint question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SprintAttempt {
    pub question_id: QuestionId,
    pub result: SprintResult,
    /// Solve time, capped at the question's limit.
    pub time_ms: u64,
    pub score: u32,
    pub input: SprintInput,
}

/// Running totals over a sprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SprintTally {
    pub total: usize,
    pub correct: usize,
    pub wrong: usize,
    pub skipped: usize,
    pub total_score: u32,
    pub avg_time_ms: u64,
}

impl SprintTally {
    #[must_use]
    pub fn from_attempts(attempts: &[SprintAttempt]) -> Self {
        let mut tally = Self {
            total: attempts.len(),
            ..Self::default()
        };
        let mut time_ms: u64 = 0;
        for attempt in attempts {
            match attempt.result {
                SprintResult::Correct => tally.correct += 1,
                SprintResult::Wrong => tally.wrong += 1,
                SprintResult::Skipped => tally.skipped += 1,
            }
            tally.total_score = tally.total_score.saturating_add(attempt.score);
            time_ms = time_ms.saturating_add(attempt.time_ms);
        }
        if let Ok(total) = u64::try_from(tally.total) {
            tally.avg_time_ms = time_ms.checked_div(total).unwrap_or(0);
        }
        tally
    }
}

#[derive(Debug, Clone, Copy)]
enum Settle {
    Click(usize),
    Skip,
    Timeout,
}

struct Current {
    token: LoadToken,
    question: Question,
    limit: Duration,
}

#[derive(Default)]
struct SprintState {
    index: usize,
    current: Option<Current>,
    attempts: Vec<SprintAttempt>,
    expiry: Option<JoinHandle<()>>,
    finished: bool,
}

struct SprintInner {
    loader: QuestionLoader,
    reporter: MasteryReporter,
    key: SelectionKey,
    question_count: usize,
    state: Mutex<SprintState>,
}

impl Drop for SprintInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(expiry) = state.expiry.take() {
            expiry.abort();
        }
    }
}

#[derive(Clone)]
pub struct SprintSession {
    inner: Arc<SprintInner>,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl SprintSession {
    #[must_use]
    pub fn new(
        loader: QuestionLoader,
        reporter: MasteryReporter,
        key: SelectionKey,
        question_count: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SprintInner {
                loader,
                reporter,
                key,
                question_count,
                state: Mutex::new(SprintState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SprintState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn key(&self) -> &SelectionKey {
        &self.inner.key
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.inner.loader.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> DisplayState {
        self.inner.loader.snapshot()
    }

    /// Time limit of the question on screen.
    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        self.state().current.as_ref().map(|c| c.limit)
    }

    #[must_use]
    pub fn attempts(&self) -> Vec<SprintAttempt> {
        self.state().attempts.clone()
    }

    #[must_use]
    pub fn tally(&self) -> SprintTally {
        SprintTally::from_attempts(&self.state().attempts)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().finished
    }

    /// Start (or restart) the sprint at its first question.
    ///
    /// # Errors
    ///
    /// Returns the `DeliveryError` shown to the learner when nothing could be loaded.
    pub async fn start(&self) -> Result<(), DeliveryError> {
        {
            let mut state = self.state();
            if let Some(expiry) = state.expiry.take() {
                expiry.abort();
            }
            *state = SprintState::default();
        }
        info!(selection = %self.inner.key, questions = self.inner.question_count, "sprint started");
        if self.inner.question_count == 0 {
            self.state().finished = true;
            return Ok(());
        }
        self.load(0).await
    }

    /// Answer the question on screen. Returns `None` when there is nothing to answer
    /// or the question was already settled.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` if the next question cannot be loaded.
    pub async fn answer(&self, option: usize) -> Result<Option<SprintAttempt>, DeliveryError> {
        self.settle(Settle::Click(option)).await
    }

    /// Skip the question on screen without answering.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` if the next question cannot be loaded.
    pub async fn skip(&self) -> Result<Option<SprintAttempt>, DeliveryError> {
        self.settle(Settle::Skip).await
    }

    /// Time ran out on the question on screen; counts as wrong at the full limit.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` if the next question cannot be loaded.
    pub async fn expire(&self) -> Result<Option<SprintAttempt>, DeliveryError> {
        self.settle(Settle::Timeout).await
    }

    async fn settle(&self, action: Settle) -> Result<Option<SprintAttempt>, DeliveryError> {
        let elapsed = self.inner.loader.elapsed();
        let (token, attempt, record, next) = {
            let mut state = self.state();
            if let Some(task) = state.expiry.take() {
                // The timeout path runs inside this task.
                if !matches!(action, Settle::Timeout) {
                    task.abort();
                }
            }
            let Some(current) = state.current.take() else {
                return Ok(None);
            };
            if !self.inner.loader.is_current(current.token) {
                return Ok(None);
            }

            let limit_ms = millis(current.limit);
            let (result, time_ms, input, selected) = match action {
                Settle::Click(option) => {
                    let result = if current.question.is_correct(option) {
                        SprintResult::Correct
                    } else {
                        SprintResult::Wrong
                    };
                    (result, millis(elapsed).min(limit_ms), SprintInput::Click, option)
                }
                Settle::Skip => (
                    SprintResult::Skipped,
                    millis(elapsed).min(limit_ms),
                    SprintInput::Click,
                    NO_OPTION,
                ),
                Settle::Timeout => (SprintResult::Wrong, limit_ms, SprintInput::Timeout, NO_OPTION),
            };
            let is_correct = result == SprintResult::Correct;
            let attempt = SprintAttempt {
                question_id: current.question.id(),
                result,
                time_ms,
                score: sprint_score(is_correct, time_ms),
                input,
            };
            let record = AttemptRecord {
                question_id: current.question.id(),
                pattern_tag: current.question.pattern_tag().clone(),
                is_correct,
                time_ms,
                target_time_ms: u64::from(FALLBACK_TIME_LIMIT_SECS) * 1000,
                selected_option_index: selected,
                skip_drill: false,
            };
            state.attempts.push(attempt.clone());
            let next = if state.attempts.len() >= self.inner.question_count {
                state.finished = true;
                None
            } else {
                Some(state.index + 1)
            };
            (current.token, attempt, record, next)
        };

        self.inner.loader.stop_timer();
        if let Settle::Click(option) = action {
            self.inner.loader.select_option(option);
        }
        debug!(
            question = %attempt.question_id,
            result = ?attempt.result,
            time_ms = attempt.time_ms,
            score = attempt.score,
            "sprint question settled"
        );
        // Failures are logged by the reporter and never stop the sprint.
        let _ = self.inner.reporter.report(&record).await;
        if !self.inner.loader.is_current(token) {
            debug!(question = %attempt.question_id, "sprint restarted while reporting");
            return Ok(Some(attempt));
        }

        match next {
            Some(index) => self.load(index).await?,
            None => {
                let tally = self.tally();
                info!(
                    selection = %self.inner.key,
                    correct = tally.correct,
                    total_score = tally.total_score,
                    "sprint finished"
                );
            }
        }
        Ok(Some(attempt))
    }

    async fn load(&self, index: usize) -> Result<(), DeliveryError> {
        let shown = match self.inner.loader.load(&self.inner.key, index).await {
            Ok(shown) => shown,
            Err(DeliveryError::StaleRequestDiscarded) => return Ok(()),
            Err(err) => return Err(err),
        };

        let profile = self.inner.key.exam_profile();
        let limit = shown
            .question
            .target_time(profile)
            .unwrap_or_else(|| profile.default_time_limit());
        {
            let mut state = self.state();
            if !self.inner.loader.is_current(shown.token) {
                return Ok(());
            }
            state.index = index;
            state.current = Some(Current {
                token: shown.token,
                question: shown.question,
                limit,
            });
        }
        self.arm_expiry(shown.token, limit);
        Ok(())
    }

    fn arm_expiry(&self, token: LoadToken, limit: Duration) {
        let session = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            if !session.inner.loader.is_current(token) {
                return;
            }
            if let Err(err) = session.expire().await {
                debug!(error = %err, "loading after timeout failed");
            }
        });
        if let Some(previous) = self.state().expiry.replace(task) {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(result: SprintResult, time_ms: u64, score: u32) -> SprintAttempt {
        SprintAttempt {
            question_id: QuestionId::generate(),
            result,
            time_ms,
            score,
            input: SprintInput::Click,
        }
    }

    #[test]
    fn tally_counts_and_averages() {
        let tally = SprintTally::from_attempts(&[
            attempt(SprintResult::Correct, 10_000, 14),
            attempt(SprintResult::Wrong, 20_000, 0),
            attempt(SprintResult::Skipped, 3_000, 0),
        ]);
        assert_eq!(tally.total, 3);
        assert_eq!(tally.correct, 1);
        assert_eq!(tally.wrong, 1);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.total_score, 14);
        assert_eq!(tally.avg_time_ms, 11_000);
    }

    #[test]
    fn empty_tally_is_zero() {
        assert_eq!(SprintTally::from_attempts(&[]), SprintTally::default());
    }
}
