//! Practice session controller: runs the flow machine and carries out its effects.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use drill_core::flow::{
    FlowEffect, FlowEvent, FlowMachine, FlowState, MiniPracticeResult, QuestionContext,
    ReflectionReason,
};
use drill_core::model::{Question, QuestionId, SelectionKey};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::loader::{DisplayState, QuestionLoader, Shown};
use crate::mastery::MasteryReporter;

struct PracticeInner {
    loader: QuestionLoader,
    reporter: MasteryReporter,
    config: DeliveryConfig,
    key: Mutex<SelectionKey>,
    machine: Mutex<FlowMachine>,
    toast: Mutex<Option<JoinHandle<()>>>,
    review_queue: Mutex<Vec<QuestionId>>,
}

impl Drop for PracticeInner {
    fn drop(&mut self) {
        if let Some(toast) = self
            .toast
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            toast.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One learner's adaptive practice session.
#[derive(Clone)]
pub struct PracticeSession {
    inner: Arc<PracticeInner>,
}

impl PracticeSession {
    #[must_use]
    pub fn new(
        loader: QuestionLoader,
        reporter: MasteryReporter,
        config: DeliveryConfig,
        key: SelectionKey,
    ) -> Self {
        Self {
            inner: Arc::new(PracticeInner {
                loader,
                reporter,
                config,
                key: Mutex::new(key),
                machine: Mutex::new(FlowMachine::new(config.flow_mode)),
                toast: Mutex::new(None),
                review_queue: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> SelectionKey {
        lock(&self.inner.key).clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.inner.loader.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> DisplayState {
        self.inner.loader.snapshot()
    }

    #[must_use]
    pub fn flow_state(&self) -> FlowState {
        lock(&self.inner.machine).state()
    }

    #[must_use]
    pub fn reflection(&self) -> Option<ReflectionReason> {
        lock(&self.inner.machine).reflection()
    }

    #[must_use]
    pub fn mini_practice_result(&self) -> Option<MiniPracticeResult> {
        lock(&self.inner.machine).mini_practice_result()
    }

    /// Questions the learner queued for later review, oldest first.
    #[must_use]
    pub fn review_queue(&self) -> Vec<QuestionId> {
        lock(&self.inner.review_queue).clone()
    }

    /// Load and show the question at `index` for the current selection.
    ///
    /// A load superseded by a newer one returns `Ok(())` and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns the `DeliveryError` shown to the learner when nothing could be loaded.
    pub async fn load_question(&self, index: usize) -> Result<(), DeliveryError> {
        let key = self.key();
        {
            let mut machine = lock(&self.inner.machine);
            machine.clear();
            self.publish_flow(&machine);
        }

        match self.inner.loader.load(&key, index).await {
            Ok(shown) => {
                self.present(&key, &shown);
                Ok(())
            }
            Err(DeliveryError::StaleRequestDiscarded) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Switch to another practice context: drop every buffer and load its first
    /// question.
    ///
    /// # Errors
    ///
    /// Returns the `DeliveryError` shown to the learner when nothing could be loaded.
    pub async fn change_selection(&self, key: SelectionKey) -> Result<(), DeliveryError> {
        info!(selection = %key, "selection changed");
        self.cancel_toast();
        self.inner.loader.buffer().invalidate_all();
        *lock(&self.inner.key) = key;
        self.load_question(0).await
    }

    /// Answer the displayed question. Ignored while a previous answer is still
    /// being recorded.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` only if advancing afterwards fails.
    pub async fn submit_answer(&self, option: usize) -> Result<FlowState, DeliveryError> {
        let elapsed = self.inner.loader.elapsed();
        let displayed = self.snapshot().question.map(|q| q.id());

        let effects = {
            let mut machine = lock(&self.inner.machine);
            if machine.context().map(|c| c.question_id) != displayed {
                return Ok(machine.state());
            }
            let effects = machine.handle(FlowEvent::Submit {
                selected: option,
                elapsed,
            });
            self.publish_flow(&machine);
            effects
        };
        if effects.is_empty() {
            debug!(option, "submit ignored");
            return Ok(self.flow_state());
        }
        self.inner.loader.select_option(option);
        self.run(effects).await
    }

    /// Fetch a drill with the same pattern and swap it in.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible like the other flow operations.
    pub async fn prove_it(&self) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::ProveIt).await
    }

    /// Skip the drill: records debt and moves on.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` if loading the next question fails.
    pub async fn skip_intervention(&self) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::SkipIntervention).await
    }

    /// Leave the intervention for the reflective review.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible like the other flow operations.
    pub async fn reflect(&self) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::Reflect).await
    }

    /// # Errors
    ///
    /// Never fails today; kept fallible like the other flow operations.
    pub async fn choose_reflection(
        &self,
        reason: ReflectionReason,
    ) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::ChooseReflection(reason)).await
    }

    /// # Errors
    ///
    /// Returns a `DeliveryError` if continuing advances and the next load fails.
    pub async fn continue_flow(&self) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::Continue).await
    }

    /// # Errors
    ///
    /// Never fails today; kept fallible like the other flow operations.
    pub async fn practice_similar(&self) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::PracticeSimilar).await
    }

    /// # Errors
    ///
    /// Never fails today; kept fallible like the other flow operations.
    pub async fn complete_mini_practice(
        &self,
        result: MiniPracticeResult,
    ) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::CompleteMiniPractice(result)).await
    }

    /// # Errors
    ///
    /// Returns a `DeliveryError` if loading the next question fails.
    pub async fn add_to_queue(&self) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::AddToQueue).await
    }

    /// # Errors
    ///
    /// Returns a `DeliveryError` if loading the next question fails.
    pub async fn skip_reinforcement(&self) -> Result<FlowState, DeliveryError> {
        self.dispatch(FlowEvent::SkipReinforcement).await
    }

    async fn dispatch(&self, event: FlowEvent) -> Result<FlowState, DeliveryError> {
        let effects = self.handle(event);
        self.run(effects).await
    }

    fn handle(&self, event: FlowEvent) -> Vec<FlowEffect> {
        let mut machine = lock(&self.inner.machine);
        let effects = machine.handle(event);
        self.publish_flow(&machine);
        effects
    }

    fn publish_flow(&self, machine: &FlowMachine) {
        let flow = machine.state();
        self.inner.loader.publish(|state| state.flow = flow);
    }

    fn present(&self, key: &SelectionKey, shown: &Shown) {
        let context = QuestionContext::new(
            &shown.question,
            key.exam_profile(),
            self.inner.config.default_target,
        );
        let mut machine = lock(&self.inner.machine);
        if self.inner.loader.is_current(shown.token) {
            machine.present(context);
            self.publish_flow(&machine);
        }
    }

    /// Execute effects in order. When the question changes under an awaited effect,
    /// the rest of the batch belongs to the old question and is dropped.
    async fn run(&self, effects: Vec<FlowEffect>) -> Result<FlowState, DeliveryError> {
        let mut queue: VecDeque<FlowEffect> = effects.into();
        let mut outcome = Ok(());

        while let Some(effect) = queue.pop_front() {
            match effect {
                FlowEffect::StopTimer => self.inner.loader.stop_timer(),
                FlowEffect::ReportAttempt(record) => {
                    let token = self.inner.loader.current_token();
                    let reported = self.inner.reporter.report(&record).await;
                    if !self.inner.loader.is_current(token) {
                        debug!(question = %record.question_id, "question changed while reporting");
                        break;
                    }
                    if let Ok(result) = reported {
                        self.inner.loader.publish(|state| state.mastery = Some(result));
                    }
                    queue.extend(self.handle(FlowEvent::ReportSettled));
                }
                FlowEffect::ScheduleToast => self.schedule_toast(),
                FlowEffect::FetchDrill {
                    pattern_tag,
                    exclude,
                } => {
                    let token = self.inner.loader.current_token();
                    let found = self.inner.reporter.find_drill(&pattern_tag, exclude).await;
                    if !self.inner.loader.is_current(token) {
                        debug!(pattern = %pattern_tag, "question changed while looking up a drill");
                        break;
                    }
                    let follow_up = match found {
                        Ok(Some(drill)) => self.swap_in_drill(drill),
                        Ok(None) => self.handle(FlowEvent::DrillMissing),
                        Err(_) => self.handle(FlowEvent::DrillFailed),
                    };
                    queue.extend(follow_up);
                }
                FlowEffect::QueueForReview(id) => {
                    lock(&self.inner.review_queue).push(id);
                }
                FlowEffect::Advance => {
                    let next = self.snapshot().index + 1;
                    if let Err(err) = self.load_question(next).await {
                        outcome = Err(err);
                    }
                }
                FlowEffect::Notice(notice) => {
                    self.inner.loader.publish(|state| state.notice = Some(notice));
                }
            }
        }

        outcome.map(|()| self.flow_state())
    }

    fn swap_in_drill(&self, drill: Question) -> Vec<FlowEffect> {
        let key = self.key();
        let context =
            QuestionContext::new(&drill, key.exam_profile(), self.inner.config.default_target);
        let drill_id = drill.id();

        let (effects, accepted) = {
            let mut machine = lock(&self.inner.machine);
            let effects = machine.handle(FlowEvent::DrillFound(context));
            self.publish_flow(&machine);
            let accepted = machine.context().is_some_and(|c| c.question_id == drill_id);
            (effects, accepted)
        };
        if accepted {
            debug!(question = %drill_id, "drill swapped in");
            if self.inner.loader.replace_current(drill).is_err() {
                debug!(question = %drill_id, "drill superseded by a newer load");
            }
        }
        effects
    }

    fn schedule_toast(&self) {
        let session = self.clone();
        let token = self.inner.loader.current_token();
        let delay = self.inner.config.toast;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !session.inner.loader.is_current(token) {
                return;
            }
            if let Err(err) = session.dispatch(FlowEvent::ToastElapsed).await {
                debug!(error = %err, "auto-advance failed");
            }
        });
        // A superseded toast sees a stale token and exits on its own.
        *lock(&self.inner.toast) = Some(task);
    }

    fn cancel_toast(&self) {
        if let Some(toast) = lock(&self.inner.toast).take() {
            toast.abort();
        }
    }
}
