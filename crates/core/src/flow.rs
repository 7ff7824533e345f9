//! Post-answer pedagogical flow for a practice session.
//!
//! `FlowMachine` is a pure reducer: it consumes `FlowEvent`s and returns the
//! `FlowEffect`s a controller must carry out. Only the submit and skip transitions
//! can produce `FlowEffect::ReportAttempt`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::model::{
    AttemptRecord, ExamProfile, FALLBACK_TIME_LIMIT_SECS, PatternTag, Question, QuestionId,
};

//
// ─── STATES ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowState {
    #[default]
    Question,
    SuccessToast,
    Intervention,
    Reflection,
    Fsm,
    Reinforce,
    MiniPractice,
    Feedback,
}

impl FlowState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FlowState::Question => "question",
            FlowState::SuccessToast => "success-toast",
            FlowState::Intervention => "intervention",
            FlowState::Reflection => "reflection",
            FlowState::Fsm => "fsm",
            FlowState::Reinforce => "reinforce",
            FlowState::MiniPractice => "mini-practice",
            FlowState::Feedback => "feedback",
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a non-success answer leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowMode {
    /// Intervention with "prove it" drills and debt-marking skips.
    #[default]
    Mastery,
    /// Legacy reinforcement: reflection, method review, reinforce menu.
    Reflective,
}

impl FromStr for FlowMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mastery" => Ok(FlowMode::Mastery),
            "reflective" => Ok(FlowMode::Reflective),
            other => Err(format!("unknown flow mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionReason {
    Guessed,
    Tried,
    Knew,
    Froze,
}

impl FromStr for ReflectionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guessed" => Ok(ReflectionReason::Guessed),
            "tried" => Ok(ReflectionReason::Tried),
            "knew" => Ok(ReflectionReason::Knew),
            "froze" => Ok(ReflectionReason::Froze),
            other => Err(format!("unknown reflection reason: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniPracticeResult {
    pub correct: u32,
    pub total: u32,
    pub elapsed: Duration,
}

//
// ─── EVENTS & EFFECTS ─────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    Submit { selected: usize, elapsed: Duration },
    /// The mastery call for the last submit returned (successfully or not).
    ReportSettled,
    ToastElapsed,
    ProveIt,
    DrillFound(QuestionContext),
    DrillMissing,
    DrillFailed,
    SkipIntervention,
    Reflect,
    ChooseReflection(ReflectionReason),
    Continue,
    PracticeSimilar,
    CompleteMiniPractice(MiniPracticeResult),
    AddToQueue,
    SkipReinforcement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowNotice {
    NoDrillAvailable,
    DrillFetchFailed,
}

impl fmt::Display for FlowNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowNotice::NoDrillAvailable => f.write_str("No drill variants available for this pattern yet."),
            FlowNotice::DrillFetchFailed => f.write_str("Failed to load drill question. Please try again."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEffect {
    StopTimer,
    ReportAttempt(AttemptRecord),
    ScheduleToast,
    FetchDrill {
        pattern_tag: PatternTag,
        exclude: QuestionId,
    },
    QueueForReview(QuestionId),
    Advance,
    Notice(FlowNotice),
}

//
// ─── CONTEXT ──────────────────────────────────────────────────────────────────
//

/// What the flow needs to know about the displayed question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionContext {
    pub question_id: QuestionId,
    pub pattern_tag: PatternTag,
    pub correct_option_index: usize,
    pub target_time: Duration,
}

impl QuestionContext {
    /// Context for `question` under `profile`; the target time falls back to
    /// `default_target` when the question defines none for the profile.
    #[must_use]
    pub fn new(question: &Question, profile: ExamProfile, default_target: Duration) -> Self {
        Self {
            question_id: question.id(),
            pattern_tag: question.pattern_tag().clone(),
            correct_option_index: question.correct_option_index(),
            target_time: question.target_time(profile).unwrap_or(default_target),
        }
    }

    /// Context using the question's own profile and the 45 s fallback.
    #[must_use]
    pub fn for_question(question: &Question) -> Self {
        Self::new(
            question,
            question.exam_profile(),
            Duration::from_secs(u64::from(FALLBACK_TIME_LIMIT_SECS)),
        )
    }
}

/// The learner's last answer on the displayed question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerSnapshot {
    pub selected: usize,
    pub elapsed: Duration,
    pub is_correct: bool,
    pub is_fast: bool,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

//
// ─── MACHINE ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
pub struct FlowMachine {
    mode: FlowMode,
    state: FlowState,
    context: Option<QuestionContext>,
    last_answer: Option<AnswerSnapshot>,
    reporting: bool,
    drill_pending: bool,
    reflection: Option<ReflectionReason>,
    mini_practice: Option<MiniPracticeResult>,
}

impl FlowMachine {
    #[must_use]
    pub fn new(mode: FlowMode) -> Self {
        Self {
            mode,
            state: FlowState::Question,
            context: None,
            last_answer: None,
            reporting: false,
            drill_pending: false,
            reflection: None,
            mini_practice: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    #[must_use]
    pub fn state(&self) -> FlowState {
        self.state
    }

    #[must_use]
    pub fn context(&self) -> Option<&QuestionContext> {
        self.context.as_ref()
    }

    #[must_use]
    pub fn last_answer(&self) -> Option<AnswerSnapshot> {
        self.last_answer
    }

    /// True while a submit's mastery call is outstanding.
    #[must_use]
    pub fn is_reporting(&self) -> bool {
        self.reporting
    }

    #[must_use]
    pub fn reflection(&self) -> Option<ReflectionReason> {
        self.reflection
    }

    #[must_use]
    pub fn mini_practice_result(&self) -> Option<MiniPracticeResult> {
        self.mini_practice
    }

    /// A new question is on screen: reset to `Question`.
    pub fn present(&mut self, context: QuestionContext) {
        *self = Self {
            context: Some(context),
            ..Self::new(self.mode)
        };
    }

    /// The displayed question went away (a new load started).
    pub fn clear(&mut self) {
        *self = Self::new(self.mode);
    }

    /// Apply an event and return the effects to carry out.
    ///
    /// Events that are not valid in the current state are ignored and yield no
    /// effects.
    pub fn handle(&mut self, event: FlowEvent) -> Vec<FlowEffect> {
        match (self.state, event) {
            (FlowState::Question, FlowEvent::Submit { selected, elapsed }) => {
                self.submit(selected, elapsed)
            }
            (FlowState::Question, FlowEvent::ReportSettled) if self.reporting => {
                self.settle_report()
            }
            (FlowState::SuccessToast, FlowEvent::ToastElapsed) => self.advance(Vec::new()),

            (FlowState::Intervention, FlowEvent::ProveIt) => self.prove_it(),
            (FlowState::Intervention, FlowEvent::DrillFound(context)) if self.drill_pending => {
                self.present(context);
                Vec::new()
            }
            (FlowState::Intervention, FlowEvent::DrillMissing) if self.drill_pending => {
                self.drill_pending = false;
                vec![FlowEffect::Notice(FlowNotice::NoDrillAvailable)]
            }
            (FlowState::Intervention, FlowEvent::DrillFailed) if self.drill_pending => {
                self.drill_pending = false;
                vec![FlowEffect::Notice(FlowNotice::DrillFetchFailed)]
            }
            (FlowState::Intervention, FlowEvent::SkipIntervention) => self.skip_with_debt(),
            (FlowState::Intervention, FlowEvent::Reflect) => {
                self.drill_pending = false;
                self.state = FlowState::Reflection;
                Vec::new()
            }

            (FlowState::Reflection, FlowEvent::ChooseReflection(reason)) => {
                self.reflection = Some(reason);
                self.state = FlowState::Fsm;
                Vec::new()
            }
            (FlowState::Fsm, FlowEvent::Continue) => {
                self.state = FlowState::Reinforce;
                Vec::new()
            }
            (FlowState::Reinforce, FlowEvent::PracticeSimilar) => {
                self.state = FlowState::MiniPractice;
                Vec::new()
            }
            (FlowState::Reinforce, FlowEvent::AddToQueue) => {
                let queued = self
                    .context
                    .as_ref()
                    .map(|c| FlowEffect::QueueForReview(c.question_id));
                self.advance(queued.into_iter().collect())
            }
            (FlowState::Reinforce, FlowEvent::SkipReinforcement) => self.advance(Vec::new()),
            (FlowState::MiniPractice, FlowEvent::CompleteMiniPractice(result)) => {
                self.mini_practice = Some(result);
                self.state = FlowState::Feedback;
                Vec::new()
            }
            (FlowState::Feedback, FlowEvent::Continue) => self.advance(Vec::new()),

            _ => Vec::new(),
        }
    }

    fn submit(&mut self, selected: usize, elapsed: Duration) -> Vec<FlowEffect> {
        // Rage-click guard, and no second record for an answered question.
        if self.reporting || self.last_answer.is_some() {
            return Vec::new();
        }
        let Some(context) = self.context.as_ref() else {
            return Vec::new();
        };

        let is_correct = selected == context.correct_option_index;
        let is_fast = elapsed <= context.target_time;
        self.last_answer = Some(AnswerSnapshot {
            selected,
            elapsed,
            is_correct,
            is_fast,
        });
        self.reporting = true;

        let record = AttemptRecord {
            question_id: context.question_id,
            pattern_tag: context.pattern_tag.clone(),
            is_correct,
            time_ms: millis(elapsed),
            target_time_ms: millis(context.target_time),
            selected_option_index: selected,
            skip_drill: false,
        };
        vec![FlowEffect::StopTimer, FlowEffect::ReportAttempt(record)]
    }

    fn settle_report(&mut self) -> Vec<FlowEffect> {
        self.reporting = false;
        let success = self
            .last_answer
            .is_some_and(|answer| answer.is_correct && answer.is_fast);

        if success {
            self.state = FlowState::SuccessToast;
            return vec![FlowEffect::ScheduleToast];
        }
        self.state = match self.mode {
            FlowMode::Mastery => FlowState::Intervention,
            FlowMode::Reflective => FlowState::Reflection,
        };
        Vec::new()
    }

    fn prove_it(&mut self) -> Vec<FlowEffect> {
        if self.drill_pending {
            return Vec::new();
        }
        let Some(context) = self.context.as_ref() else {
            return Vec::new();
        };
        self.drill_pending = true;
        vec![FlowEffect::FetchDrill {
            pattern_tag: context.pattern_tag.clone(),
            exclude: context.question_id,
        }]
    }

    fn skip_with_debt(&mut self) -> Vec<FlowEffect> {
        let mut effects = Vec::new();
        if let (Some(context), Some(answer)) = (self.context.as_ref(), self.last_answer) {
            effects.push(FlowEffect::ReportAttempt(AttemptRecord {
                question_id: context.question_id,
                pattern_tag: context.pattern_tag.clone(),
                is_correct: answer.is_correct,
                time_ms: millis(answer.elapsed),
                target_time_ms: millis(context.target_time),
                selected_option_index: answer.selected,
                skip_drill: true,
            }));
        }
        self.advance(effects)
    }

    fn advance(&mut self, mut effects: Vec<FlowEffect>) -> Vec<FlowEffect> {
        self.clear();
        effects.push(FlowEffect::Advance);
        effects
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> QuestionContext {
        QuestionContext {
            question_id: QuestionId::generate(),
            pattern_tag: PatternTag::new("ratio-inverse-prop").unwrap(),
            correct_option_index: 1,
            target_time: Duration::from_secs(45),
        }
    }

    fn machine(mode: FlowMode) -> FlowMachine {
        let mut m = FlowMachine::new(mode);
        m.present(context());
        m
    }

    fn reports(effects: &[FlowEffect]) -> Vec<&AttemptRecord> {
        effects
            .iter()
            .filter_map(|e| match e {
                FlowEffect::ReportAttempt(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    fn submit(selected: usize, secs: u64) -> FlowEvent {
        FlowEvent::Submit {
            selected,
            elapsed: Duration::from_secs(secs),
        }
    }

    #[test]
    fn fast_correct_answer_shows_toast_then_advances() {
        let mut m = machine(FlowMode::Mastery);
        let effects = m.handle(submit(1, 20));
        let records = reports(&effects);
        assert_eq!(records.len(), 1);
        assert!(!records[0].skip_drill);
        assert!(records[0].is_correct);
        assert_eq!(records[0].time_ms, 20_000);
        assert_eq!(records[0].target_time_ms, 45_000);
        assert_eq!(m.state(), FlowState::Question);

        assert_eq!(m.handle(FlowEvent::ReportSettled), vec![FlowEffect::ScheduleToast]);
        assert_eq!(m.state(), FlowState::SuccessToast);

        assert_eq!(m.handle(FlowEvent::ToastElapsed), vec![FlowEffect::Advance]);
        assert_eq!(m.state(), FlowState::Question);
        assert!(m.context().is_none());
    }

    #[test]
    fn slow_correct_answer_goes_to_intervention() {
        let mut m = machine(FlowMode::Mastery);
        m.handle(submit(1, 46));
        m.handle(FlowEvent::ReportSettled);
        assert_eq!(m.state(), FlowState::Intervention);
        let answer = m.last_answer().unwrap();
        assert!(answer.is_correct);
        assert!(!answer.is_fast);
    }

    #[test]
    fn repeated_submit_while_reporting_is_ignored() {
        let mut m = machine(FlowMode::Mastery);
        let first = m.handle(submit(0, 5));
        assert_eq!(reports(&first).len(), 1);
        for _ in 0..5 {
            assert!(m.handle(submit(0, 6)).is_empty());
        }
        assert!(m.is_reporting());
        m.handle(FlowEvent::ReportSettled);
        assert!(!m.is_reporting());
        assert_eq!(m.state(), FlowState::Intervention);
    }

    #[test]
    fn skip_emits_debt_record_and_advances() {
        let mut m = machine(FlowMode::Mastery);
        m.handle(submit(3, 12));
        m.handle(FlowEvent::ReportSettled);

        let effects = m.handle(FlowEvent::SkipIntervention);
        let records = reports(&effects);
        assert_eq!(records.len(), 1);
        assert!(records[0].skip_drill);
        assert!(!records[0].is_correct);
        assert_eq!(records[0].selected_option_index, 3);
        assert_eq!(records[0].time_ms, 12_000);
        assert_eq!(effects.last(), Some(&FlowEffect::Advance));
        assert_eq!(m.state(), FlowState::Question);

        // A second skip after advancing does nothing.
        assert!(m.handle(FlowEvent::SkipIntervention).is_empty());
    }

    #[test]
    fn prove_it_without_match_stays_in_intervention() {
        let mut m = machine(FlowMode::Mastery);
        m.handle(submit(0, 10));
        m.handle(FlowEvent::ReportSettled);

        let effects = m.handle(FlowEvent::ProveIt);
        assert!(matches!(effects.as_slice(), [FlowEffect::FetchDrill { .. }]));
        // Double tap while the lookup runs.
        assert!(m.handle(FlowEvent::ProveIt).is_empty());

        let effects = m.handle(FlowEvent::DrillMissing);
        assert_eq!(effects, vec![FlowEffect::Notice(FlowNotice::NoDrillAvailable)]);
        assert_eq!(m.state(), FlowState::Intervention);
        assert!(reports(&effects).is_empty());
    }

    #[test]
    fn prove_it_match_replaces_question_in_place() {
        let mut m = machine(FlowMode::Mastery);
        m.handle(submit(0, 10));
        m.handle(FlowEvent::ReportSettled);
        let original = m.context().unwrap().question_id;

        let effects = m.handle(FlowEvent::ProveIt);
        match &effects[0] {
            FlowEffect::FetchDrill { exclude, .. } => assert_eq!(*exclude, original),
            other => panic!("unexpected effect {other:?}"),
        }

        let drill = context();
        let drill_id = drill.question_id;
        assert!(m.handle(FlowEvent::DrillFound(drill)).is_empty());
        assert_eq!(m.state(), FlowState::Question);
        assert_eq!(m.context().unwrap().question_id, drill_id);
        assert!(m.last_answer().is_none());

        // The drill can be answered and reported.
        assert_eq!(reports(&m.handle(submit(1, 3))).len(), 1);
    }

    #[test]
    fn drill_result_after_skip_is_ignored() {
        let mut m = machine(FlowMode::Mastery);
        m.handle(submit(0, 10));
        m.handle(FlowEvent::ReportSettled);
        m.handle(FlowEvent::ProveIt);
        m.handle(FlowEvent::SkipIntervention);

        assert!(m.handle(FlowEvent::DrillFound(context())).is_empty());
        assert!(m.context().is_none());
    }

    #[test]
    fn reflective_mode_walks_legacy_branch() {
        let mut m = machine(FlowMode::Reflective);
        m.handle(submit(0, 10));
        m.handle(FlowEvent::ReportSettled);
        assert_eq!(m.state(), FlowState::Reflection);

        m.handle(FlowEvent::ChooseReflection(ReflectionReason::Guessed));
        assert_eq!(m.state(), FlowState::Fsm);
        assert_eq!(m.reflection(), Some(ReflectionReason::Guessed));

        m.handle(FlowEvent::Continue);
        assert_eq!(m.state(), FlowState::Reinforce);

        m.handle(FlowEvent::PracticeSimilar);
        assert_eq!(m.state(), FlowState::MiniPractice);

        let result = MiniPracticeResult {
            correct: 2,
            total: 3,
            elapsed: Duration::from_secs(50),
        };
        assert!(m.handle(FlowEvent::CompleteMiniPractice(result)).is_empty());
        assert_eq!(m.state(), FlowState::Feedback);
        assert_eq!(m.mini_practice_result(), Some(result));

        let effects = m.handle(FlowEvent::Continue);
        assert_eq!(effects, vec![FlowEffect::Advance]);
        assert_eq!(m.state(), FlowState::Question);
    }

    #[test]
    fn intervention_can_enter_reflection() {
        let mut m = machine(FlowMode::Mastery);
        m.handle(submit(2, 10));
        m.handle(FlowEvent::ReportSettled);
        m.handle(FlowEvent::Reflect);
        assert_eq!(m.state(), FlowState::Reflection);
    }

    #[test]
    fn add_to_queue_records_question_and_advances() {
        let mut m = machine(FlowMode::Reflective);
        let id = m.context().unwrap().question_id;
        m.handle(submit(0, 10));
        m.handle(FlowEvent::ReportSettled);
        m.handle(FlowEvent::ChooseReflection(ReflectionReason::Froze));
        m.handle(FlowEvent::Continue);

        let effects = m.handle(FlowEvent::AddToQueue);
        assert_eq!(effects, vec![FlowEffect::QueueForReview(id), FlowEffect::Advance]);
    }

    #[test]
    fn legacy_branch_never_reports() {
        let mut m = machine(FlowMode::Reflective);
        m.handle(submit(0, 10));
        m.handle(FlowEvent::ReportSettled);
        let events = [
            FlowEvent::ChooseReflection(ReflectionReason::Tried),
            FlowEvent::Continue,
            FlowEvent::SkipReinforcement,
        ];
        for event in events {
            assert!(reports(&m.handle(event)).is_empty());
        }
        assert_eq!(m.state(), FlowState::Question);
    }

    #[test]
    fn submit_without_question_is_ignored() {
        let mut m = FlowMachine::new(FlowMode::Mastery);
        assert!(m.handle(submit(0, 1)).is_empty());
    }

    #[test]
    fn out_of_place_events_are_ignored() {
        let mut m = machine(FlowMode::Mastery);
        assert!(m.handle(FlowEvent::ToastElapsed).is_empty());
        assert!(m.handle(FlowEvent::SkipIntervention).is_empty());
        assert!(m.handle(FlowEvent::ReportSettled).is_empty());
        assert_eq!(m.state(), FlowState::Question);
    }

    #[test]
    fn state_names_match_wire_form() {
        assert_eq!(FlowState::SuccessToast.to_string(), "success-toast");
        assert_eq!(FlowState::MiniPractice.to_string(), "mini-practice");
    }
}
