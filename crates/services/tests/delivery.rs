mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, ScriptedGenerator, key, key_for, question, settle};
use drill_core::flow::FlowState;
use drill_core::model::UserId;
use services::{
    Advisory, AuthProvider, BufferManager, DeliveryError, QuestionGenerator, QuestionSource,
    StaticAuth,
};
use storage::repository::{InMemoryRepository, QuestionRepository};

fn buffer_over(
    repo: &InMemoryRepository,
    user: UserId,
    generator: Arc<ScriptedGenerator>,
) -> BufferManager {
    let auth: Arc<dyn AuthProvider> = Arc::new(StaticAuth::signed_in(user));
    let source = QuestionSource::new(
        auth,
        Arc::new(repo.clone()),
        generator as Arc<dyn QuestionGenerator>,
        Duration::ZERO,
    );
    BufferManager::new(source)
}

#[tokio::test(start_paused = true)]
async fn only_the_last_selection_change_is_applied() {
    let h = Harness::new(ScriptedGenerator::new().with_latency(Duration::from_millis(300)));
    let session = h.services.practice(key());
    let (first, second, last) = (key_for("pipes"), key_for("ratios"), key_for("averages"));

    let (a, b, c) = tokio::join!(
        session.change_selection(first),
        session.change_selection(second),
        session.change_selection(last.clone()),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.key, Some(last.clone()));
    assert_eq!(snapshot.index, 0);
    assert!(!snapshot.loading);
    let shown = snapshot.question.unwrap();
    assert_eq!(shown.selection_key(), last);

    let state = session
        .submit_answer(shown.correct_option_index())
        .await
        .unwrap();
    assert_eq!(state, FlowState::SuccessToast);
}

#[tokio::test]
async fn seen_questions_are_never_buffered() {
    let user = UserId::generate();
    let other = UserId::generate();
    let repo = InMemoryRepository::new();
    let key = key();

    let cached: Vec<_> = (0..3).map(|n| question(&key, n, "work-rate")).collect();
    for q in &cached {
        repo.cache_question(other, &key, q).await.unwrap();
    }
    repo.mark_seen(user, &[cached[0].id()]).await.unwrap();

    let generator = Arc::new(ScriptedGenerator::new());
    let buffer = buffer_over(&repo, user, Arc::clone(&generator));

    let top_up = buffer.ensure_buffer(&key, 3).await.unwrap();
    assert_eq!(top_up.added, 4);
    assert_eq!(generator.calls(), 2);

    let buffered: Vec<_> = (0..4).filter_map(|i| buffer.get(&key, i)).collect();
    assert_eq!(buffered[0].id(), cached[1].id());
    assert_eq!(buffered[1].id(), cached[2].id());
    assert!(buffered.iter().all(|q| q.id() != cached[0].id()));
    for q in &buffered {
        assert!(repo.is_seen(user, q.id()).unwrap());
    }

    let again = buffer.ensure_buffer(&key, 5).await.unwrap();
    assert_eq!(again.added, 2);
    assert!((0..6).filter_map(|i| buffer.get(&key, i)).all(|q| q.id() != cached[0].id()));
}

#[tokio::test(start_paused = true)]
async fn concurrent_top_ups_share_one_fetch() {
    let user = UserId::generate();
    let repo = InMemoryRepository::new();
    let key = key();
    let generator = Arc::new(ScriptedGenerator::new().with_latency(Duration::from_millis(50)));
    let buffer = buffer_over(&repo, user, Arc::clone(&generator));

    let (a, b) = tokio::join!(buffer.ensure_buffer(&key, 2), buffer.ensure_buffer(&key, 2));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.skipped != b.skipped);
    assert_eq!(a.added + b.added, 3);
    assert_eq!(generator.calls(), 3);
    assert_eq!(buffer.len(&key), 3);
    assert!(!buffer.is_in_flight(&key));
}

#[tokio::test]
async fn throttling_keeps_the_partial_batch() {
    let user = UserId::generate();
    let repo = InMemoryRepository::new();
    let key = key();
    let generator = Arc::new(ScriptedGenerator::new().throttle_after(1));
    let buffer = buffer_over(&repo, user, Arc::clone(&generator));

    let top_up = buffer.ensure_buffer(&key, 3).await.unwrap();

    assert_eq!(top_up.added, 1);
    assert!(top_up.throttled);
    assert_eq!(generator.calls(), 2);
    assert_eq!(buffer.len(&key), 1);
}

#[tokio::test]
async fn generation_failure_keeps_the_partial_batch() {
    let user = UserId::generate();
    let repo = InMemoryRepository::new();
    let key = key();
    let generator = Arc::new(ScriptedGenerator::new().fail_after(2));
    let buffer = buffer_over(&repo, user, Arc::clone(&generator));

    let top_up = buffer.ensure_buffer(&key, 3).await.unwrap();

    assert_eq!(top_up.added, 2);
    assert!(!top_up.throttled);
    assert_eq!(generator.calls(), 3);
    assert_eq!(buffer.len(&key), 2);
    assert!(!buffer.is_in_flight(&key));
}

#[tokio::test]
async fn generation_failure_with_nothing_obtained_is_an_error() {
    let user = UserId::generate();
    let repo = InMemoryRepository::new();
    let key = key();
    let generator = Arc::new(ScriptedGenerator::new().fail_after(0));
    let buffer = buffer_over(&repo, user, Arc::clone(&generator));

    let err = buffer.ensure_buffer(&key, 2).await.unwrap_err();

    assert_eq!(err, DeliveryError::NoQuestionsAvailable);
    assert_eq!(generator.calls(), 1);
    assert!(buffer.is_empty(&key));
    assert!(!buffer.is_in_flight(&key));
}

#[tokio::test]
async fn failed_top_up_raises_no_advisory() {
    let h = Harness::new(ScriptedGenerator::new().fail_after(1));
    let session = h.services.practice(key());

    session.load_question(0).await.unwrap();
    settle().await;

    let snapshot = session.snapshot();
    assert!(snapshot.question.is_some());
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.advisory, None);
    assert_eq!(h.generator.calls(), 2);
}

#[tokio::test]
async fn changing_selection_drops_buffers() {
    let h = Harness::new(ScriptedGenerator::new());
    let session = h.services.practice(key());

    session.load_question(0).await.unwrap();
    settle().await;

    session.change_selection(key_for("pipes")).await.unwrap();
    let shown = session.snapshot().question.unwrap();
    assert_eq!(shown.selection_key(), key_for("pipes"));
    assert_eq!(session.key(), key_for("pipes"));
}

#[tokio::test]
async fn exhausted_quota_with_empty_cache_is_soft() {
    let h = Harness::new(ScriptedGenerator::new().throttle_after(0));
    let session = h.services.practice(key());

    let err = session.load_question(0).await.unwrap_err();
    assert_eq!(err, DeliveryError::NoQuestionsAvailable);
    assert!(err.is_retryable());

    let snapshot = session.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.question.is_none());
    assert_eq!(snapshot.error, Some(DeliveryError::NoQuestionsAvailable));
    assert_eq!(snapshot.advisory, Some(Advisory::ServingFromCache));
}

#[tokio::test]
async fn cached_questions_are_served_while_throttled() {
    let h = Harness::new(ScriptedGenerator::new().throttle_after(0));
    let key = key();
    let cached = question(&key, 0, "work-rate");
    h.repo
        .cache_question(UserId::generate(), &key, &cached)
        .await
        .unwrap();

    let session = h.services.practice(key);
    session.load_question(0).await.unwrap();

    assert_eq!(session.snapshot().question.unwrap().id(), cached.id());
}

#[tokio::test]
async fn anonymous_learner_must_sign_in() {
    let h = Harness::anonymous(ScriptedGenerator::new());
    let session = h.services.practice(key());

    let err = session.load_question(0).await.unwrap_err();
    assert_eq!(err, DeliveryError::AuthRequired);
    assert_eq!(session.snapshot().error, Some(DeliveryError::AuthRequired));
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn preloaded_question_is_served_first_once() {
    let h = Harness::new(ScriptedGenerator::new());
    let key = key();
    let preloader = h.services.preloader();

    assert!(preloader.preload(&key).await);
    assert!(preloader.is_ready(&key));
    let preloaded = h.generator.generated()[0];
    assert!(h.repo.is_seen(h.user, preloaded).unwrap());

    let session = h.services.practice(key.clone());
    session.load_question(0).await.unwrap();

    assert_eq!(session.snapshot().question.unwrap().id(), preloaded);
    assert!(!preloader.is_ready(&key));
    assert_eq!(h.services.unseen_count(&key).await.unwrap(), 0);
}
