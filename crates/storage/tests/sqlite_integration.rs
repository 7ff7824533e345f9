use drill_core::model::{
    AttemptRecord, Difficulty, ExamProfile, MasteryLevel, Question, QuestionDraft, QuestionId,
    SelectionKey, UserId,
};
use drill_core::time::fixed_clock;
use storage::repository::{MasteryRepository, QuestionRepository, Storage, StorageError};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url)
        .await
        .expect("connect")
        .with_clock(fixed_clock());
    repo.migrate().await.expect("migrate");
    repo
}

fn key() -> SelectionKey {
    SelectionKey::new(
        ExamProfile::JeeMain,
        "Laws of Motion",
        "Free Body Diagrams",
        Difficulty::Medium,
    )
    .unwrap()
}

fn build_question(key: &SelectionKey, tag: &str) -> Question {
    QuestionDraft {
        text: "Block on an incline, find the normal force.".into(),
        options: vec!["mg".into(), "mg cos θ".into(), "mg sin θ".into(), "0".into()],
        correct_option_index: 1,
        pattern_tag: Some(tag.into()),
        ..QuestionDraft::default()
    }
    .validate(QuestionId::generate(), key)
    .unwrap()
}

#[tokio::test]
async fn sqlite_serves_unseen_questions_in_cache_order() {
    let repo = connect("memdb_unseen").await;
    let user = UserId::generate();
    let k = key();

    let first = build_question(&k, "incline-normal-force");
    let second = build_question(&k, "incline-normal-force");
    repo.cache_question(user, &k, &first).await.unwrap();
    repo.cache_question(user, &k, &second).await.unwrap();

    let unseen = repo.get_unseen_questions(user, &k, 5).await.unwrap();
    assert_eq!(unseen, vec![first.clone(), second.clone()]);

    repo.mark_seen(user, &[first.id()]).await.unwrap();
    repo.mark_seen(user, &[first.id()]).await.unwrap();
    let unseen = repo.get_unseen_questions(user, &k, 5).await.unwrap();
    assert_eq!(unseen, vec![second]);
    assert_eq!(repo.unseen_count(user, &k).await.unwrap(), 1);

    let other_user = UserId::generate();
    assert_eq!(repo.unseen_count(other_user, &k).await.unwrap(), 2);
}

#[tokio::test]
async fn sqlite_label_and_value_keys_share_rows() {
    let repo = connect("memdb_label_value").await;
    let user = UserId::generate();
    let by_label = key();
    let by_value = SelectionKey::new(
        ExamProfile::JeeMain,
        "laws-of-motion",
        "free-body-diagrams",
        Difficulty::Medium,
    )
    .unwrap();

    repo.cache_question(user, &by_label, &build_question(&by_label, "fbd-basics"))
        .await
        .unwrap();
    assert_eq!(repo.unseen_count(user, &by_value).await.unwrap(), 1);
    assert_eq!(
        repo.unseen_count(user, &by_value.with_difficulty(Difficulty::Hard))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn sqlite_rejects_duplicate_cache_entries() {
    let repo = connect("memdb_duplicate").await;
    let user = UserId::generate();
    let k = key();
    let q = build_question(&k, "fbd-basics");

    assert_eq!(repo.cache_question(user, &k, &q).await.unwrap(), q.id());
    let err = repo.cache_question(user, &k, &q).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
}

#[tokio::test]
async fn sqlite_tracks_mastery_and_drills() {
    let repo = connect("memdb_mastery").await;
    let user = UserId::generate();
    let k = key();
    let original = build_question(&k, "incline-normal-force");
    let variant = build_question(&k, "incline-normal-force");
    repo.cache_question(user, &k, &original).await.unwrap();
    repo.cache_question(user, &k, &variant).await.unwrap();

    let drill = repo
        .question_by_pattern_tag(original.pattern_tag(), original.id())
        .await
        .unwrap();
    assert_eq!(drill, Some(variant.clone()));

    let none = repo
        .question_by_pattern_tag(
            &drill_core::model::PatternTag::new("no-such-pattern").unwrap(),
            original.id(),
        )
        .await
        .unwrap();
    assert!(none.is_none());

    let mut record = AttemptRecord {
        question_id: original.id(),
        pattern_tag: original.pattern_tag().clone(),
        is_correct: true,
        time_ms: 12_000,
        target_time_ms: 60_000,
        selected_option_index: 1,
        skip_drill: false,
    };
    for _ in 0..3 {
        repo.report_attempt(user, &record).await.unwrap();
    }
    let stats = repo.mastery_for_user(user).await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].progress.level, MasteryLevel::Verified);
    assert_eq!(stats[0].progress.attempts, 3);

    record.skip_drill = true;
    record.is_correct = false;
    let result = repo.report_attempt(user, &record).await.unwrap();
    assert!(result.is_now_in_debt);
    assert_eq!(result.new_streak, 0);
}

#[tokio::test]
async fn sqlite_migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");
}

#[tokio::test]
async fn sqlite_storage_bundle_shares_one_database() {
    let storage = Storage::sqlite("sqlite:file:memdb_bundle?mode=memory&cache=shared")
        .await
        .expect("storage");
    let user = UserId::generate();
    let k = key();
    let first = build_question(&k, "incline-normal-force");
    let second = build_question(&k, "incline-normal-force");

    storage.questions.cache_question(user, &k, &first).await.unwrap();
    storage.questions.cache_question(user, &k, &second).await.unwrap();

    let drill = storage
        .mastery
        .question_by_pattern_tag(first.pattern_tag(), first.id())
        .await
        .unwrap();
    assert_eq!(drill, Some(second));
}
