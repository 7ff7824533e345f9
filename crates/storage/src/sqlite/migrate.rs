use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs versioned migrations for the question store.
///
/// Version 1 creates the shared question cache, per-user seen marks, pattern mastery
/// and the attempt log.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS cached_questions (
                    id TEXT PRIMARY KEY,
                    exam_profile TEXT NOT NULL,
                    topic TEXT NOT NULL,
                    subtopic TEXT NOT NULL,
                    difficulty TEXT NOT NULL,
                    pattern_tag TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    created_by TEXT NOT NULL,
                    cached_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS seen_questions (
                    user_id TEXT NOT NULL,
                    question_id TEXT NOT NULL,
                    seen_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, question_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS pattern_mastery (
                    user_id TEXT NOT NULL,
                    pattern_tag TEXT NOT NULL,
                    streak INTEGER NOT NULL CHECK (streak >= 0),
                    level TEXT NOT NULL,
                    in_debt INTEGER NOT NULL CHECK (in_debt IN (0, 1)),
                    attempts INTEGER NOT NULL CHECK (attempts >= 0),
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, pattern_tag)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS attempts (
                    id INTEGER PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    question_id TEXT NOT NULL,
                    pattern_tag TEXT NOT NULL,
                    is_correct INTEGER NOT NULL CHECK (is_correct IN (0, 1)),
                    time_ms INTEGER NOT NULL CHECK (time_ms >= 0),
                    target_time_ms INTEGER NOT NULL CHECK (target_time_ms >= 0),
                    selected_option_index INTEGER NOT NULL
                        CHECK (selected_option_index BETWEEN 0 AND 3),
                    skip_drill INTEGER NOT NULL CHECK (skip_drill IN (0, 1)),
                    recorded_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_cached_questions_selection
                    ON cached_questions (exam_profile, topic, subtopic, difficulty, cached_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_cached_questions_pattern
                    ON cached_questions (pattern_tag, cached_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_attempts_user_recorded
                    ON attempts (user_id, recorded_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
