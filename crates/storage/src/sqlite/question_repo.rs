use drill_core::model::{Question, QuestionId, SelectionKey, UserId};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{conn, key_columns, map_question_row, question_payload, ser},
};
use crate::repository::{QuestionRepository, StorageError};

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn get_unseen_questions(
        &self,
        user: UserId,
        key: &SelectionKey,
        limit: usize,
    ) -> Result<Vec<Question>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (profile, topic, subtopic, difficulty) = key_columns(key);
        let lim = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r"
            SELECT q.id, q.payload
            FROM cached_questions q
            WHERE q.exam_profile = ?1
              AND q.topic = ?2
              AND q.subtopic = ?3
              AND q.difficulty = ?4
              AND NOT EXISTS (
                  SELECT 1 FROM seen_questions s
                  WHERE s.user_id = ?5 AND s.question_id = q.id
              )
            ORDER BY q.cached_at ASC, q.rowid ASC
            LIMIT ?6
            ",
        )
        .bind(profile)
        .bind(topic)
        .bind(subtopic)
        .bind(difficulty)
        .bind(user.to_string())
        .bind(lim)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut questions = Vec::with_capacity(rows.len());
        for row in rows {
            questions.push(map_question_row(&row)?);
        }
        Ok(questions)
    }

    async fn mark_seen(&self, user: UserId, ids: &[QuestionId]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        let user = user.to_string();

        let mut tx = self.pool.begin().await.map_err(conn)?;
        for id in ids {
            sqlx::query(
                r"
                INSERT INTO seen_questions (user_id, question_id, seen_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(user_id, question_id) DO NOTHING
                ",
            )
            .bind(&user)
            .bind(id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }
        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn cache_question(
        &self,
        user: UserId,
        key: &SelectionKey,
        question: &Question,
    ) -> Result<QuestionId, StorageError> {
        let (profile, topic, subtopic, difficulty) = key_columns(key);

        sqlx::query(
            r"
            INSERT INTO cached_questions (
                id, exam_profile, topic, subtopic, difficulty,
                pattern_tag, payload, created_by, cached_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(question.id().to_string())
        .bind(profile)
        .bind(topic)
        .bind(subtopic)
        .bind(difficulty)
        .bind(question.pattern_tag().as_str())
        .bind(question_payload(question)?)
        .bind(user.to_string())
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
            other => conn(other),
        })?;

        Ok(question.id())
    }

    async fn unseen_count(&self, user: UserId, key: &SelectionKey) -> Result<usize, StorageError> {
        let (profile, topic, subtopic, difficulty) = key_columns(key);

        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS unseen
            FROM cached_questions q
            WHERE q.exam_profile = ?1
              AND q.topic = ?2
              AND q.subtopic = ?3
              AND q.difficulty = ?4
              AND NOT EXISTS (
                  SELECT 1 FROM seen_questions s
                  WHERE s.user_id = ?5 AND s.question_id = q.id
              )
            ",
        )
        .bind(profile)
        .bind(topic)
        .bind(subtopic)
        .bind(difficulty)
        .bind(user.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        let count: i64 = row.try_get("unseen").map_err(ser)?;
        usize::try_from(count).map_err(ser)
    }
}
