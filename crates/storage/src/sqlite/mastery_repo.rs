use drill_core::model::{
    AttemptRecord, MasteryResult, PatternProgress, PatternTag, Question, QuestionId, UserId,
};

use super::{
    SqliteRepository,
    mapping::{conn, map_mastery_row, map_question_row, u64_to_i64},
};
use crate::repository::{MasteryRepository, PatternMasteryRecord, StorageError};

#[async_trait::async_trait]
impl MasteryRepository for SqliteRepository {
    async fn report_attempt(
        &self,
        user: UserId,
        record: &AttemptRecord,
    ) -> Result<MasteryResult, StorageError> {
        let now = self.clock.now();
        let user = user.to_string();
        let tag = record.pattern_tag.as_str();

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let existing = sqlx::query(
            r"
            SELECT pattern_tag, streak, level, in_debt, attempts, updated_at
            FROM pattern_mastery
            WHERE user_id = ?1 AND pattern_tag = ?2
            ",
        )
        .bind(&user)
        .bind(tag)
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?;

        let mut progress = match existing {
            Some(row) => map_mastery_row(&row)?.progress,
            None => PatternProgress::default(),
        };
        let result = progress.apply(record);

        sqlx::query(
            r"
            INSERT INTO pattern_mastery (
                user_id, pattern_tag, streak, level, in_debt, attempts, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id, pattern_tag) DO UPDATE SET
                streak = excluded.streak,
                level = excluded.level,
                in_debt = excluded.in_debt,
                attempts = excluded.attempts,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&user)
        .bind(tag)
        .bind(i64::from(progress.streak))
        .bind(progress.level.as_str())
        .bind(progress.in_debt)
        .bind(i64::from(progress.attempts))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO attempts (
                user_id, question_id, pattern_tag, is_correct, time_ms, target_time_ms,
                selected_option_index, skip_drill, recorded_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(&user)
        .bind(record.question_id.to_string())
        .bind(tag)
        .bind(record.is_correct)
        .bind(u64_to_i64("time_ms", record.time_ms)?)
        .bind(u64_to_i64("target_time_ms", record.target_time_ms)?)
        .bind(i64::try_from(record.selected_option_index).map_err(|_| {
            StorageError::Serialization("selected_option_index overflow".into())
        })?)
        .bind(record.skip_drill)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(result)
    }

    async fn question_by_pattern_tag(
        &self,
        tag: &PatternTag,
        exclude: QuestionId,
    ) -> Result<Option<Question>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, payload
            FROM cached_questions
            WHERE pattern_tag = ?1 AND id <> ?2
            ORDER BY cached_at ASC, rowid ASC
            LIMIT 1
            ",
        )
        .bind(tag.as_str())
        .bind(exclude.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_question_row).transpose()
    }

    async fn mastery_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<PatternMasteryRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT pattern_tag, streak, level, in_debt, attempts, updated_at
            FROM pattern_mastery
            WHERE user_id = ?1
            ORDER BY updated_at DESC, pattern_tag ASC
            ",
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_mastery_row(&row)?);
        }
        Ok(out)
    }
}
