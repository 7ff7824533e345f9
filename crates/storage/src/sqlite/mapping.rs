use drill_core::model::{
    MasteryLevel, PatternProgress, PatternTag, Question, QuestionId, SelectionKey,
};
use sqlx::Row;

use crate::repository::{PatternMasteryRecord, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

/// Column values identifying a selection key, in `(profile, topic, subtopic, difficulty)`
/// order.
pub(crate) fn key_columns(key: &SelectionKey) -> (&'static str, &str, &str, &'static str) {
    (
        key.exam_profile().as_str(),
        key.topic(),
        key.subtopic(),
        key.difficulty().as_str(),
    )
}

pub(crate) fn question_payload(question: &Question) -> Result<String, StorageError> {
    serde_json::to_string(question).map_err(ser)
}

pub(crate) fn map_question_row(row: &sqlx::sqlite::SqliteRow) -> Result<Question, StorageError> {
    let payload: String = row.try_get("payload").map_err(ser)?;
    let question: Question = serde_json::from_str(&payload).map_err(ser)?;

    let id: String = row.try_get("id").map_err(ser)?;
    let id: QuestionId = id.parse().map_err(ser)?;
    if id != question.id() {
        return Err(StorageError::Serialization(format!(
            "payload id {} does not match row id {id}",
            question.id()
        )));
    }
    Ok(question)
}

pub(crate) fn map_mastery_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<PatternMasteryRecord, StorageError> {
    let tag: String = row.try_get("pattern_tag").map_err(ser)?;
    let level: String = row.try_get("level").map_err(ser)?;
    let in_debt: i64 = row.try_get("in_debt").map_err(ser)?;

    Ok(PatternMasteryRecord {
        pattern_tag: PatternTag::new(tag).map_err(ser)?,
        progress: PatternProgress {
            streak: i64_to_u32("streak", row.try_get("streak").map_err(ser)?)?,
            level: level.parse::<MasteryLevel>().map_err(ser)?,
            in_debt: in_debt != 0,
            attempts: i64_to_u32("attempts", row.try_get("attempts").map_err(ser)?)?,
        },
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}
