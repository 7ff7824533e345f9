//! Persistence for the question store: the shared question cache, per-user seen
//! marks and pattern mastery, with in-memory and `SQLite` backends.

pub mod repository;
pub mod sqlite;
