//! Domain types for adaptive question delivery: practice contexts, questions,
//! attempt records, the post-answer flow machine and sprint scoring.

pub mod flow;
pub mod model;
pub mod scoring;
pub mod time;

pub use time::Clock;
