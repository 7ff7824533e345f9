#![forbid(unsafe_code)]

pub mod app_services;
pub mod auth;
pub mod buffer;
pub mod config;
pub mod error;
pub mod generator;
pub mod loader;
pub mod mastery;
pub mod practice;
pub mod preload;
pub mod sourcing;
pub mod sprint;

pub use drill_core::Clock;

pub use app_services::AppServices;
pub use auth::{AuthProvider, CurrentUser, StaticAuth};
pub use buffer::{BufferManager, TopUp};
pub use config::{DeliveryConfig, GeneratorConfig};
pub use error::{AppServicesError, DeliveryError, GenerationError};
pub use generator::{ChatQuestionGenerator, QuestionGenerator};
pub use loader::{Advisory, DisplayState, LoadToken, QuestionLoader, Shown};
pub use mastery::MasteryReporter;
pub use practice::PracticeSession;
pub use preload::Preloader;
pub use sourcing::{QuestionSource, SourcedBatch};
pub use sprint::{SprintAttempt, SprintInput, SprintResult, SprintSession, SprintTally};
