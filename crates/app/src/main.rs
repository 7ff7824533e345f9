use std::fmt;
use std::sync::Arc;

use drill_core::model::{Difficulty, ExamProfile, SelectionKey, UserId};
use services::{
    AppServices, ChatQuestionGenerator, Clock, DeliveryConfig, QuestionGenerator, StaticAuth,
};
use tracing::{info, warn};

mod logging;
mod terminal;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidExam { raw: String },
    InvalidDifficulty { raw: String },
    InvalidCount { raw: String },
    InvalidDbUrl { raw: String },
    InvalidUser { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidExam { raw } => write!(f, "invalid --exam value: {raw}"),
            ArgsError::InvalidDifficulty { raw } => write!(f, "invalid --difficulty value: {raw}"),
            ArgsError::InvalidCount { raw } => write!(f, "invalid --count value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- practice [options]");
    eprintln!("  cargo run -p app -- sprint   [options] [--count <n>]");
    eprintln!("  cargo run -p app -- stats    [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>        default sqlite://dev.sqlite3");
    eprintln!("  --user <uuid>            learner id");
    eprintln!("  --exam <profile>         default cat");
    eprintln!("  --topic <topic>          default arithmetic");
    eprintln!("  --subtopic <subtopic>    default time-and-work");
    eprintln!("  --difficulty <level>     easy | medium | hard, default medium");
    eprintln!("  --count <n>              sprint length, default 10");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_DB_URL, LEARN_USER_ID, RUST_LOG");
    eprintln!("  LEARN_AI_API_KEY, LEARN_AI_BASE_URL, LEARN_AI_MODEL");
    eprintln!("  LEARN_PACING_MS, LEARN_TOAST_MS, LEARN_DEFAULT_TARGET_SECS, LEARN_FLOW_MODE");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Practice,
    Sprint,
    Stats,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "practice" => Some(Self::Practice),
            "sprint" => Some(Self::Sprint),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    user: Option<UserId>,
    exam: ExamProfile,
    topic: String,
    subtopic: String,
    difficulty: Difficulty,
    count: usize,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("LEARN_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://dev.sqlite3".into(), normalize_sqlite_url);
        let mut user = std::env::var("LEARN_USER_ID")
            .ok()
            .and_then(|value| value.parse::<UserId>().ok());
        let mut exam = ExamProfile::Cat;
        let mut topic = "arithmetic".to_string();
        let mut subtopic = "time-and-work".to_string();
        let mut difficulty = Difficulty::Medium;
        let mut count = 10;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    let parsed = value
                        .parse::<UserId>()
                        .map_err(|_| ArgsError::InvalidUser { raw: value.clone() })?;
                    user = Some(parsed);
                }
                "--exam" => {
                    let value = require_value(args, "--exam")?;
                    exam = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidExam { raw: value.clone() })?;
                }
                "--topic" => topic = require_value(args, "--topic")?,
                "--subtopic" => subtopic = require_value(args, "--subtopic")?,
                "--difficulty" => {
                    let value = require_value(args, "--difficulty")?;
                    difficulty = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidDifficulty { raw: value.clone() })?;
                }
                "--count" => {
                    let value = require_value(args, "--count")?;
                    count = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidCount { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            user,
            exam,
            topic,
            subtopic,
            difficulty,
            count,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Practice,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Practice,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let parsed = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let key = SelectionKey::new(
        parsed.exam,
        &parsed.topic,
        &parsed.subtopic,
        parsed.difficulty,
    )?;

    let user = parsed.user.unwrap_or_else(|| {
        let generated = UserId::generate();
        warn!(user = %generated, "LEARN_USER_ID not set, using a throwaway learner id");
        generated
    });

    let generator = ChatQuestionGenerator::from_env();
    if !generator.enabled() {
        warn!("LEARN_AI_API_KEY not set, serving cached questions only");
    }
    let generator: Arc<dyn QuestionGenerator> = Arc::new(generator);
    let config = DeliveryConfig::from_env();

    prepare_sqlite_file(&parsed.db_url)?;
    let services = AppServices::new_sqlite(
        &parsed.db_url,
        Clock::default(),
        Arc::new(StaticAuth::signed_in(user)),
        generator,
        config,
    )
    .await?;
    info!(db = %parsed.db_url, selection = %key, "services ready");

    match cmd {
        Command::Practice => terminal::practice(&services, key).await,
        Command::Sprint => terminal::sprint(&services, key, parsed.count).await,
        Command::Stats => terminal::stats(&services, &key).await,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
