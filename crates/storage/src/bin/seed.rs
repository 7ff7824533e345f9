use std::collections::BTreeMap;
use std::fmt;

use drill_core::model::{
    Difficulty, ExamProfile, OptimalPath, QuestionDraft, QuestionId, SelectionKey, UserId,
};
use storage::repository::Storage;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    exam: ExamProfile,
    topic: String,
    subtopic: String,
    difficulty: Difficulty,
    count: u32,
    user: Option<UserId>,
}

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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("LEARN_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3?mode=rwc".into());
        let mut exam = ExamProfile::Cat;
        let mut topic = "arithmetic".to_string();
        let mut subtopic = "time-and-work".to_string();
        let mut difficulty = Difficulty::Medium;
        let mut count = std::env::var("LEARN_SEED_COUNT")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(6);
        let mut user = std::env::var("LEARN_USER_ID")
            .ok()
            .and_then(|value| value.parse::<UserId>().ok());

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--exam" => {
                    let value = require_value(&mut args, "--exam")?;
                    exam = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidExam { raw: value.clone() })?;
                }
                "--topic" => topic = require_value(&mut args, "--topic")?,
                "--subtopic" => subtopic = require_value(&mut args, "--subtopic")?,
                "--difficulty" => {
                    let value = require_value(&mut args, "--difficulty")?;
                    difficulty = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidDifficulty { raw: value.clone() })?;
                }
                "--count" => {
                    let value = require_value(&mut args, "--count")?;
                    count = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidCount { raw: value.clone() })?;
                }
                "--user" => {
                    let value = require_value(&mut args, "--user")?;
                    user = Some(
                        value
                            .parse()
                            .map_err(|_| ArgsError::InvalidUser { raw: value.clone() })?,
                    );
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
            exam,
            topic,
            subtopic,
            difficulty,
            count,
            user,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3?mode=rwc)");
    eprintln!("  --exam <profile>          Exam profile (default: cat)");
    eprintln!("  --topic <topic>           Topic (default: arithmetic)");
    eprintln!("  --subtopic <subtopic>     Subtopic (default: time-and-work)");
    eprintln!("  --difficulty <level>      Easy | Medium | Hard (default: Medium)");
    eprintln!("  --count <n>               Number of sample questions to cache (default: 6)");
    eprintln!("  --user <uuid>             Recorded as the creator of the seeded rows");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment: LEARN_DB_URL, LEARN_SEED_COUNT, LEARN_USER_ID");
}

/// Inverse-proportion drill: `workers` finish in `days`; how long for `factor`
/// times as many?
fn sample_draft(i: u32) -> QuestionDraft {
    let workers = 4 + 2 * (i % 5);
    let days = 12 + 6 * ((i / 5) % 3);
    let factor = 2 + (i % 2);
    let answer = days / factor;

    let mut options = vec![
        (days * factor).to_string(),
        days.to_string(),
        (days + factor).to_string(),
    ];
    let correct = (i % 4) as usize;
    options.insert(correct, answer.to_string());

    QuestionDraft {
        text: format!(
            "{workers} workers finish a job in {days} days. How many days do {} workers \
             take at the same rate?",
            workers * factor
        ),
        options,
        correct_option_index: correct,
        time_targets: ExamProfile::ALL.into_iter().map(|p| (p, 40)).collect::<BTreeMap<_, _>>(),
        optimal_path: OptimalPath {
            exists: true,
            preconditions: Some("Total work is fixed.".into()),
            steps: vec![
                "Workers and days are inversely proportional.".into(),
                format!("Divide {days} by the factor {factor}."),
            ],
            sanity_check: Some("More workers must mean fewer days.".into()),
        },
        solution_steps: vec![
            format!("Work = {workers} × {days} = {} worker-days.", workers * days),
            format!(
                "Days = {} / {} = {answer}.",
                workers * days,
                workers * factor
            ),
        ],
        pattern_tag: Some("inverse-proportion-workers".into()),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let key = SelectionKey::new(args.exam, &args.topic, &args.subtopic, args.difficulty)?;
    let user = args.user.unwrap_or_else(UserId::generate);
    let storage = Storage::sqlite(&args.db_url).await?;

    for i in 0..args.count {
        let question = sample_draft(i).validate(QuestionId::generate(), &key)?;
        storage.questions.cache_question(user, &key, &question).await?;
    }

    println!(
        "Cached {} sample questions for {} into {}",
        args.count, key, args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
