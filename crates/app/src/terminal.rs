//! Line-based terminal driver for practice, sprint and stats.

use std::error::Error;
use std::time::{Duration, Instant};

use drill_core::flow::{FlowState, MiniPracticeResult, ReflectionReason};
use drill_core::model::{Question, SelectionKey};
use services::{Advisory, AppServices, DisplayState, SprintResult, SprintSession};
use tokio::io::{AsyncBufReadExt, BufReader};

type AppResult = Result<(), Box<dyn Error>>;

const SETTLE_POLL: Duration = Duration::from_millis(50);

fn parse_option(input: &str) -> Option<usize> {
    match input.parse::<usize>() {
        Ok(n @ 1..=4) => Some(n - 1),
        _ => None,
    }
}

fn parse_reason(input: &str) -> Option<ReflectionReason> {
    match input {
        "g" => Some(ReflectionReason::Guessed),
        "t" => Some(ReflectionReason::Tried),
        "k" => Some(ReflectionReason::Knew),
        "f" => Some(ReflectionReason::Froze),
        other => other.parse().ok(),
    }
}

fn parse_mini(input: &str, started: Option<Instant>) -> Option<MiniPracticeResult> {
    let (correct, total) = input.split_once('/')?;
    let correct = correct.trim().parse().ok()?;
    let total = total.trim().parse().ok()?;
    if correct > total {
        return None;
    }
    Some(MiniPracticeResult {
        correct,
        total,
        elapsed: started.map(|s| s.elapsed()).unwrap_or_default(),
    })
}

fn print_question(label: &str, question: &Question) {
    println!();
    println!("{label} {}", question.text());
    for (i, option) in question.options().iter().enumerate() {
        println!("  {}) {option}", i + 1);
    }
}

fn print_method(question: &Question) {
    let path = question.optimal_path();
    if path.exists {
        println!("Fastest safe method:");
        if let Some(pre) = &path.preconditions {
            println!("  when: {pre}");
        }
        for (i, step) in path.steps.iter().enumerate() {
            println!("  {}. {step}", i + 1);
        }
        if let Some(check) = &path.sanity_check {
            println!("  check: {check}");
        }
    } else {
        println!("No reliable shortcut here. Full solution:");
        for (i, step) in question.solution_steps().iter().enumerate() {
            println!("  {}. {step}", i + 1);
        }
    }
}

fn render_practice(snapshot: &DisplayState, flow: FlowState, mini: Option<MiniPracticeResult>) {
    if let Some(err) = &snapshot.error {
        println!("! {err}");
    }
    if snapshot.advisory == Some(Advisory::ServingFromCache) {
        println!("(generation is throttled, serving cached questions)");
    }
    if let Some(notice) = snapshot.notice {
        println!("{notice}");
    }
    let Some(question) = &snapshot.question else {
        println!("[enter] retry, [q] quit");
        return;
    };

    match flow {
        FlowState::Question => {
            print_question(&format!("Q{}.", snapshot.index + 1), question);
            println!("answer 1-4, [q] quit");
        }
        FlowState::SuccessToast => {
            let streak = snapshot.mastery.map_or(0, |m| m.new_streak);
            println!(
                "Correct in {}s. Streak {streak}. Next question coming up.",
                snapshot.elapsed_secs
            );
        }
        FlowState::Intervention => {
            println!("Not quite (or not fast enough).");
            println!("[p] prove it on a similar question, [s] skip (adds debt), [r] review the method");
        }
        FlowState::Reflection => {
            println!("What happened? [g]uessed, [t]ried, [k]new it but slipped, [f]roze");
        }
        FlowState::Fsm => {
            print_method(question);
            println!("[enter] continue");
        }
        FlowState::Reinforce => {
            println!("[m] practice similar, [a] add to review queue, [s] skip");
        }
        FlowState::MiniPractice => {
            println!("Work a few similar problems, then enter your score as correct/total (e.g. 2/3)");
        }
        FlowState::Feedback => {
            if let Some(result) = mini {
                println!(
                    "Mini practice: {}/{} in {}s.",
                    result.correct,
                    result.total,
                    result.elapsed.as_secs()
                );
            }
            println!("[enter] continue");
        }
    }
}

pub async fn practice(services: &AppServices, key: SelectionKey) -> AppResult {
    let session = services.practice(key);
    let mut display = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut mini_started = None;

    if let Err(err) = session.load_question(0).await {
        if !err.is_retryable() {
            println!("{err}");
            return Ok(());
        }
    }

    loop {
        let snapshot = session.snapshot();
        let flow = session.flow_state();
        render_practice(&snapshot, flow, session.mini_practice_result());

        if flow == FlowState::SuccessToast {
            let index = snapshot.index;
            display
                .wait_for(|s| (s.index != index && !s.loading) || s.error.is_some())
                .await?;
            continue;
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input == "q" {
            break;
        }

        let outcome = if snapshot.question.is_none() {
            session.load_question(snapshot.index).await.map(|()| flow)
        } else {
            match (flow, input) {
                (FlowState::Question, choice) => match parse_option(choice) {
                    Some(option) => session.submit_answer(option).await,
                    None => continue,
                },
                (FlowState::Intervention, "p") => session.prove_it().await,
                (FlowState::Intervention, "s") => session.skip_intervention().await,
                (FlowState::Intervention, "r") => session.reflect().await,
                (FlowState::Reflection, reason) => match parse_reason(reason) {
                    Some(reason) => session.choose_reflection(reason).await,
                    None => continue,
                },
                (FlowState::Fsm, _) => session.continue_flow().await,
                (FlowState::Reinforce, "m") => {
                    mini_started = Some(Instant::now());
                    session.practice_similar().await
                }
                (FlowState::Reinforce, "a") => session.add_to_queue().await,
                (FlowState::Reinforce, "s") => session.skip_reinforcement().await,
                (FlowState::MiniPractice, score) => match parse_mini(score, mini_started) {
                    Some(result) => session.complete_mini_practice(result).await,
                    None => continue,
                },
                (FlowState::Feedback, _) => session.continue_flow().await,
                _ => continue,
            }
        };
        if let Err(err) = outcome {
            tracing::debug!(error = %err, "practice step failed");
        }
    }

    let queued = session.review_queue();
    if !queued.is_empty() {
        println!("{} question(s) queued for review.", queued.len());
    }
    Ok(())
}

fn print_attempts(sprint: &SprintSession, reported: &mut usize) {
    let attempts = sprint.attempts();
    for attempt in attempts.iter().skip(*reported) {
        let verdict = match attempt.result {
            SprintResult::Correct => "correct",
            SprintResult::Wrong => "wrong",
            SprintResult::Skipped => "skipped",
        };
        println!(
            "  {verdict} in {:.1}s, +{} points",
            Duration::from_millis(attempt.time_ms).as_secs_f64(),
            attempt.score
        );
    }
    *reported = attempts.len();
}

pub async fn sprint(services: &AppServices, key: SelectionKey, count: usize) -> AppResult {
    let sprint = services.sprint(key, count);
    let mut display = sprint.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Err(err) = sprint.start().await {
        println!("{err}");
        return Ok(());
    }

    let mut reported = 0;
    let mut settled = None;
    while !sprint.is_finished() {
        let snapshot = sprint.snapshot();
        if let Some(err) = &snapshot.error {
            println!("{err}");
            break;
        }
        let question = match snapshot.question {
            Some(question) if settled != Some(snapshot.index) => question,
            _ => {
                display.changed().await?;
                continue;
            }
        };

        let limit = sprint.time_limit().unwrap_or_default();
        print_question(
            &format!("Q{}/{count} ({}s)", snapshot.index + 1, limit.as_secs()),
            &question,
        );
        println!("answer 1-4, [s] skip, [q] quit");

        let before = sprint.attempts().len();
        let remaining = limit.saturating_sub(Duration::from_secs(snapshot.elapsed_secs));
        let mut quit = false;
        tokio::select! {
            line = lines.next_line() => match line?.as_deref().map(str::trim) {
                None | Some("q") => quit = true,
                Some("s") => {
                    if let Err(err) = sprint.skip().await {
                        println!("{err}");
                        quit = true;
                    }
                }
                Some(choice) => {
                    if let Some(option) = parse_option(choice) {
                        if let Err(err) = sprint.answer(option).await {
                            println!("{err}");
                            quit = true;
                        }
                    }
                }
            },
            () = tokio::time::sleep(remaining) => {
                println!("  time's up");
                while sprint.attempts().len() == before {
                    tokio::time::sleep(SETTLE_POLL).await;
                }
            }
        }
        if sprint.attempts().len() > before {
            settled = Some(snapshot.index);
        }
        print_attempts(&sprint, &mut reported);
        if quit {
            break;
        }
    }

    let tally = sprint.tally();
    println!();
    println!(
        "Sprint: {} questions, {} correct, {} wrong, {} skipped. Score {}, average {:.1}s.",
        tally.total,
        tally.correct,
        tally.wrong,
        tally.skipped,
        tally.total_score,
        Duration::from_millis(tally.avg_time_ms).as_secs_f64()
    );
    Ok(())
}

pub async fn stats(services: &AppServices, key: &SelectionKey) -> AppResult {
    let unseen = services.unseen_count(key).await?;
    println!("{key}: {unseen} cached question(s) not seen yet");

    let progress = services.progress().await?;
    if progress.is_empty() {
        println!("No attempts recorded yet.");
    }
    for record in progress {
        let p = record.progress;
        println!(
            "{:<36} {:<9} streak {:>2}  attempts {:>3}{}",
            record.pattern_tag.as_str(),
            p.level.as_str(),
            p.streak,
            p.attempts,
            if p.in_debt { "  (debt)" } else { "" }
        );
    }
    Ok(())
}
