use std::collections::BTreeMap;

use async_trait::async_trait;
use drill_core::model::{
    Difficulty, ExamProfile, OptimalPath, Question, QuestionDraft, QuestionId, SelectionKey,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GeneratorConfig;
use crate::error::GenerationError;

/// Produces one new question for a practice context.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// # Errors
    ///
    /// Returns `GenerationError::QuotaExceeded` / `RateLimited` when throttled, or
    /// another `GenerationError` when the backend fails or returns a malformed
    /// question.
    async fn generate_question(&self, key: &SelectionKey) -> Result<Question, GenerationError>;
}

/// Generator backed by an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct ChatQuestionGenerator {
    client: Client,
    config: Option<GeneratorConfig>,
}

impl ChatQuestionGenerator {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(GeneratorConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<GeneratorConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl QuestionGenerator for ChatQuestionGenerator {
    async fn generate_question(&self, key: &SelectionKey) -> Result<Question, GenerationError> {
        let config = self.config.as_ref().ok_or(GenerationError::Disabled)?;

        let url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        let payload = ChatRequest {
            model: config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: build_prompt(key),
            }],
            temperature: 0.7,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!(selection = %key, model = %config.model, "requesting generated question");
        let response = self
            .client
            .post(url)
            .bearer_auth(&config.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_failure(status, &body);
            warn!(selection = %key, %status, error = %err, "question generation failed");
            return Err(err);
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)?;

        parse_generated(&content, key)
    }
}

/// Map a failed response onto a generation error. Throttling is recognised by
/// status 429 or by the quota markers some backends put in the body.
#[must_use]
pub fn classify_failure(status: StatusCode, body: &str) -> GenerationError {
    let quota = ["QUOTA_EXCEEDED", "RESOURCE_EXHAUSTED", "insufficient_quota"]
        .iter()
        .any(|marker| body.contains(marker));
    if quota {
        GenerationError::QuotaExceeded
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        GenerationError::RateLimited
    } else {
        GenerationError::HttpStatus(status)
    }
}

fn build_prompt(key: &SelectionKey) -> String {
    let difficulty = match key.difficulty() {
        Difficulty::Easy => "easier than a typical",
        Difficulty::Medium => "typical of a",
        Difficulty::Hard => "harder than a typical",
    };
    format!(
        r#"You are an expert tutor for competitive entrance exams.
Generate one multiple-choice practice question for the topic "{topic}", focusing on the
sub-topic "{subtopic}", {difficulty} "{exam}" exam question.

Respond with a single JSON object and nothing else:
{{
  "questionText": string,
  "options": [{{"text": string}}, {{"text": string}}, {{"text": string}}, {{"text": string}}],
  "correctOptionIndex": 0-3,
  "timeTargets": {{"jee_main": seconds, "cat": seconds, "eamcet": seconds}},
  "theOptimalPath": {{"exists": bool, "preconditions": string, "steps": [string], "sanityCheck": string}},
  "fullStepByStep": {{"steps": [string]}},
  "fsmTag": "kebab-case-name-of-the-solution-pattern"
}}

Set "exists" to false when no reliable shortcut exists. Keep shortcut steps under five.
Provide exactly 4 plausible options."#,
        topic = key.topic(),
        subtopic = key.subtopic(),
        exam = key.exam_profile(),
    )
}

/// Parse a generator reply into a validated question bound to `key`.
///
/// # Errors
///
/// Returns `GenerationError::InvalidPayload` when the reply is not the expected
/// JSON, or `GenerationError::InvalidQuestion` when it fails validation.
pub fn parse_generated(content: &str, key: &SelectionKey) -> Result<Question, GenerationError> {
    let json = strip_code_fence(content);
    let wire: WireQuestion =
        serde_json::from_str(json).map_err(|e| GenerationError::InvalidPayload(e.to_string()))?;
    let question = wire.into_draft().validate(QuestionId::generate(), key)?;
    Ok(question)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

//
// ─── WIRE FORMAT ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuestion {
    question_text: String,
    options: Vec<WireOption>,
    correct_option_index: usize,
    #[serde(default)]
    time_targets: BTreeMap<String, u32>,
    #[serde(default, alias = "fastestSafeMethod")]
    the_optimal_path: Option<WirePath>,
    #[serde(default)]
    full_step_by_step: Option<WireSteps>,
    #[serde(default)]
    fsm_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireOption {
    Object { text: String },
    Plain(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePath {
    #[serde(default)]
    exists: bool,
    #[serde(default)]
    preconditions: Option<String>,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    sanity_check: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSteps {
    #[serde(default)]
    steps: Vec<String>,
}

impl WireQuestion {
    fn into_draft(self) -> QuestionDraft {
        let path = self.the_optimal_path.unwrap_or_default();
        QuestionDraft {
            text: self.question_text,
            options: self
                .options
                .into_iter()
                .map(|option| match option {
                    WireOption::Object { text } | WireOption::Plain(text) => text,
                })
                .collect(),
            correct_option_index: self.correct_option_index,
            time_targets: self
                .time_targets
                .into_iter()
                .filter_map(|(profile, secs)| {
                    profile.parse::<ExamProfile>().ok().map(|p| (p, secs))
                })
                .collect(),
            optimal_path: OptimalPath {
                exists: path.exists,
                preconditions: path.preconditions.filter(|p| !p.trim().is_empty()),
                steps: path.steps,
                sanity_check: path.sanity_check.filter(|s| !s.trim().is_empty()),
            },
            solution_steps: self.full_step_by_step.unwrap_or_default().steps,
            pattern_tag: self.fsm_tag,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key() -> SelectionKey {
        SelectionKey::new(ExamProfile::Cat, "Arithmetic", "Percentages", Difficulty::Medium)
            .unwrap()
    }

    const REPLY: &str = r#"{
        "questionText": "A price rises 20% then falls 20%. Net change?",
        "options": [{"text": "0%"}, {"text": "-4%"}, {"text": "+4%"}, {"text": "-2%"}],
        "correctOptionIndex": 1,
        "timeTargets": {"jee_main": 60, "cat": 30, "eamcet": 45, "sat": 10},
        "theOptimalPath": {
            "exists": true,
            "preconditions": "Successive percentage changes",
            "steps": ["a + b + ab/100"],
            "sanityCheck": "Result is slightly negative"
        },
        "fullStepByStep": {"steps": ["100 -> 120 -> 96"]},
        "fsmTag": "successive-percentage-change"
    }"#;

    #[test]
    fn parses_full_reply() {
        let q = parse_generated(REPLY, &key()).unwrap();
        assert_eq!(q.options()[1], "-4%");
        assert_eq!(q.correct_option_index(), 1);
        assert_eq!(q.target_time(ExamProfile::Cat), Some(Duration::from_secs(30)));
        assert_eq!(q.time_targets().len(), 3);
        assert!(q.optimal_path().exists);
        assert_eq!(q.pattern_tag().as_str(), "successive-percentage-change");
        assert_eq!(q.selection_key(), key());
    }

    #[test]
    fn accepts_fenced_reply_and_legacy_names() {
        let reply = r#"```json
        {"questionText": "2 + 2?", "options": ["3", "4", "5", "6"], "correctOptionIndex": 1,
         "fastestSafeMethod": {"exists": false, "steps": []}}
        ```"#;
        let q = parse_generated(reply, &key()).unwrap();
        assert_eq!(q.options()[1], "4");
        assert!(!q.optimal_path().exists);
        assert_eq!(q.pattern_tag().as_str(), "percentages-default");
    }

    #[test]
    fn rejects_three_options() {
        let reply = r#"{"questionText": "x", "options": ["a", "b", "c"], "correctOptionIndex": 0}"#;
        let err = parse_generated(reply, &key()).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidQuestion(_)));
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_generated("Sorry, I can't help.", &key()).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidPayload(_)));
    }

    #[test]
    fn classifies_throttling() {
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            GenerationError::RateLimited
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, r#"{"code":"insufficient_quota"}"#),
            GenerationError::QuotaExceeded
        ));
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, "RESOURCE_EXHAUSTED"),
            GenerationError::QuotaExceeded
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, ""),
            GenerationError::HttpStatus(StatusCode::BAD_GATEWAY)
        ));
    }

    #[tokio::test]
    async fn unconfigured_generator_is_disabled() {
        let generator = ChatQuestionGenerator::new(None);
        assert!(!generator.enabled());
        let err = generator.generate_question(&key()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Disabled));
    }
}
