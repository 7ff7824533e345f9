//! Environment-driven configuration.

use std::env;
use std::time::Duration;

use drill_core::flow::FlowMode;
use drill_core::model::FALLBACK_TIME_LIMIT_SECS;

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl GeneratorConfig {
    /// `None` unless `LEARN_AI_API_KEY` is set and non-empty.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("LEARN_AI_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url =
            env::var("LEARN_AI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let model = env::var("LEARN_AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
        Some(Self {
            base_url,
            api_key,
            model,
        })
    }
}

/// Timing and flow knobs for practice delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Delay between consecutive generation calls during a top-up.
    pub pacing: Duration,
    /// How long the success toast stays before auto-advancing.
    pub toast: Duration,
    /// Target solve time when a question has none for the exam profile.
    pub default_target: Duration,
    pub flow_mode: FlowMode,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(1000),
            toast: Duration::from_millis(1500),
            default_target: Duration::from_secs(u64::from(FALLBACK_TIME_LIMIT_SECS)),
            flow_mode: FlowMode::Mastery,
        }
    }
}

impl DeliveryConfig {
    /// Defaults overridden by `LEARN_PACING_MS`, `LEARN_TOAST_MS`,
    /// `LEARN_DEFAULT_TARGET_SECS` and `LEARN_FLOW_MODE`. Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |name: &str| {
            env::var(name)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        Self {
            pacing: millis("LEARN_PACING_MS").unwrap_or(defaults.pacing),
            toast: millis("LEARN_TOAST_MS").unwrap_or(defaults.toast),
            default_target: env::var("LEARN_DEFAULT_TARGET_SECS")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map_or(defaults.default_target, Duration::from_secs),
            flow_mode: env::var("LEARN_FLOW_MODE")
                .ok()
                .and_then(|v| v.parse::<FlowMode>().ok())
                .unwrap_or(defaults.flow_mode),
        }
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    #[must_use]
    pub fn with_toast(mut self, toast: Duration) -> Self {
        self.toast = toast;
        self
    }

    #[must_use]
    pub fn with_flow_mode(mut self, flow_mode: FlowMode) -> Self {
        self.flow_mode = flow_mode;
        self
    }
}
