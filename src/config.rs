//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PLACEHOLDER_TEXT: &str = "🤔 Thinking (using Assistant)...";

const DEFAULT_POLL_INTERVAL_SECS: f64 = 2.0;
const DEFAULT_RUN_TIMEOUT_SECS: f64 = 120.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_SERVICE_NAME: &str = "threadrelay";

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub slack: SlackConfig,
    pub openai: OpenAiConfig,
    pub run: RunSettings,
    /// Which generic (non-mention) messages are admitted.
    pub message_policy: MessagePolicy,
    /// Text of the provisional reply posted while a run is in progress.
    pub placeholder_text: String,
    /// Directory for a daily rolling log file, if file logging is wanted.
    pub log_dir: Option<PathBuf>,
    pub telemetry: TelemetryConfig,
}

/// Slack credentials.
#[derive(Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    /// App-level token used by Socket Mode.
    pub app_token: String,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("bot_token", &"[REDACTED]")
            .field("app_token", &"[REDACTED]")
            .finish()
    }
}

/// OpenAI Assistants settings.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub assistant_id: String,
    pub base_url: String,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("assistant_id", &self.assistant_id)
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Poll timing for assistant runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Wait between run status refreshes.
    pub poll_interval: Duration,
    /// Budget measured from run start; exceeding it cancels the run.
    pub run_timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
            run_timeout: Duration::from_secs_f64(DEFAULT_RUN_TIMEOUT_SECS),
        }
    }
}

/// Admission policy for generic message events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessagePolicy {
    /// Every unaddressed message in a supported conversation.
    #[default]
    All,
    /// Only direct and multi-party direct messages.
    DirectOnly,
    /// No generic messages; only explicit mentions start runs.
    MentionsOnly,
}

impl std::str::FromStr for MessagePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "direct" => Ok(Self::DirectOnly),
            "mentions_only" => Ok(Self::MentionsOnly),
            other => Err(ConfigError::Invalid(format!(
                "RELAY_MESSAGE_POLICY must be one of all, direct, mentions_only (got {other:?})"
            ))),
        }
    }
}

/// OpenTelemetry export settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// OTLP/HTTP endpoint; export is disabled when unset.
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: HashMap<String, String>,
    pub service_name: String,
    /// Fraction of traces sampled, 0.0 - 1.0.
    pub sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            otlp_headers: HashMap::new(),
            service_name: DEFAULT_SERVICE_NAME.into(),
            sample_rate: 1.0,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value. Every missing required variable is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut missing = Vec::new();
        let mut required = |key: &str| {
            value(key).unwrap_or_else(|| {
                missing.push(key.to_string());
                String::new()
            })
        };
        let bot_token = required("SLACK_BOT_TOKEN");
        let app_token = required("SLACK_APP_TOKEN");
        let api_key = required("OPENAI_API_KEY");
        let assistant_id = required("OPENAI_ASSISTANT_ID");
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing).into());
        }

        let run = RunSettings {
            poll_interval: seconds(
                "RELAY_POLL_INTERVAL_SECS",
                value("RELAY_POLL_INTERVAL_SECS"),
                DEFAULT_POLL_INTERVAL_SECS,
            )?,
            run_timeout: seconds(
                "RELAY_RUN_TIMEOUT_SECS",
                value("RELAY_RUN_TIMEOUT_SECS"),
                DEFAULT_RUN_TIMEOUT_SECS,
            )?,
        };
        if run.poll_interval > run.run_timeout {
            return Err(ConfigError::Invalid(format!(
                "RELAY_POLL_INTERVAL_SECS ({:?}) must not exceed RELAY_RUN_TIMEOUT_SECS ({:?})",
                run.poll_interval, run.run_timeout
            ))
            .into());
        }

        let request_timeout = seconds(
            "RELAY_REQUEST_TIMEOUT_SECS",
            value("RELAY_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        let message_policy = match value("RELAY_MESSAGE_POLICY") {
            Some(policy) => policy.parse::<MessagePolicy>()?,
            None => MessagePolicy::default(),
        };

        let telemetry = TelemetryConfig {
            otlp_endpoint: value("OTEL_EXPORTER_OTLP_ENDPOINT"),
            otlp_headers: value("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| parse_headers(&raw))
                .unwrap_or_default(),
            service_name: value("OTEL_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.into()),
            sample_rate: match value("OTEL_TRACES_SAMPLER_ARG") {
                Some(raw) => parse_sample_rate(&raw)?,
                None => 1.0,
            },
        };

        Ok(Self {
            slack: SlackConfig {
                bot_token,
                app_token,
            },
            openai: OpenAiConfig {
                api_key,
                assistant_id,
                base_url: value("OPENAI_BASE_URL")
                    .unwrap_or_else(|| crate::assistant::openai::DEFAULT_BASE_URL.into()),
                request_timeout,
            },
            run,
            message_policy,
            placeholder_text: value("RELAY_PLACEHOLDER_TEXT")
                .unwrap_or_else(|| DEFAULT_PLACEHOLDER_TEXT.into()),
            log_dir: value("RELAY_LOG_DIR").map(PathBuf::from),
            telemetry,
        })
    }
}

/// Parse a positive, finite number of (possibly fractional) seconds.
fn seconds(key: &str, raw: Option<String>, default: f64) -> Result<Duration> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs_f64(default));
    };
    let duration = raw
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .filter(|duration| !duration.is_zero());
    duration.ok_or_else(|| {
        ConfigError::Invalid(format!(
            "{key} must be a positive number of seconds (got {raw:?})"
        ))
        .into()
    })
}

fn parse_sample_rate(raw: &str) -> Result<f64> {
    match raw.parse::<f64>() {
        Ok(rate) if (0.0..=1.0).contains(&rate) => Ok(rate),
        _ => Err(ConfigError::Invalid(format!(
            "OTEL_TRACES_SAMPLER_ARG must be between 0.0 and 1.0 (got {raw:?})"
        ))
        .into()),
    }
}

/// Parse `key=value,key2=value2` OTLP header lists. Malformed pairs are skipped.
fn parse_headers(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}
