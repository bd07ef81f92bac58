//! Configuration for Duet.
//!
//! Everything here is a plain struct with a sensible [`Default`]; applications construct
//! them however they like. The `from_env()` helpers read a handful of environment variables
//! for deployments that configure through the process environment. No config-file parsing
//! dependencies are introduced.
//!
//! # Example
//!
//! ```rust
//! use duet::config::{DuetConfig, SessionLimits};
//! use std::time::Duration;
//!
//! let config = DuetConfig::default();
//! assert_eq!(config.limits.max_iterations, 8);
//! assert_eq!(config.limits.time_limit, Duration::from_secs(180));
//!
//! let tight = DuetConfig {
//!     limits: SessionLimits {
//!         max_iterations: 2,
//!         time_limit: Duration::from_secs(30),
//!     },
//!     ..DuetConfig::default()
//! };
//! assert_eq!(tight.request_timeout, Duration::from_secs(30));
//! ```

use crate::clients::common::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_REQUEST_TIMEOUT};
use std::env;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_MAX_ITERATIONS: &str = "DUET_MAX_ITERATIONS";
pub const ENV_TIME_LIMIT_SECS: &str = "DUET_TIME_LIMIT_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "DUET_REQUEST_TIMEOUT_SECS";
pub const ENV_MAX_OUTPUT_TOKENS: &str = "DUET_MAX_OUTPUT_TOKENS";
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Priming text for the producing agent. The trailing status convention is what the
/// [`StatusTagDetector`](crate::completion::StatusTagDetector) looks for.
pub const PRODUCER_PRIMING: &str = "You are a programmer. Write functional code, explain decisions, \
end with STATUS: [WORKING/COMPLETE/NEED_FEEDBACK]";

/// Priming text for the reviewing agent.
pub const CONSUMER_PRIMING: &str = "You are a code supervisor. Review code, provide constructive \
feedback, suggest improvements, assess completion";

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set (or is empty).
    Missing(String),
    /// A variable is set but could not be parsed.
    Invalid { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "Missing {} in environment", key),
            ConfigError::Invalid { key, value } => {
                write!(f, "Invalid value for {}: {:?}", key, value)
            }
        }
    }
}

impl Error for ConfigError {}

/// Budgets that bound a single collaboration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Maximum number of completed Agent-A/Agent-B rounds.
    pub max_iterations: usize,
    /// Wall-clock budget, checked at round boundaries.
    pub time_limit: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        SessionLimits {
            max_iterations: 8,
            time_limit: Duration::from_secs(180),
        }
    }
}

/// Process-wide settings shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuetConfig {
    pub limits: SessionLimits,
    /// Per-call timeout handed to the provider clients.
    pub request_timeout: Duration,
    /// Completion length requested from the providers.
    pub max_output_tokens: u32,
}

impl Default for DuetConfig {
    fn default() -> Self {
        DuetConfig {
            limits: SessionLimits::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl DuetConfig {
    /// Defaults overridden by any `DUET_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = DuetConfig::default();
        Ok(DuetConfig {
            limits: SessionLimits {
                max_iterations: read_var(ENV_MAX_ITERATIONS)?
                    .unwrap_or(defaults.limits.max_iterations),
                time_limit: read_var(ENV_TIME_LIMIT_SECS)?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.limits.time_limit),
            },
            request_timeout: read_var(ENV_REQUEST_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_output_tokens: read_var(ENV_MAX_OUTPUT_TOKENS)?
                .unwrap_or(defaults.max_output_tokens),
        })
    }
}

/// API keys for the two providers.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub anthropic_api_key: String,
    pub openai_api_key: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("anthropic_api_key", &"<redacted>")
            .field("openai_api_key", &"<redacted>")
            .finish()
    }
}

impl ProviderCredentials {
    /// Reads `ANTHROPIC_API_KEY` and `OPENAI_API_KEY`; both are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ProviderCredentials {
            anthropic_api_key: required_var(ENV_ANTHROPIC_API_KEY)?,
            openai_api_key: required_var(ENV_OPENAI_API_KEY)?,
        })
    }
}

/// Everything that distinguishes one agent from the other apart from its transport.
///
/// ```rust
/// use duet::config::ProviderProfile;
///
/// let reviewer = ProviderProfile::consumer("ChatGPT", vec!["gpt-4o".into()]);
/// assert!(reviewer.priming.contains("supervisor"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Display name used in events and error messages (e.g. `"Claude"`).
    pub name: String,
    /// System message prepended to every call.
    pub priming: String,
    /// Catalog returned when the provider's model listing fails.
    pub fallback_models: Vec<String>,
}

impl ProviderProfile {
    pub fn new(
        name: impl Into<String>,
        priming: impl Into<String>,
        fallback_models: Vec<String>,
    ) -> Self {
        ProviderProfile {
            name: name.into(),
            priming: priming.into(),
            fallback_models,
        }
    }

    /// Profile for the agent that produces work and declares its status.
    pub fn producer(name: impl Into<String>, fallback_models: Vec<String>) -> Self {
        Self::new(name, PRODUCER_PRIMING, fallback_models)
    }

    /// Profile for the agent that reviews the producer's output.
    pub fn consumer(name: impl Into<String>, fallback_models: Vec<String>) -> Self {
        Self::new(name, CONSUMER_PRIMING, fallback_models)
    }
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key.to_string())),
    }
}

fn read_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
