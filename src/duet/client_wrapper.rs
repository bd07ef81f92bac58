//! Provider-neutral types shared by every LLM transport.
//!
//! A [`ClientWrapper`] is a thin wrapper around one remote LLM service. It knows how to turn
//! a role-tagged message list into that vendor's wire format and back, and nothing else: it
//! keeps no conversation state between calls. Conversational memory belongs to the
//! [`TurnOrchestrator`](crate::orchestrator::TurnOrchestrator), and persona priming belongs to
//! the [`Agent`](crate::agent::Agent) that wraps the client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Represents the possible roles for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Steers the model's behaviour for the whole exchange.
    System,
    /// Input the model should respond to.
    User,
    /// Content previously generated by the model.
    Assistant,
}

impl Role {
    /// Wire name shared by the OpenAI and Anthropic chat payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single role-tagged message sent to an LLM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Text generated by one provider call together with the usage it reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    /// `None` when the provider omitted usage from its response.
    pub usage: Option<TokenUsage>,
}

/// Failure of a single provider call.
///
/// The variants split along the line observers care about: the call never got a proper
/// answer ([`ClientError::Timeout`], [`ClientError::Transport`]) or the provider answered
/// with something unusable ([`ClientError::Rejected`], [`ClientError::Malformed`]).
///
/// ```
/// use duet::client_wrapper::ClientError;
///
/// let err = ClientError::Rejected {
///     provider: "OpenAI".into(),
///     status: 429,
///     body: "quota exceeded".into(),
/// };
/// assert_eq!(err.to_string(), "OpenAI API error: 429 - quota exceeded");
/// assert!(err.is_provider_error());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientError {
    /// The request did not complete within the client's per-call timeout.
    Timeout { provider: String },
    /// Connection-level failure (DNS, refused connection, TLS, broken body stream).
    Transport { provider: String, detail: String },
    /// The provider answered with a non-success status (bad model id, quota, auth).
    Rejected {
        provider: String,
        status: u16,
        body: String,
    },
    /// The provider answered 2xx but the payload did not have the expected shape.
    Malformed { provider: String, detail: String },
}

impl ClientError {
    /// Builds the matching variant from a `reqwest` failure.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout {
                provider: provider.to_string(),
            }
        } else if err.is_decode() {
            ClientError::Malformed {
                provider: provider.to_string(),
                detail: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            ClientError::Rejected {
                provider: provider.to_string(),
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ClientError::Transport {
                provider: provider.to_string(),
                detail: err.to_string(),
            }
        }
    }

    /// Name of the provider that produced the error.
    pub fn provider(&self) -> &str {
        match self {
            ClientError::Timeout { provider }
            | ClientError::Transport { provider, .. }
            | ClientError::Rejected { provider, .. }
            | ClientError::Malformed { provider, .. } => provider,
        }
    }

    /// `true` for timeouts and network failures.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. } | ClientError::Transport { .. }
        )
    }

    /// `true` when the provider answered but the answer was unusable.
    pub fn is_provider_error(&self) -> bool {
        !self.is_transport_error()
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Timeout { provider } => write!(f, "{} API request timed out", provider),
            ClientError::Transport { provider, detail } => {
                write!(f, "{} API error: {}", provider, detail)
            }
            ClientError::Rejected {
                provider,
                status,
                body,
            } => write!(f, "{} API error: {} - {}", provider, status, body),
            ClientError::Malformed { provider, detail } => {
                write!(f, "Invalid response from {} API: {}", provider, detail)
            }
        }
    }
}

impl Error for ClientError {}

/// Trait defining the interface to interact with a remote LLM service.
///
/// Implementations must be stateless with respect to the conversation: every call carries
/// the full message list it needs.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Human-readable provider name used in logs and error messages (e.g. `"OpenAI"`).
    fn provider_name(&self) -> &str;

    /// Send `messages` to `model` and return the generated text plus reported usage.
    async fn send_message(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<Completion, ClientError>;

    /// Model identifiers the provider currently offers to this API key.
    async fn list_models(&self) -> Result<Vec<String>, ClientError>;
}
