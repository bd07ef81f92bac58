//! Anthropic Claude client speaking the native Messages API.
//!
//! Claude's wire format differs from OpenAI's in three ways that matter here: the system
//! prompt travels in a top-level `system` field, the conversation must open with a `user`
//! turn and alternate roles, and the reply is a list of typed content blocks. The
//! [`ClaudeClient`] hides all three behind the same [`ClientWrapper`] contract.
//!
//! # Example
//!
//! ```rust,no_run
//! use duet::client_wrapper::{ClientWrapper, Message, Role};
//! use duet::clients::claude::{model_to_string, ClaudeClient, Model};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClaudeClient::new(&std::env::var("ANTHROPIC_API_KEY")?)?;
//!     let reply = client
//!         .send_message(
//!             &[Message::new(Role::User, "List three Claude capabilities.")],
//!             &model_to_string(Model::ClaudeSonnet35),
//!         )
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use crate::client_wrapper::{ClientError, ClientWrapper, Completion, Message, Role, TokenUsage};
use crate::clients::common::{
    endpoint, send_and_decode, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_REQUEST_TIMEOUT,
};
use crate::clients::http_pool::get_http_client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROVIDER: &str = "Claude";

/// Default REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Value sent in the `anthropic-version` header.
pub const API_VERSION: &str = "2023-06-01";

/// Placeholder opening turn used when a conversation would otherwise start with the model.
const LEADING_USER_TURN: &str = "Continue.";

/// Claude models commonly used as the producing agent.
#[derive(Clone, Copy, Debug)]
pub enum Model {
    /// `claude-3-5-sonnet-20241022` – balanced coding model.
    ClaudeSonnet35,
    /// `claude-3-5-haiku-20241022` – fastest 3.5 tier.
    ClaudeHaiku35,
    /// `claude-3-7-sonnet-latest` – extended reasoning Sonnet.
    ClaudeSonnet37,
    /// `claude-sonnet-4-0` – balanced reasoning + throughput.
    ClaudeSonnet4,
    /// `claude-opus-4-0` – most capable Claude 4 tier.
    ClaudeOpus4,
    /// `claude-3-opus-20240229` – legacy Opus.
    ClaudeOpus3,
}

/// Convert a [`Model`] variant into its public string identifier.
pub fn model_to_string(model: Model) -> String {
    match model {
        Model::ClaudeSonnet35 => "claude-3-5-sonnet-20241022".to_string(),
        Model::ClaudeHaiku35 => "claude-3-5-haiku-20241022".to_string(),
        Model::ClaudeSonnet37 => "claude-3-7-sonnet-latest".to_string(),
        Model::ClaudeSonnet4 => "claude-sonnet-4-0".to_string(),
        Model::ClaudeOpus4 => "claude-opus-4-0".to_string(),
        Model::ClaudeOpus3 => "claude-3-opus-20240229".to_string(),
    }
}

/// Built-in catalog used when the models endpoint cannot be reached.
pub fn fallback_models() -> Vec<String> {
    [
        Model::ClaudeSonnet35,
        Model::ClaudeHaiku35,
        Model::ClaudeSonnet37,
        Model::ClaudeOpus3,
    ]
    .iter()
    .map(|m| model_to_string(*m))
    .collect()
}

/// Client wrapper for Anthropic's Messages API.
pub struct ClaudeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
    timeout: Duration,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl ClaudeClient {
    /// Client for the public Anthropic endpoint.
    pub fn new(secret_key: &str) -> Result<Self, ClientError> {
        Self::new_with_base_url(secret_key, DEFAULT_BASE_URL)
    }

    /// Client pointing at a custom Claude-compatible base URL (including the `/v1` suffix).
    pub fn new_with_base_url(secret_key: &str, base_url: &str) -> Result<Self, ClientError> {
        Ok(ClaudeClient {
            http: get_http_client(PROVIDER, base_url)?,
            secret_key: secret_key.to_string(),
            base_url: base_url.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        })
    }

    /// Override the per-call timeout (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the requested completion length (builder pattern).
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    fn authorised(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("x-api-key", &self.secret_key)
            .header("anthropic-version", API_VERSION)
            .timeout(self.timeout)
    }
}

/// Reshape a generic message list into a Messages API request.
///
/// System messages are joined into the `system` field. Consecutive turns with the same
/// role are merged with a blank line, and a placeholder user turn is inserted when the
/// conversation would otherwise open with an assistant turn.
fn build_messages_request(messages: &[Message], model: &str, max_tokens: u32) -> MessagesRequest {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut wire: Vec<WireMessage> = Vec::with_capacity(messages.len());

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                system_parts.push(&msg.content);
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        match wire.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => wire.push(WireMessage {
                role,
                content: msg.content.clone(),
            }),
        }
    }

    if wire.first().map_or(false, |m| m.role == "assistant") {
        wire.insert(
            0,
            WireMessage {
                role: "user",
                content: LEADING_USER_TURN.to_string(),
            },
        );
    }

    MessagesRequest {
        model: model.to_string(),
        max_tokens,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        messages: wire,
    }
}

fn completion_from_response(response: MessagesResponse) -> Result<Completion, ClientError> {
    let texts: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();

    if texts.is_empty() {
        return Err(ClientError::Malformed {
            provider: PROVIDER.to_string(),
            detail: "response contained no text blocks".to_string(),
        });
    }

    let usage = response.usage.map(|u| TokenUsage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
    });

    Ok(Completion {
        content: texts.join(""),
        usage,
    })
}

#[async_trait]
impl ClientWrapper for ClaudeClient {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn send_message(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<Completion, ClientError> {
        let body = build_messages_request(messages, model, self.max_output_tokens);
        let request = self
            .authorised(self.http.post(endpoint(&self.base_url, "messages")))
            .json(&body);

        let response: MessagesResponse = send_and_decode(PROVIDER, request).await?;
        completion_from_response(response)
    }

    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let request = self.authorised(self.http.get(endpoint(&self.base_url, "models")));
        let list: ModelList = send_and_decode(PROVIDER, request).await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}
