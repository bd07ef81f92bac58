//! The `OpenAIClient` struct implements [`ClientWrapper`] for OpenAI's Chat Completions API
//! and for any OpenAI-compatible endpoint (self-hosted gateways, proxies).
//!
//! # Example
//!
//! ```rust,no_run
//! use duet::client_wrapper::{ClientWrapper, Message, Role};
//! use duet::clients::openai::{Model, OpenAIClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenAIClient::new(&std::env::var("OPENAI_API_KEY")?)?;
//!     let reply = client
//!         .send_message(
//!             &[
//!                 Message::new(Role::System, "You are terse."),
//!                 Message::new(Role::User, "Hello!"),
//!             ],
//!             &duet::clients::openai::model_to_string(Model::GPT4o),
//!         )
//!         .await?;
//!     println!("{} ({:?} tokens)", reply.content, reply.usage.map(|u| u.total_tokens));
//!     Ok(())
//! }
//! ```

use crate::client_wrapper::{ClientError, ClientWrapper, Completion, Message, TokenUsage};
use crate::clients::common::{
    endpoint, send_and_decode, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_REQUEST_TIMEOUT,
};
use crate::clients::http_pool::get_http_client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROVIDER: &str = "OpenAI";

/// Default REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Well-known chat model identifiers.
#[derive(Clone, Copy, Debug)]
pub enum Model {
    /// `gpt-4o` – Omni model, the usual reviewer choice.
    GPT4o,
    /// `gpt-4o-mini` – cost effective GPT-4o derivative.
    GPT4oMini,
    /// `gpt-4-turbo` – previous generation flagship.
    GPT4Turbo,
    /// `gpt-4-turbo-preview` – preview alias of GPT-4 Turbo.
    GPT4TurboPreview,
    /// `gpt-4.1` – general availability GPT-4.1.
    GPT41,
    /// `gpt-4.1-mini` – reduced cost GPT-4.1 tier.
    GPT41Mini,
    /// `gpt-3.5-turbo` – legacy low-cost chat model.
    GPT35Turbo,
}

/// Convert a [`Model`] variant into the string identifier expected by the REST API.
pub fn model_to_string(model: Model) -> String {
    match model {
        Model::GPT4o => "gpt-4o".to_string(),
        Model::GPT4oMini => "gpt-4o-mini".to_string(),
        Model::GPT4Turbo => "gpt-4-turbo".to_string(),
        Model::GPT4TurboPreview => "gpt-4-turbo-preview".to_string(),
        Model::GPT41 => "gpt-4.1".to_string(),
        Model::GPT41Mini => "gpt-4.1-mini".to_string(),
        Model::GPT35Turbo => "gpt-3.5-turbo".to_string(),
    }
}

/// Built-in catalog used when the models endpoint cannot be reached.
pub fn fallback_models() -> Vec<String> {
    [Model::GPT4o, Model::GPT4oMini, Model::GPT4Turbo, Model::GPT35Turbo]
        .iter()
        .map(|m| model_to_string(*m))
        .collect()
}

/// Client wrapper for OpenAI's Chat Completions API.
pub struct OpenAIClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
    timeout: Duration,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAIClient {
    /// Client for the public OpenAI endpoint.
    pub fn new(secret_key: &str) -> Result<Self, ClientError> {
        Self::new_with_base_url(secret_key, DEFAULT_BASE_URL)
    }

    /// Client targeting a custom OpenAI-compatible base URL (including the `/v1` suffix).
    pub fn new_with_base_url(secret_key: &str, base_url: &str) -> Result<Self, ClientError> {
        Ok(OpenAIClient {
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
}

fn build_chat_request<'a>(
    messages: &'a [Message],
    model: &'a str,
    max_tokens: u32,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        max_tokens,
        messages: messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
    }
}

fn completion_from_response(response: ChatResponse) -> Result<Completion, ClientError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ClientError::Malformed {
            provider: PROVIDER.to_string(),
            detail: "response contained no message content".to_string(),
        })?;

    let usage = response.usage.map(|u| TokenUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        total_tokens: u
            .total_tokens
            .unwrap_or(u.prompt_tokens + u.completion_tokens),
    });

    Ok(Completion { content, usage })
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn send_message(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<Completion, ClientError> {
        let body = build_chat_request(messages, model, self.max_output_tokens);
        let request = self
            .http
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.secret_key)
            .timeout(self.timeout)
            .json(&body);

        let response: ChatResponse = send_and_decode(PROVIDER, request).await?;
        completion_from_response(response)
    }

    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let request = self
            .http
            .get(endpoint(&self.base_url, "models"))
            .bearer_auth(&self.secret_key)
            .timeout(self.timeout);

        let list: ModelList = send_and_decode(PROVIDER, request).await?;
        let mut ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }
}
