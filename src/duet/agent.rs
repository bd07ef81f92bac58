//! The LLM client capability used by the orchestrator.
//!
//! Both collaborators are the same [`Agent`] type: a [`ClientWrapper`] for transport plus a
//! [`ProviderProfile`] for identity, priming text and fallback catalog. The agent is
//! stateless across calls; the caller passes the shared history every time.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duet::agent::Agent;
//! use duet::clients::claude::{self, ClaudeClient};
//! use duet::config::ProviderProfile;
//! use duet::session_state::AgentSlot;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(ClaudeClient::new(&std::env::var("ANTHROPIC_API_KEY")?)?);
//! let producer = Agent::new(
//!     AgentSlot::A,
//!     ProviderProfile::producer("Claude", claude::fallback_models()),
//!     client,
//! );
//!
//! let reply = producer
//!     .send_message("Write a FizzBuzz in Rust", &[], "claude-3-5-sonnet-20241022")
//!     .await?;
//! println!("{} ({:?} tokens)", reply.content, reply.tokens);
//! # Ok(())
//! # }
//! ```

use crate::client_wrapper::{ClientError, ClientWrapper, Message, Role};
use crate::config::ProviderProfile;
use crate::session_state::{AgentSlot, Turn};
use std::sync::Arc;

/// Text and usage returned by one agent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub content: String,
    pub tokens: Option<u64>,
}

/// One of the two collaborating agents.
pub struct Agent {
    slot: AgentSlot,
    profile: ProviderProfile,
    client: Arc<dyn ClientWrapper>,
}

impl Agent {
    pub fn new(slot: AgentSlot, profile: ProviderProfile, client: Arc<dyn ClientWrapper>) -> Self {
        Agent {
            slot,
            profile,
            client,
        }
    }

    pub fn slot(&self) -> AgentSlot {
        self.slot
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    /// Build the message list for one call: priming, then the history from this agent's
    /// point of view (its own turns as `assistant`, the peer's as `user`), then `prompt`.
    pub fn build_messages(&self, prompt: &str, history: &[Turn]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.profile.priming.is_empty() {
            messages.push(Message::new(Role::System, self.profile.priming.clone()));
        }
        for turn in history {
            let role = if turn.role.slot() == self.slot {
                Role::Assistant
            } else {
                Role::User
            };
            messages.push(Message::new(role, turn.content.clone()));
        }
        messages.push(Message::new(Role::User, prompt));
        messages
    }

    /// Ask the agent to respond to `prompt` given the shared `history`.
    pub async fn send_message(
        &self,
        prompt: &str,
        history: &[Turn],
        model: &str,
    ) -> Result<AgentReply, ClientError> {
        let messages = self.build_messages(prompt, history);
        log::debug!(
            "Agent {} ({}) calling {} with {} messages",
            self.slot,
            self.profile.name,
            model,
            messages.len()
        );

        let completion = self.client.send_message(&messages, model).await?;
        Ok(AgentReply {
            content: completion.content,
            tokens: completion.usage.map(|u| u.total_tokens),
        })
    }

    /// Models offered by the provider, or the profile's fallback list if listing fails.
    pub async fn list_available_models(&self) -> Vec<String> {
        match self.client.list_models().await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => {
                log::warn!(
                    "{} returned an empty model list, using fallback catalog",
                    self.profile.name
                );
                self.profile.fallback_models.clone()
            }
            Err(err) => {
                log::warn!(
                    "Listing {} models failed ({}), using fallback catalog",
                    self.profile.name,
                    err
                );
                self.profile.fallback_models.clone()
            }
        }
    }
}
