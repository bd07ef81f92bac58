//! # Duet
//!
//! Duet coordinates two remote Large Language Models that take turns on a shared task: a
//! *producer* (Agent A) writes and revises the work, and a *consumer* (Agent B) reviews each
//! revision and feeds critique back. The crate runs the loop, enforces its budgets and
//! streams every step to an observer.
//!
//! The crate provides layered abstractions for:
//!
//! * **Provider Flexibility**: [`ClientWrapper`] trait implemented for Anthropic Claude and
//!   OpenAI, with typed [`ClientError`]s separating transport failures from provider errors
//! * **Agents**: [`Agent`] pairs a client with a [`config::ProviderProfile`] (display name,
//!   priming text, fallback model catalog)
//! * **Turn Orchestration**: [`TurnOrchestrator`] alternates the two agents under an iteration
//!   budget and a wall-clock budget, detects `STATUS: [COMPLETE]` tags, and supports a manual
//!   step mode driven through [`SessionControl`]
//! * **Event Streaming**: every state change becomes a [`SessionEvent`] delivered through an
//!   [`EventSink`]
//! * **Connection Scoping**: [`SessionRegistry`] keeps at most one active session per
//!   connection and routes `start`, `stop` and `continue_round` commands
//! * **Transcript Export**: [`SessionReport`] serializes the full history and statistics as
//!   JSON
//!
//! ## Core Concepts
//!
//! ### A round
//!
//! Agent A receives the task plus the shared history. Its reply is recorded and scanned for
//! a status tag; `COMPLETE` ends the session before Agent B is called. Otherwise Agent B
//! receives A's reply as its prompt and the earlier history as context, its review is
//! recorded, and the iteration counter advances.
//!
//! ### Budgets
//!
//! Budgets are checked between rounds, never mid-round. A session with the default
//! [`config::SessionLimits`] runs at most 8 rounds or 180 seconds, whichever comes first.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duet::{Agent, ChannelSink, SessionEvent, SessionRequest, TurnOrchestrator};
//! use duet::clients::{claude::{self, ClaudeClient}, openai::{self, OpenAIClient}};
//! use duet::config::{DuetConfig, ProviderCredentials, ProviderProfile};
//! use duet::session_state::AgentSlot;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     duet::init_logger();
//!
//!     let config = DuetConfig::from_env()?;
//!     let credentials = ProviderCredentials::from_env()?;
//!
//!     let claude = ClaudeClient::new(&credentials.anthropic_api_key)?
//!         .with_timeout(config.request_timeout);
//!     let openai = OpenAIClient::new(&credentials.openai_api_key)?
//!         .with_timeout(config.request_timeout);
//!
//!     let agent_a = Arc::new(Agent::new(
//!         AgentSlot::A,
//!         ProviderProfile::producer("Claude", claude::fallback_models()),
//!         Arc::new(claude),
//!     ));
//!     let agent_b = Arc::new(Agent::new(
//!         AgentSlot::B,
//!         ProviderProfile::consumer("ChatGPT", openai::fallback_models()),
//!         Arc::new(openai),
//!     ));
//!
//!     let (sink, mut events) = ChannelSink::new();
//!     let orchestrator = TurnOrchestrator::new(
//!         SessionRequest::new("Write a URL shortener", "claude-3-5-sonnet-20241022", "gpt-4o", true),
//!         config.limits,
//!         agent_a,
//!         agent_b,
//!         Arc::new(sink),
//!     )?;
//!     let session = tokio::spawn(orchestrator.run());
//!
//!     while let Some(event) = events.recv().await {
//!         if let SessionEvent::RoundOutput { agent, content, .. } = &event {
//!             println!("--- Agent {} ---\n{}", agent, content);
//!         }
//!         if matches!(event, SessionEvent::SessionEnded { .. }) {
//!             break;
//!         }
//!     }
//!
//!     let report = session.await?;
//!     println!("{} tokens in {} rounds", report.session.total_tokens, report.session.iterations);
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding Duet can opt in to `RUST_LOG` driven diagnostics without choosing a
/// logging backend upfront.
///
/// ```rust
/// duet::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `duet` module.
pub mod duet;

// Re-exporting key items for easier external access.
pub use duet::agent;
pub use duet::agent::{Agent, AgentReply};
pub use duet::client_wrapper;
pub use duet::client_wrapper::{ClientError, ClientWrapper, Completion, Message, Role, TokenUsage};
pub use duet::clients;
pub use duet::completion;
pub use duet::completion::{CompletionDetector, SessionStatus, StatusTagDetector};
pub use duet::config;
pub use duet::config::{DuetConfig, SessionLimits};
pub use duet::event;
pub use duet::event::{ChannelSink, EventSink, LoggingSink, SessionEvent};
pub use duet::orchestrator;
pub use duet::orchestrator::{
    OrchestratorPhase, SessionControl, SessionError, SessionRequest, TurnOrchestrator,
};
pub use duet::registry;
pub use duet::registry::{Command, ConnectionId, SessionHandle, SessionRegistry};
pub use duet::session_state;
pub use duet::session_state::{AgentSlot, SessionReport, SessionState, StopReason, Turn};
