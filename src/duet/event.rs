//! Session events and the sinks that carry them to an observer.
//!
//! The [`TurnOrchestrator`](crate::orchestrator::TurnOrchestrator) reports every state change
//! as a [`SessionEvent`] through an [`EventSink`]. Sinks are transport-agnostic: the
//! [`ChannelSink`] hands events to whatever task forwards them to a socket, and the
//! [`LoggingSink`] mirrors them into the `log` facade.
//!
//! Delivery is best effort. A sink whose receiver has gone away drops events silently; the
//! session keeps running until it is stopped or its owning connection disconnects.
//!
//! # Event Flow (auto-run session ending on the iteration budget)
//!
//! ```text
//! SessionStarted
//!   └─ RoundOutput { agent: A }
//!   └─ StatusUpdate { iteration: 0, status: WORKING }
//!   └─ RoundOutput { agent: B }
//!   └─ StatusUpdate { iteration: 1 }
//!   ...
//! SessionEnded { iteration: 8, reason: iteration_budget }
//! ```
//!
//! With `auto_run` disabled a `WaitingForContinue` follows each round's final
//! `StatusUpdate`.
//!
//! # Wire shape
//!
//! ```
//! use duet::event::SessionEvent;
//! use duet::session_state::AgentSlot;
//!
//! let event = SessionEvent::RoundOutput {
//!     agent: AgentSlot::A,
//!     content: "fn main() {}".into(),
//!     tokens: Some(42),
//!     elapsed_seconds: 3,
//! };
//! let json = serde_json::to_value(&event).unwrap();
//! assert_eq!(json["type"], "round_output");
//! assert_eq!(json["agent"], "A");
//! assert_eq!(json["elapsedSeconds"], 3);
//! ```

use crate::completion::SessionStatus;
use crate::session_state::{AgentSlot, StopReason};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Everything an observer can learn about a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    /// The session left `IDLE`; emitted once before the first agent call.
    SessionStarted {
        session_id: String,
        task: String,
        model_a: String,
        model_b: String,
        auto_run: bool,
    },

    /// One agent finished its turn.
    RoundOutput {
        agent: AgentSlot,
        content: String,
        /// Usage reported by the provider, `None` when it reported none.
        tokens: Option<u64>,
        /// Whole seconds since the session started.
        elapsed_seconds: u64,
    },

    /// Progress snapshot after every agent turn.
    StatusUpdate {
        iteration: usize,
        max_iterations: usize,
        time_left_seconds: u64,
        status: SessionStatus,
    },

    /// Manual step mode: the loop is suspended until `continue_round()`.
    WaitingForContinue { iteration: usize },

    /// Terminal event; emitted exactly once per session.
    SessionEnded {
        iteration: usize,
        status: SessionStatus,
        total_tokens: u64,
        reason: StopReason,
    },

    /// A failure the observer should show. `agent` is set when an agent call failed.
    Error {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        agent: Option<AgentSlot>,
        message: String,
    },
}

impl SessionEvent {
    /// Snake-case event name, matching the serialized `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted { .. } => "session_started",
            SessionEvent::RoundOutput { .. } => "round_output",
            SessionEvent::StatusUpdate { .. } => "status_update",
            SessionEvent::WaitingForContinue { .. } => "waiting_for_continue",
            SessionEvent::SessionEnded { .. } => "session_ended",
            SessionEvent::Error { .. } => "error",
        }
    }

    /// Convenience constructor for errors not tied to an agent.
    pub fn error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            agent: None,
            message: message.into(),
        }
    }
}

/// Outbound channel to the session's observer.
///
/// The `Send + Sync` bound allows the sink to be shared between the registry and the
/// orchestrator task via `Arc<dyn EventSink>`.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: SessionEvent);
}

/// Forwards events into an unbounded tokio channel.
///
/// ```
/// use duet::event::{ChannelSink, EventSink, SessionEvent};
///
/// # #[tokio::main]
/// # async fn main() {
/// let (sink, mut events) = ChannelSink::new();
/// sink.emit(SessionEvent::error("boom")).await;
/// assert_eq!(events.recv().await.unwrap().name(), "error");
/// # }
/// ```
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelSink { sender }, receiver)
    }

    pub fn from_sender(sender: mpsc::UnboundedSender<SessionEvent>) -> Self {
        ChannelSink { sender }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            log::debug!("duet::event::ChannelSink: observer gone, event dropped");
        }
    }
}

/// Writes every event to the `log` facade under the `duet::event` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn emit(&self, event: SessionEvent) {
        match &event {
            SessionEvent::Error { agent, message } => {
                log::warn!("[{:?}] error: {}", agent, message)
            }
            SessionEvent::RoundOutput {
                agent,
                content,
                tokens,
                elapsed_seconds,
            } => log::info!(
                "[{}s] agent {} replied ({} chars, {:?} tokens)",
                elapsed_seconds,
                agent,
                content.len(),
                tokens
            ),
            other => log::info!("{:?}", other),
        }
    }
}
