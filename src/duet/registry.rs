//! Connection-scoped bookkeeping of running sessions.
//!
//! The [`SessionRegistry`] maps each external connection to at most one active
//! [`TurnOrchestrator`]. It owns the two shared [`Agent`]s, spawns every session on its own
//! tokio task, and routes the three commands a controlling connection can send: `start`,
//! `stop` and `continue_round`. Sessions on different connections share nothing mutable.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duet::agent::Agent;
//! use duet::clients::{claude::{self, ClaudeClient}, openai::{self, OpenAIClient}};
//! use duet::config::{ProviderProfile, SessionLimits};
//! use duet::event::ChannelSink;
//! use duet::registry::{Command, ConnectionId, SessionRegistry};
//! use duet::session_state::AgentSlot;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SessionRegistry::new(
//!     Arc::new(Agent::new(
//!         AgentSlot::A,
//!         ProviderProfile::producer("Claude", claude::fallback_models()),
//!         Arc::new(ClaudeClient::new(&std::env::var("ANTHROPIC_API_KEY")?)?),
//!     )),
//!     Arc::new(Agent::new(
//!         AgentSlot::B,
//!         ProviderProfile::consumer("ChatGPT", openai::fallback_models()),
//!         Arc::new(OpenAIClient::new(&std::env::var("OPENAI_API_KEY")?)?),
//!     )),
//!     SessionLimits::default(),
//! );
//!
//! let connection = ConnectionId::from("socket-1");
//! let (sink, mut events) = ChannelSink::new();
//! let command: Command = serde_json::from_str(
//!     r#"{"type":"start","task":"Write a tokenizer","modelA":"claude-3-5-sonnet-20241022","modelB":"gpt-4o","autoRun":true}"#,
//! )?;
//! registry.dispatch(&connection, command, Arc::new(sink)).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

use crate::agent::Agent;
use crate::completion::CompletionDetector;
use crate::config::SessionLimits;
use crate::event::{EventSink, SessionEvent};
use crate::orchestrator::{SessionControl, SessionError, SessionRequest, TurnOrchestrator};
use crate::session_state::{AgentSlot, SessionReport, StopReason};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Identity of one controlling connection (e.g. a WebSocket id).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        ConnectionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        ConnectionId(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        ConnectionId(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Commands accepted from a controlling connection.
///
/// ```
/// use duet::registry::Command;
///
/// let stop: Command = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
/// assert_eq!(stop, Command::Stop);
/// let step: Command = serde_json::from_str(r#"{"type":"continue_round"}"#).unwrap();
/// assert_eq!(step, Command::ContinueRound);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Start(SessionRequest),
    Stop,
    ContinueRound,
}

/// A spawned session: its control handle and the task that will yield its final report.
pub struct SessionHandle {
    pub control: SessionControl,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Wait for the session to stop and return its final report.
    pub async fn finished(self) -> Option<SessionReport> {
        match self.task.await {
            Ok(report) => Some(report),
            Err(err) => {
                log::error!("Session task ended abnormally: {}", err);
                None
            }
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    active: HashMap<ConnectionId, SessionControl>,
    finished: HashMap<ConnectionId, SessionReport>,
}

/// Maps connections to their single active session.
pub struct SessionRegistry {
    agent_a: Arc<Agent>,
    agent_b: Arc<Agent>,
    limits: SessionLimits,
    detector: Option<Arc<dyn CompletionDetector>>,
    inner: Arc<Mutex<RegistryInner>>,
}

impl SessionRegistry {
    pub fn new(agent_a: Arc<Agent>, agent_b: Arc<Agent>, limits: SessionLimits) -> Self {
        SessionRegistry {
            agent_a,
            agent_b,
            limits,
            detector: None,
            inner: Arc::new(Mutex::new(RegistryInner::default())),
        }
    }

    /// Use `detector` for every session started from now on (builder pattern).
    pub fn with_completion_detector(mut self, detector: Arc<dyn CompletionDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Start a session for `connection`, publishing its events to `sink`.
    ///
    /// Fails with [`SessionError::Conflict`] if the connection already has an active
    /// session (which is left untouched) and with [`SessionError::Validation`] for blank
    /// arguments. In both cases the observer also receives an `error` event.
    pub async fn start(
        &self,
        connection: &ConnectionId,
        request: SessionRequest,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionHandle, SessionError> {
        let orchestrator = match TurnOrchestrator::new(
            request,
            self.limits,
            Arc::clone(&self.agent_a),
            Arc::clone(&self.agent_b),
            Arc::clone(&sink),
        ) {
            Ok(orchestrator) => orchestrator,
            Err(err) => {
                log::warn!("Rejected start on {}: {}", connection, err);
                sink.emit(SessionEvent::error(err.to_string())).await;
                return Err(err);
            }
        };
        let orchestrator = match &self.detector {
            Some(detector) => orchestrator.with_completion_detector(Arc::clone(detector)),
            None => orchestrator,
        };

        let mut inner = self.inner.lock().await;
        let running = inner
            .active
            .get(connection)
            .map_or(false, |existing| existing.is_active());
        if running {
            drop(inner);
            log::warn!("Rejected start on {}: session already running", connection);
            let err = SessionError::Conflict;
            sink.emit(SessionEvent::error(err.to_string())).await;
            return Err(err);
        }

        let control = orchestrator.control();
        inner.active.insert(connection.clone(), control.clone());
        inner.finished.remove(connection);
        drop(inner);

        let registry = Arc::clone(&self.inner);
        let owner = connection.clone();
        let own_control = control.clone();
        let task = tokio::spawn(async move {
            let report = orchestrator.run().await;
            let mut inner = registry.lock().await;
            let still_ours = inner
                .active
                .get(&owner)
                .map_or(false, |current| current.same_session(&own_control));
            // A disconnect removes the entry first, so a gone connection keeps no report.
            if still_ours {
                inner.active.remove(&owner);
                inner.finished.insert(owner, report.clone());
            }
            report
        });

        log::info!("Session started on connection {}", connection);
        Ok(SessionHandle { control, task })
    }

    /// Stop the connection's session. Always accepted; `false` if nothing was running.
    pub async fn stop(&self, connection: &ConnectionId) -> bool {
        self.stop_with(connection, StopReason::Requested).await
    }

    /// Resume a session suspended in manual step mode; ignored otherwise.
    pub async fn continue_round(&self, connection: &ConnectionId) -> bool {
        let inner = self.inner.lock().await;
        inner
            .active
            .get(connection)
            .map_or(false, |control| control.continue_round())
    }

    /// The connection went away: stop its session and forget its last report.
    pub async fn disconnect(&self, connection: &ConnectionId) {
        let mut inner = self.inner.lock().await;
        if let Some(control) = inner.active.remove(connection) {
            control.stop_with(StopReason::Disconnected);
        }
        inner.finished.remove(connection);
        drop(inner);
        log::info!("Connection {} disconnected", connection);
    }

    /// Route a command from `connection`; `sink` receives events of a started session.
    pub async fn dispatch(
        &self,
        connection: &ConnectionId,
        command: Command,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), SessionError> {
        match command {
            Command::Start(request) => self.start(connection, request, sink).await.map(|_| ()),
            Command::Stop => {
                self.stop(connection).await;
                Ok(())
            }
            Command::ContinueRound => {
                self.continue_round(connection).await;
                Ok(())
            }
        }
    }

    pub async fn is_active(&self, connection: &ConnectionId) -> bool {
        let inner = self.inner.lock().await;
        inner
            .active
            .get(connection)
            .map_or(false, |control| control.is_active())
    }

    /// Number of connections with a session that has not stopped yet.
    pub async fn active_sessions(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .active
            .values()
            .filter(|control| control.is_active())
            .count()
    }

    /// Live snapshot of the running session, or the final report of the last one.
    pub async fn report(&self, connection: &ConnectionId) -> Option<SessionReport> {
        let inner = self.inner.lock().await;
        if let Some(report) = inner.active.get(connection).and_then(|c| c.report()) {
            return Some(report);
        }
        inner.finished.get(connection).cloned()
    }

    /// Advisory model catalog for one of the two providers.
    pub async fn list_models(&self, slot: AgentSlot) -> Vec<String> {
        match slot {
            AgentSlot::A => self.agent_a.list_available_models().await,
            AgentSlot::B => self.agent_b.list_available_models().await,
        }
    }

    async fn stop_with(&self, connection: &ConnectionId, reason: StopReason) -> bool {
        let inner = self.inner.lock().await;
        inner
            .active
            .get(connection)
            .map_or(false, |control| control.stop_with(reason))
    }
}
