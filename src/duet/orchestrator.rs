//! The turn-taking state machine that drives one collaboration session.
//!
//! A [`TurnOrchestrator`] owns one [`SessionState`] and runs it through repeated rounds:
//! Agent A works on the task, its reply is scanned for a status tag, and unless the task is
//! declared complete Agent B reviews that reply. Every step is reported to an
//! [`EventSink`]. The session stops on an explicit [`SessionControl::stop`], when the
//! iteration or time budget runs out, when Agent A declares `COMPLETE`, or when either agent
//! call fails.
//!
//! ```text
//! IDLE ──run()──▶ RUNNING ──round done, auto_run off──▶ AWAITING_CONTINUE
//!                   ▲  │                                        │
//!                   │  └──────────── continue_round() ◀─────────┘
//!                   │
//!                   └─▶ STOPPED (stop, budget, COMPLETE, agent failure)
//! ```
//!
//! Budgets are checked at round boundaries only. A slow provider call is never interrupted;
//! a stop requested while a call is in flight takes effect once that call resolves, and its
//! reply is still recorded.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use duet::agent::Agent;
//! use duet::clients::{claude::{self, ClaudeClient}, openai::{self, OpenAIClient}};
//! use duet::config::{ProviderProfile, SessionLimits};
//! use duet::event::LoggingSink;
//! use duet::orchestrator::{SessionRequest, TurnOrchestrator};
//! use duet::session_state::AgentSlot;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let agent_a = Arc::new(Agent::new(
//!     AgentSlot::A,
//!     ProviderProfile::producer("Claude", claude::fallback_models()),
//!     Arc::new(ClaudeClient::new(&std::env::var("ANTHROPIC_API_KEY")?)?),
//! ));
//! let agent_b = Arc::new(Agent::new(
//!     AgentSlot::B,
//!     ProviderProfile::consumer("ChatGPT", openai::fallback_models()),
//!     Arc::new(OpenAIClient::new(&std::env::var("OPENAI_API_KEY")?)?),
//! ));
//!
//! let request = SessionRequest::new("Write a CSV parser", "claude-3-5-sonnet-20241022", "gpt-4o", true);
//! let orchestrator = TurnOrchestrator::new(
//!     request,
//!     SessionLimits::default(),
//!     agent_a,
//!     agent_b,
//!     Arc::new(LoggingSink),
//! )?;
//! let report = orchestrator.run().await;
//! println!("{}", report.to_json_pretty()?);
//! # Ok(())
//! # }
//! ```

use crate::agent::{Agent, AgentReply};
use crate::client_wrapper::ClientError;
use crate::completion::{CompletionDetector, SessionStatus, StatusTagDetector};
use crate::config::SessionLimits;
use crate::event::{EventSink, SessionEvent};
use crate::session_state::{AgentSlot, SessionReport, SessionState, StopReason};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};

/// Lifecycle phase of an orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrchestratorPhase {
    Idle,
    Running,
    AwaitingContinue,
    Stopped,
}

/// Errors raised before a session exists.
///
/// ```
/// use duet::orchestrator::SessionError;
///
/// let err = SessionError::Conflict;
/// assert_eq!(err.to_string(), "A session is already running. Please stop it first.");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Missing task or model ids, or agents wired to the wrong slots.
    Validation(String),
    /// A start was requested while a session is active on the same connection.
    Conflict,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Validation(msg) => write!(f, "Invalid session request: {}", msg),
            SessionError::Conflict => {
                write!(f, "A session is already running. Please stop it first.")
            }
        }
    }
}

impl Error for SessionError {}

/// Parameters of a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub task: String,
    pub model_a: String,
    pub model_b: String,
    #[serde(default = "default_auto_run")]
    pub auto_run: bool,
}

fn default_auto_run() -> bool {
    true
}

impl SessionRequest {
    pub fn new(
        task: impl Into<String>,
        model_a: impl Into<String>,
        model_b: impl Into<String>,
        auto_run: bool,
    ) -> Self {
        SessionRequest {
            task: task.into(),
            model_a: model_a.into(),
            model_b: model_b.into(),
            auto_run,
        }
    }

    /// Rejects blank tasks and blank model ids.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.task.trim().is_empty() {
            return Err(SessionError::Validation("task description is empty".into()));
        }
        if self.model_a.trim().is_empty() {
            return Err(SessionError::Validation("no model selected for agent A".into()));
        }
        if self.model_b.trim().is_empty() {
            return Err(SessionError::Validation("no model selected for agent B".into()));
        }
        Ok(())
    }
}

struct ControlShared {
    phase: Mutex<OrchestratorPhase>,
    stop: watch::Sender<Option<StopReason>>,
    resume: Notify,
    snapshot: Mutex<Option<SessionReport>>,
}

impl ControlShared {
    fn phase(&self) -> MutexGuard<'_, OrchestratorPhase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle for signalling a running orchestrator.
///
/// Both signals are idempotent: a second `stop()` and a `continue_round()` outside
/// `AWAITING_CONTINUE` do nothing and return `false`.
#[derive(Clone)]
pub struct SessionControl {
    shared: Arc<ControlShared>,
}

impl SessionControl {
    fn new() -> (Self, watch::Receiver<Option<StopReason>>) {
        let (stop, stop_rx) = watch::channel(None);
        let control = SessionControl {
            shared: Arc::new(ControlShared {
                phase: Mutex::new(OrchestratorPhase::Idle),
                stop,
                resume: Notify::new(),
                snapshot: Mutex::new(None),
            }),
        };
        (control, stop_rx)
    }

    /// Request a stop. Returns `true` if this call was the one that requested it.
    pub fn stop(&self) -> bool {
        self.stop_with(StopReason::Requested)
    }

    /// Request a stop with an explicit reason (e.g. [`StopReason::Disconnected`]).
    pub fn stop_with(&self, reason: StopReason) -> bool {
        let phase = self.shared.phase();
        if *phase == OrchestratorPhase::Stopped {
            return false;
        }
        let requested = self.shared.stop.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if requested {
            log::info!("Stop requested ({:?}) while {:?}", reason, *phase);
        }
        requested
    }

    /// Resume a session suspended in manual step mode. Returns `true` if it was waiting.
    pub fn continue_round(&self) -> bool {
        let mut phase = self.shared.phase();
        if *phase != OrchestratorPhase::AwaitingContinue {
            return false;
        }
        *phase = OrchestratorPhase::Running;
        // notify_one keeps a permit if the orchestrator has not reached its wait yet.
        self.shared.resume.notify_one();
        true
    }

    pub fn phase(&self) -> OrchestratorPhase {
        *self.shared.phase()
    }

    /// `true` until the orchestrator has entered `STOPPED`.
    pub fn is_active(&self) -> bool {
        self.phase() != OrchestratorPhase::Stopped
    }

    pub fn stop_requested(&self) -> Option<StopReason> {
        *self.shared.stop.borrow()
    }

    /// Latest published snapshot of the session, including after it stopped.
    pub fn report(&self) -> Option<SessionReport> {
        self.shared
            .snapshot
            .lock()
            .map(|slot| slot.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// `true` if both handles control the same orchestrator.
    pub fn same_session(&self, other: &SessionControl) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn set_phase(&self, next: OrchestratorPhase) {
        *self.shared.phase() = next;
    }

    /// Enter `AWAITING_CONTINUE` unless a stop is already pending.
    fn begin_wait(&self) -> bool {
        let mut phase = self.shared.phase();
        if self.shared.stop.borrow().is_some() {
            return false;
        }
        *phase = OrchestratorPhase::AwaitingContinue;
        true
    }

    fn publish(&self, report: SessionReport) {
        match self.shared.snapshot.lock() {
            Ok(mut slot) => *slot = Some(report),
            Err(poisoned) => *poisoned.into_inner() = Some(report),
        }
    }
}

/// Drives one session; consumed by [`TurnOrchestrator::run`].
pub struct TurnOrchestrator {
    state: SessionState,
    agent_a: Arc<Agent>,
    agent_b: Arc<Agent>,
    sink: Arc<dyn EventSink>,
    detector: Arc<dyn CompletionDetector>,
    control: SessionControl,
    stop_rx: watch::Receiver<Option<StopReason>>,
}

impl TurnOrchestrator {
    /// Validate `request` and build an orchestrator in `IDLE`.
    pub fn new(
        request: SessionRequest,
        limits: SessionLimits,
        agent_a: Arc<Agent>,
        agent_b: Arc<Agent>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, SessionError> {
        request.validate()?;
        if agent_a.slot() != AgentSlot::A || agent_b.slot() != AgentSlot::B {
            return Err(SessionError::Validation(
                "agents must occupy slots A and B respectively".into(),
            ));
        }

        let state = SessionState::new(
            request.task.trim(),
            request.model_a.trim(),
            request.model_b.trim(),
            limits.max_iterations,
            limits.time_limit,
            request.auto_run,
        );
        let (control, stop_rx) = SessionControl::new();

        Ok(TurnOrchestrator {
            state,
            agent_a,
            agent_b,
            sink,
            detector: Arc::new(StatusTagDetector),
            control,
            stop_rx,
        })
    }

    /// Replace the default [`StatusTagDetector`] (builder pattern).
    pub fn with_completion_detector(mut self, detector: Arc<dyn CompletionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the session to completion and return its final report.
    ///
    /// Never panics or returns an error for agent failures: those end the session with
    /// [`StopReason::AgentFailed`] after an `error` event.
    pub async fn run(mut self) -> SessionReport {
        self.control.set_phase(OrchestratorPhase::Running);
        self.state.activate();
        log::info!(
            "Session {} started: A={} ({}), B={} ({}), max {} rounds, {}s budget, auto_run={}",
            self.state.session_id(),
            self.agent_a.name(),
            self.state.model_a(),
            self.agent_b.name(),
            self.state.model_b(),
            self.state.max_iterations(),
            self.state.time_limit().as_secs(),
            self.state.auto_run()
        );

        self.emit(SessionEvent::SessionStarted {
            session_id: self.state.session_id().to_string(),
            task: self.state.task().to_string(),
            model_a: self.state.model_a().to_string(),
            model_b: self.state.model_b().to_string(),
            auto_run: self.state.auto_run(),
        })
        .await;
        self.control.publish(self.state.report());

        let reason = self.drive().await;
        self.finish(reason).await
    }

    async fn drive(&mut self) -> StopReason {
        loop {
            if let Some(reason) = self.boundary_check() {
                return reason;
            }

            if let Err(reason) = self.play_round().await {
                return reason;
            }

            if let Some(reason) = self.boundary_check() {
                return reason;
            }

            if !self.state.auto_run() {
                if let Some(reason) = self.await_continue().await {
                    return reason;
                }
            }
        }
    }

    /// One Agent-A/Agent-B exchange. `Err` carries the reason the session must stop.
    async fn play_round(&mut self) -> Result<(), StopReason> {
        let reply = {
            let result = self
                .agent_a
                .send_message(
                    self.state.task(),
                    self.state.history(),
                    self.state.model_a(),
                )
                .await;
            match result {
                Ok(reply) => reply,
                Err(err) => return Err(self.report_failure(AgentSlot::A, err).await),
            }
        };

        let status = self.detector.detect(&reply.content);
        self.record(AgentSlot::A, reply).await;
        self.state.set_status(status);
        self.emit_status().await;

        if status == SessionStatus::Complete {
            log::info!(
                "Agent A declared the task complete after {} rounds",
                self.state.iteration()
            );
            return Err(StopReason::Completed);
        }
        if let Some(reason) = self.stop_requested() {
            return Err(reason);
        }

        let reply = {
            let history = self.state.history();
            let (latest, earlier) = match history.split_last() {
                Some((latest, earlier)) => (latest.content.as_str(), earlier),
                None => ("", history),
            };
            let result = self
                .agent_b
                .send_message(latest, earlier, self.state.model_b())
                .await;
            match result {
                Ok(reply) => reply,
                Err(err) => return Err(self.report_failure(AgentSlot::B, err).await),
            }
        };

        self.record(AgentSlot::B, reply).await;
        self.state.complete_round();
        self.emit_status().await;
        Ok(())
    }

    /// Suspend until `continue_round()` or a stop request.
    async fn await_continue(&mut self) -> Option<StopReason> {
        if !self.control.begin_wait() {
            return self.stop_requested();
        }

        log::info!(
            "Session {} waiting for continue after round {}",
            self.state.session_id(),
            self.state.iteration()
        );
        self.emit(SessionEvent::WaitingForContinue {
            iteration: self.state.iteration(),
        })
        .await;

        let shared = Arc::clone(&self.control.shared);
        loop {
            tokio::select! {
                _ = shared.resume.notified() => return None,
                changed = self.stop_rx.changed() => {
                    if let Some(reason) = *self.stop_rx.borrow() {
                        return Some(reason);
                    }
                    if changed.is_err() {
                        return Some(StopReason::Requested);
                    }
                }
            }
        }
    }

    /// Pending stop request, or an exhausted budget.
    fn boundary_check(&self) -> Option<StopReason> {
        if let Some(reason) = self.stop_requested() {
            return Some(reason);
        }
        if self.state.iteration_budget_exhausted() {
            log::info!(
                "Iteration budget of {} rounds exhausted",
                self.state.max_iterations()
            );
            return Some(StopReason::IterationBudget);
        }
        if self.state.time_budget_exhausted() {
            log::info!(
                "Time budget of {}s exhausted",
                self.state.time_limit().as_secs()
            );
            return Some(StopReason::TimeBudget);
        }
        None
    }

    fn stop_requested(&self) -> Option<StopReason> {
        *self.stop_rx.borrow()
    }

    async fn record(&mut self, slot: AgentSlot, reply: AgentReply) {
        let AgentReply { content, tokens } = reply;
        self.emit(SessionEvent::RoundOutput {
            agent: slot,
            content: content.clone(),
            tokens,
            elapsed_seconds: self.state.elapsed().as_secs(),
        })
        .await;
        self.state.record_turn(slot, content, tokens);
    }

    async fn report_failure(&mut self, slot: AgentSlot, err: ClientError) -> StopReason {
        let agent = match slot {
            AgentSlot::A => &self.agent_a,
            AgentSlot::B => &self.agent_b,
        };
        let kind = if err.is_transport_error() {
            "transport"
        } else {
            "provider"
        };
        log::error!(
            "Agent {} ({}) failed with a {} error in round {}: {}",
            slot,
            agent.name(),
            kind,
            self.state.iteration() + 1,
            err
        );
        let message = format!("Agent {} ({}) error: {}", slot, agent.name(), err);
        self.emit(SessionEvent::Error {
            agent: Some(slot),
            message,
        })
        .await;
        StopReason::AgentFailed
    }

    /// Publishes a fresh snapshot and reports progress after an agent turn.
    async fn emit_status(&self) {
        self.control.publish(self.state.report());
        self.emit(SessionEvent::StatusUpdate {
            iteration: self.state.iteration(),
            max_iterations: self.state.max_iterations(),
            time_left_seconds: self.state.time_left().as_secs(),
            status: self.state.status(),
        })
        .await;
    }

    async fn emit(&self, event: SessionEvent) {
        self.sink.emit(event).await;
    }

    async fn finish(mut self, reason: StopReason) -> SessionReport {
        self.state.deactivate(reason);
        self.control.set_phase(OrchestratorPhase::Stopped);
        log::info!(
            "Session {} ended ({}): {} rounds, status {}, {} tokens",
            self.state.session_id(),
            reason,
            self.state.iteration(),
            self.state.status(),
            self.state.total_tokens()
        );

        let report = self.state.report();
        self.control.publish(report.clone());
        self.emit(SessionEvent::SessionEnded {
            iteration: self.state.iteration(),
            status: self.state.status(),
            total_tokens: self.state.total_tokens(),
            reason,
        })
        .await;
        report
    }
}
