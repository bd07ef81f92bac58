//! The mutable record of one collaboration run and its JSON export.
//!
//! A [`SessionState`] is owned by exactly one
//! [`TurnOrchestrator`](crate::orchestrator::TurnOrchestrator) and mutated only through it.
//! Its history is append-only and replayed verbatim (in order) to every agent call.
//! [`SessionReport`] is the detached, serializable view of a state at some instant.

use crate::completion::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Which of the two agents acted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentSlot {
    /// The producer: works on the task and declares its status.
    A,
    /// The consumer: reviews the producer's latest output.
    B,
}

impl AgentSlot {
    pub fn role(self) -> TurnRole {
        match self {
            AgentSlot::A => TurnRole::Producer,
            AgentSlot::B => TurnRole::Consumer,
        }
    }
}

impl fmt::Display for AgentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentSlot::A => f.write_str("A"),
            AgentSlot::B => f.write_str("B"),
        }
    }
}

/// Role of a history entry within the collaboration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Producer,
    Consumer,
}

impl TurnRole {
    pub fn slot(self) -> AgentSlot {
        match self {
            TurnRole::Producer => AgentSlot::A,
            TurnRole::Consumer => AgentSlot::B,
        }
    }
}

/// One agent reply recorded in the shared history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub tokens: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Why a session entered `STOPPED`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// `iteration` reached `max_iterations`.
    IterationBudget,
    /// The wall-clock budget ran out.
    TimeBudget,
    /// Agent A declared `STATUS: [COMPLETE]`.
    Completed,
    /// An agent call failed.
    AgentFailed,
    /// The owning connection went away.
    Disconnected,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Requested => "stopped on request",
            StopReason::IterationBudget => "iteration budget exhausted",
            StopReason::TimeBudget => "time budget exhausted",
            StopReason::Completed => "task declared complete",
            StopReason::AgentFailed => "agent call failed",
            StopReason::Disconnected => "connection closed",
        };
        f.write_str(text)
    }
}

/// State of one collaboration run.
#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: String,
    task: String,
    model_a: String,
    model_b: String,
    history: Vec<Turn>,
    iteration: usize,
    max_iterations: usize,
    time_limit: Duration,
    status: SessionStatus,
    total_tokens: u64,
    active: bool,
    auto_run: bool,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    ended_at: Option<DateTime<Utc>>,
    stop_reason: Option<StopReason>,
}

impl SessionState {
    /// Creates an inactive state; [`SessionState::activate`] starts the clock.
    pub fn new(
        task: impl Into<String>,
        model_a: impl Into<String>,
        model_b: impl Into<String>,
        max_iterations: usize,
        time_limit: Duration,
        auto_run: bool,
    ) -> Self {
        SessionState {
            session_id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            model_a: model_a.into(),
            model_b: model_b.into(),
            history: Vec::new(),
            iteration: 0,
            max_iterations,
            time_limit,
            status: SessionStatus::Working,
            total_tokens: 0,
            active: false,
            auto_run,
            started_at: Utc::now(),
            started_instant: Instant::now(),
            ended_at: None,
            stop_reason: None,
        }
    }

    pub(crate) fn activate(&mut self) {
        if self.stop_reason.is_some() {
            return;
        }
        self.active = true;
        self.started_at = Utc::now();
        self.started_instant = Instant::now();
    }

    /// Appends a turn and adds its usage to the running total.
    pub(crate) fn record_turn(&mut self, slot: AgentSlot, content: String, tokens: Option<u64>) {
        self.total_tokens += tokens.unwrap_or(0);
        self.history.push(Turn {
            role: slot.role(),
            content,
            tokens,
            timestamp: Utc::now(),
        });
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub(crate) fn complete_round(&mut self) {
        if self.iteration < self.max_iterations {
            self.iteration += 1;
        }
    }

    /// Marks the session stopped. Only the first call has any effect.
    pub(crate) fn deactivate(&mut self, reason: StopReason) -> bool {
        if self.stop_reason.is_some() {
            return false;
        }
        self.active = false;
        self.stop_reason = Some(reason);
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn model_a(&self) -> &str {
        &self.model_a
    }

    pub fn model_b(&self) -> &str {
        &self.model_b
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn auto_run(&self) -> bool {
        self.auto_run
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_instant.elapsed()
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Remaining wall-clock budget, saturating at zero.
    pub fn time_left(&self) -> Duration {
        self.time_limit.saturating_sub(self.elapsed())
    }

    pub fn iteration_budget_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Strictly greater than: a session is allowed to use its whole budget.
    pub fn time_budget_exhausted(&self) -> bool {
        self.elapsed() > self.time_limit
    }

    /// Detached, serializable snapshot of the session as it is right now.
    pub fn report(&self) -> SessionReport {
        let duration = match self.ended_at {
            Some(ended) => (ended - self.started_at).num_seconds().max(0) as u64,
            None => self.elapsed().as_secs(),
        };
        let agent_a_messages = self
            .history
            .iter()
            .filter(|t| t.role == TurnRole::Producer)
            .count();
        let agent_b_messages = self.history.len() - agent_a_messages;
        let average = if self.history.is_empty() {
            0
        } else {
            (self.total_tokens as f64 / self.history.len() as f64).round() as u64
        };

        SessionReport {
            metadata: ReportMetadata {
                export_time: Utc::now(),
                platform: format!("duet {}", env!("CARGO_PKG_VERSION")),
                session_id: self.session_id.clone(),
            },
            session: ReportSummary {
                task: self.task.clone(),
                start_time: self.started_at,
                duration_seconds: duration,
                iterations: self.iteration,
                max_iterations: self.max_iterations,
                total_tokens: self.total_tokens,
                status: self.status,
                stop_reason: self.stop_reason,
                models: ReportModels {
                    agent_a: self.model_a.clone(),
                    agent_b: self.model_b.clone(),
                },
            },
            messages: self.history.clone(),
            statistics: ReportStatistics {
                agent_a_messages,
                agent_b_messages,
                average_tokens_per_message: average,
            },
        }
    }
}

/// Exportable record of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub metadata: ReportMetadata,
    pub session: ReportSummary,
    pub messages: Vec<Turn>,
    pub statistics: ReportStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub export_time: DateTime<Utc>,
    pub platform: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub task: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub iterations: usize,
    pub max_iterations: usize,
    pub total_tokens: u64,
    pub status: SessionStatus,
    pub stop_reason: Option<StopReason>,
    pub models: ReportModels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportModels {
    pub agent_a: String,
    pub agent_b: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatistics {
    pub agent_a_messages: usize,
    pub agent_b_messages: usize,
    pub average_tokens_per_message: u64,
}

impl SessionReport {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes the report into `dir` as `duet-session-<timestamp>.json` and returns the path.
    pub fn export_to_dir(&self, dir: &Path) -> io::Result<PathBuf> {
        let stamp = self.metadata.export_time.format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let path = dir.join(format!("duet-session-{}.json", stamp));
        let json = self
            .to_json_pretty()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        std::fs::write(&path, json)?;
        log::info!("Session {} exported to {}", self.metadata.session_id, path.display());
        Ok(path)
    }
}
