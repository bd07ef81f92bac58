mod common;

use common::{consumer, drain, names, producer, timeout_error, wait_for, MockClient};
use duet::client_wrapper::Role;
use duet::completion::SessionStatus;
use duet::config::{SessionLimits, CONSUMER_PRIMING, PRODUCER_PRIMING};
use duet::event::{ChannelSink, SessionEvent};
use duet::orchestrator::{OrchestratorPhase, SessionError, SessionRequest, TurnOrchestrator};
use duet::session_state::{AgentSlot, StopReason};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

fn limits(max_iterations: usize) -> SessionLimits {
    SessionLimits {
        max_iterations,
        time_limit: Duration::from_secs(180),
    }
}

fn request(auto_run: bool) -> SessionRequest {
    SessionRequest::new("build X", "claude-test", "gpt-test", auto_run)
}

fn orchestrator(
    a: &Arc<MockClient>,
    b: &Arc<MockClient>,
    limits: SessionLimits,
    auto_run: bool,
) -> (TurnOrchestrator, mpsc::UnboundedReceiver<SessionEvent>) {
    let (sink, events) = ChannelSink::new();
    let orchestrator = TurnOrchestrator::new(
        request(auto_run),
        limits,
        producer(Arc::clone(a)),
        consumer(Arc::clone(b)),
        Arc::new(sink),
    )
    .unwrap();
    (orchestrator, events)
}

#[tokio::test]
async fn test_complete_on_first_round_skips_agent_b() {
    let a = Arc::new(MockClient::new("claude", "Here it is.\nSTATUS: [COMPLETE]"));
    let b = Arc::new(MockClient::new("gpt", "Looks fine."));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), true);

    let report = orchestrator.run().await;

    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
    assert_eq!(report.session.iterations, 0);
    assert_eq!(report.session.status, SessionStatus::Complete);
    assert_eq!(report.session.stop_reason, Some(StopReason::Completed));
    assert_eq!(report.messages.len(), 1);

    let events = drain(&mut events);
    assert_eq!(
        names(&events),
        vec![
            "session_started",
            "round_output",
            "status_update",
            "session_ended"
        ]
    );
    match events.last().unwrap() {
        SessionEvent::SessionEnded {
            iteration,
            status,
            reason,
            ..
        } => {
            assert_eq!(*iteration, 0);
            assert_eq!(*status, SessionStatus::Complete);
            assert_eq!(*reason, StopReason::Completed);
        }
        other => panic!("unexpected final event {:?}", other),
    }
}

#[tokio::test]
async fn test_iteration_budget_stops_after_max_rounds() {
    let a = Arc::new(MockClient::new("claude", "Progress.\nSTATUS: [WORKING]").with_tokens(Some(10)));
    let b = Arc::new(MockClient::new("gpt", "Add tests.").with_tokens(Some(7)));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), true);

    let report = orchestrator.run().await;

    assert_eq!(a.calls(), 8);
    assert_eq!(b.calls(), 8);
    assert_eq!(report.session.iterations, 8);
    assert_eq!(report.session.status, SessionStatus::Working);
    assert_eq!(report.session.stop_reason, Some(StopReason::IterationBudget));
    assert_eq!(report.messages.len(), 16);
    assert_eq!(report.session.total_tokens, 8 * 10 + 8 * 7);

    let events = drain(&mut events);
    let streamed: u64 = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::RoundOutput { tokens, .. } => Some(tokens.unwrap_or(0)),
            _ => None,
        })
        .sum();
    assert_eq!(streamed, report.session.total_tokens);

    let ended: Vec<_> = events
        .iter()
        .filter(|e| e.name() == "session_ended")
        .collect();
    assert_eq!(ended.len(), 1);
    assert_eq!(events.last().unwrap().name(), "session_ended");
}

#[tokio::test]
async fn test_round_events_arrive_in_order() {
    let a = Arc::new(MockClient::new("claude", "v1\nSTATUS: [WORKING]"));
    let b = Arc::new(MockClient::new("gpt", "review"));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(1), true);

    orchestrator.run().await;

    let events = drain(&mut events);
    assert_eq!(
        names(&events),
        vec![
            "session_started",
            "round_output",
            "status_update",
            "round_output",
            "status_update",
            "session_ended"
        ]
    );
    assert!(matches!(
        events[1],
        SessionEvent::RoundOutput {
            agent: AgentSlot::A,
            ..
        }
    ));
    assert!(matches!(
        events[3],
        SessionEvent::RoundOutput {
            agent: AgentSlot::B,
            ..
        }
    ));
    assert!(matches!(
        events[2],
        SessionEvent::StatusUpdate {
            iteration: 0,
            max_iterations: 1,
            ..
        }
    ));
    assert!(matches!(
        events[4],
        SessionEvent::StatusUpdate { iteration: 1, .. }
    ));
}

#[tokio::test]
async fn test_need_feedback_still_hands_over_to_agent_b() {
    let a = Arc::new(MockClient::new("claude", "Which format?\nSTATUS: [NEED_FEEDBACK]"));
    let b = Arc::new(MockClient::new("gpt", "Use JSON."));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(1), true);

    let report = orchestrator.run().await;

    assert_eq!(b.calls(), 1);
    assert_eq!(report.session.status, SessionStatus::NeedFeedback);
    let statuses: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StatusUpdate { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![SessionStatus::NeedFeedback, SessionStatus::NeedFeedback]
    );
}

#[tokio::test]
async fn test_manual_step_waits_for_continue() {
    let a = Arc::new(MockClient::new("claude", "draft\nSTATUS: [WORKING]"));
    let b = Arc::new(MockClient::new("gpt", "critique"));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), false);
    let control = orchestrator.control();
    let session = tokio::spawn(orchestrator.run());

    let first = wait_for(&mut events, "waiting_for_continue").await;
    assert!(matches!(
        first.last().unwrap(),
        SessionEvent::WaitingForContinue { iteration: 1 }
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(control.phase(), OrchestratorPhase::AwaitingContinue);

    assert!(control.continue_round());
    assert!(!control.continue_round());

    let second = wait_for(&mut events, "waiting_for_continue").await;
    assert!(matches!(
        second.last().unwrap(),
        SessionEvent::WaitingForContinue { iteration: 2 }
    ));
    assert_eq!(a.calls(), 2);

    assert!(control.stop());
    let report = session.await.unwrap();
    assert_eq!(report.session.iterations, 2);
    assert_eq!(report.session.stop_reason, Some(StopReason::Requested));
    assert_eq!(a.calls(), 2);
    assert_eq!(control.phase(), OrchestratorPhase::Stopped);
}

#[tokio::test]
async fn test_continue_round_outside_waiting_is_ignored() {
    let a = Arc::new(MockClient::new("claude", "STATUS: [COMPLETE]"));
    let b = Arc::new(MockClient::new("gpt", "ok"));
    let (orchestrator, _events) = orchestrator(&a, &b, limits(8), false);
    let control = orchestrator.control();

    assert_eq!(control.phase(), OrchestratorPhase::Idle);
    assert!(!control.continue_round());

    orchestrator.run().await;
    assert!(!control.continue_round());
    assert!(!control.is_active());
}

#[tokio::test]
async fn test_agent_b_timeout_stops_the_session() {
    let a = Arc::new(MockClient::new("claude", "work\nSTATUS: [WORKING]"));
    let b = Arc::new(
        MockClient::new("gpt", "unused")
            .then_reply("round one review")
            .then_fail(timeout_error("OpenAI")),
    );
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), true);

    let report = orchestrator.run().await;

    assert_eq!(a.calls(), 2);
    assert_eq!(b.calls(), 2);
    assert_eq!(report.session.iterations, 1);
    assert_eq!(report.session.stop_reason, Some(StopReason::AgentFailed));
    assert_eq!(report.messages.len(), 3);

    let events = drain(&mut events);
    let tail = &events[events.len() - 2..];
    match &tail[0] {
        SessionEvent::Error { agent, message } => {
            assert_eq!(*agent, Some(AgentSlot::B));
            assert!(message.starts_with("Agent B (ChatGPT) error"), "{}", message);
            assert!(message.contains("timed out"), "{}", message);
        }
        other => panic!("expected an error event, got {:?}", other),
    }
    assert!(matches!(
        tail[1],
        SessionEvent::SessionEnded {
            iteration: 1,
            reason: StopReason::AgentFailed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_agent_a_failure_on_first_call() {
    let a = Arc::new(MockClient::new("claude", "unused").then_fail(
        duet::client_wrapper::ClientError::Rejected {
            provider: "Claude".into(),
            status: 404,
            body: "model not found".into(),
        },
    ));
    let b = Arc::new(MockClient::new("gpt", "unused"));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), true);

    let report = orchestrator.run().await;

    assert_eq!(b.calls(), 0);
    assert!(report.messages.is_empty());
    assert_eq!(report.session.total_tokens, 0);
    let errors: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| e.name() == "error")
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        SessionEvent::Error {
            agent: Some(AgentSlot::A),
            ..
        }
    ));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let a = Arc::new(MockClient::new("claude", "STATUS: [WORKING]"));
    let b = Arc::new(MockClient::new("gpt", "ok"));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), true);
    let control = orchestrator.control();

    assert!(control.stop());
    assert!(!control.stop());
    assert_eq!(control.stop_requested(), Some(StopReason::Requested));

    let report = orchestrator.run().await;
    assert_eq!(a.calls(), 0);
    assert_eq!(report.session.stop_reason, Some(StopReason::Requested));
    assert!(!control.stop());

    let events = drain(&mut events);
    assert_eq!(names(&events), vec!["session_started", "session_ended"]);
}

#[tokio::test]
async fn test_stop_during_inflight_call_records_reply_then_stops() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let a = Arc::new(
        MockClient::new("claude", "slow answer\nSTATUS: [WORKING]")
            .with_gate(Arc::clone(&entered), Arc::clone(&release)),
    );
    let b = Arc::new(MockClient::new("gpt", "never asked"));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), true);
    let control = orchestrator.control();
    let session = tokio::spawn(orchestrator.run());

    entered.notified().await;
    assert!(control.stop());
    release.notify_one();

    let report = session.await.unwrap();
    assert_eq!(b.calls(), 0);
    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.messages[0].content, "slow answer\nSTATUS: [WORKING]");
    assert_eq!(report.session.stop_reason, Some(StopReason::Requested));

    let events = drain(&mut events);
    assert_eq!(events.last().unwrap().name(), "session_ended");
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::RoundOutput {
            agent: AgentSlot::A,
            ..
        }
    )));
}

#[tokio::test]
async fn test_stop_during_agent_b_call_finishes_the_round() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let a = Arc::new(MockClient::new("claude", "draft\nSTATUS: [WORKING]"));
    let b = Arc::new(
        MockClient::new("gpt", "slow review")
            .with_gate(Arc::clone(&entered), Arc::clone(&release)),
    );
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), true);
    let control = orchestrator.control();
    let session = tokio::spawn(orchestrator.run());

    entered.notified().await;
    assert!(control.stop());
    release.notify_one();

    let report = session.await.unwrap();
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(report.session.iterations, 1);
    assert_eq!(report.messages.len(), 2);
    assert_eq!(report.messages[1].content, "slow review");
    assert_eq!(report.session.stop_reason, Some(StopReason::Requested));

    let events = drain(&mut events);
    let ended = events.last().unwrap();
    assert!(matches!(
        ended,
        SessionEvent::SessionEnded {
            iteration: 1,
            reason: StopReason::Requested,
            ..
        }
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::RoundOutput {
            agent: AgentSlot::B,
            ..
        }
    )));
}

#[tokio::test]
async fn test_stop_while_awaiting_continue() {
    let a = Arc::new(MockClient::new("claude", "STATUS: [WORKING]"));
    let b = Arc::new(MockClient::new("gpt", "ok"));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), false);
    let control = orchestrator.control();
    let session = tokio::spawn(orchestrator.run());

    wait_for(&mut events, "waiting_for_continue").await;
    assert!(control.stop());

    let ended = wait_for(&mut events, "session_ended").await;
    assert!(matches!(
        ended.last().unwrap(),
        SessionEvent::SessionEnded {
            iteration: 1,
            reason: StopReason::Requested,
            ..
        }
    ));
    session.await.unwrap();
    assert_eq!(a.calls(), 1);
    assert!(!control.continue_round());
}

#[tokio::test]
async fn test_time_budget_checked_at_round_boundary() {
    let a = Arc::new(MockClient::new("claude", "STATUS: [WORKING]").with_delay(Duration::from_millis(15)));
    let b = Arc::new(MockClient::new("gpt", "ok").with_delay(Duration::from_millis(15)));
    let limits = SessionLimits {
        max_iterations: 8,
        time_limit: Duration::from_millis(20),
    };
    let (orchestrator, _events) = orchestrator(&a, &b, limits, true);

    let report = orchestrator.run().await;

    // The round that crossed the limit is finished, not interrupted.
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(report.session.iterations, 1);
    assert_eq!(report.session.stop_reason, Some(StopReason::TimeBudget));
}

#[tokio::test]
async fn test_missing_usage_counts_as_zero() {
    let a = Arc::new(MockClient::new("claude", "STATUS: [WORKING]").with_tokens(None));
    let b = Arc::new(MockClient::new("gpt", "ok").with_tokens(Some(25)));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(2), true);

    let report = orchestrator.run().await;

    assert_eq!(report.session.total_tokens, 50);
    let a_tokens: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::RoundOutput {
                agent: AgentSlot::A,
                tokens,
                ..
            } => Some(tokens),
            _ => None,
        })
        .collect();
    assert_eq!(a_tokens, vec![None, None]);
}

#[tokio::test]
async fn test_agents_see_history_from_their_own_side() {
    let a = Arc::new(
        MockClient::new("claude", "v2\nSTATUS: [WORKING]").then_reply("v1\nSTATUS: [WORKING]"),
    );
    let b = Arc::new(MockClient::new("gpt", "rename things"));
    let (orchestrator, _events) = orchestrator(&a, &b, limits(2), true);

    orchestrator.run().await;

    let a_calls = a.seen();
    let first = &a_calls[0];
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].role, Role::System);
    assert_eq!(first[0].content, PRODUCER_PRIMING);
    assert_eq!(first[1].role, Role::User);
    assert_eq!(first[1].content, "build X");

    let second = &a_calls[1];
    let roles: Vec<_> = second.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::Assistant, Role::User, Role::User]
    );
    assert_eq!(second[1].content, "v1\nSTATUS: [WORKING]");
    assert_eq!(second[2].content, "rename things");
    assert_eq!(second[3].content, "build X");

    let b_calls = b.seen();
    let review = &b_calls[0];
    assert_eq!(review[0].content, CONSUMER_PRIMING);
    assert_eq!(review.len(), 2);
    assert_eq!(review[1].role, Role::User);
    assert_eq!(review[1].content, "v1\nSTATUS: [WORKING]");

    let second_review = &b_calls[1];
    let roles: Vec<_> = second_review.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(second_review[3].content, "v2\nSTATUS: [WORKING]");
}

#[tokio::test]
async fn test_snapshot_tracks_running_session() {
    let a = Arc::new(MockClient::new("claude", "STATUS: [WORKING]"));
    let b = Arc::new(MockClient::new("gpt", "ok"));
    let (orchestrator, mut events) = orchestrator(&a, &b, limits(8), false);
    let control = orchestrator.control();
    assert!(control.report().is_none());
    let session = tokio::spawn(orchestrator.run());

    wait_for(&mut events, "waiting_for_continue").await;
    let snapshot = control.report().unwrap();
    assert_eq!(snapshot.session.iterations, 1);
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.session.stop_reason, None);

    control.stop();
    let report = session.await.unwrap();
    assert_eq!(control.report().unwrap().session.stop_reason, report.session.stop_reason);
}

#[test]
fn test_blank_requests_are_rejected() {
    let a = Arc::new(MockClient::new("claude", ""));
    let b = Arc::new(MockClient::new("gpt", ""));
    let (sink, _events) = ChannelSink::new();
    let result = TurnOrchestrator::new(
        SessionRequest::new("   ", "claude-test", "gpt-test", true),
        limits(8),
        producer(Arc::clone(&a)),
        consumer(Arc::clone(&b)),
        Arc::new(sink.clone()),
    );
    assert!(matches!(result, Err(SessionError::Validation(_))));

    let result = TurnOrchestrator::new(
        SessionRequest::new("build X", "", "gpt-test", true),
        limits(8),
        producer(Arc::clone(&a)),
        consumer(Arc::clone(&b)),
        Arc::new(sink.clone()),
    );
    assert!(matches!(result, Err(SessionError::Validation(_))));

    let swapped = TurnOrchestrator::new(
        request(true),
        limits(8),
        consumer(b),
        producer(a),
        Arc::new(sink),
    );
    assert!(matches!(swapped, Err(SessionError::Validation(_))));
}
