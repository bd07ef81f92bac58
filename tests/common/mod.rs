#![allow(dead_code)]

use async_trait::async_trait;
use duet::client_wrapper::{ClientError, ClientWrapper, Completion, Message, TokenUsage};
use duet::config::ProviderProfile;
use duet::event::SessionEvent;
use duet::session_state::AgentSlot;
use duet::Agent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Replays scripted replies, then repeats `fallback` forever.
pub struct MockClient {
    name: String,
    script: Mutex<VecDeque<Result<Completion, ClientError>>>,
    fallback: String,
    tokens: Option<u64>,
    delay: Duration,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    models: Result<Vec<String>, ClientError>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockClient {
    pub fn new(name: &str, fallback: &str) -> Self {
        MockClient {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            tokens: Some(10),
            delay: Duration::ZERO,
            gate: None,
            models: Ok(vec![format!("{}-large", name), format!("{}-small", name)]),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Queue one reply ahead of the fallback.
    pub fn then_reply(self, content: &str) -> Self {
        let tokens = self.tokens;
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(completion(content, tokens)));
        self
    }

    /// Queue one failure ahead of the fallback.
    pub fn then_fail(self, err: ClientError) -> Self {
        self.script.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_tokens(mut self, tokens: Option<u64>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every call signals `entered` and then waits for `release`.
    pub fn with_gate(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((entered, release));
        self
    }

    pub fn with_models(mut self, models: Result<Vec<String>, ClientError>) -> Self {
        self.models = models;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message lists received so far, one per call.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

fn completion(content: &str, tokens: Option<u64>) -> Completion {
    Completion {
        content: content.to_string(),
        usage: tokens.map(|total| TokenUsage {
            input_tokens: total / 2,
            output_tokens: total - total / 2,
            total_tokens: total,
        }),
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn send_message(
        &self,
        messages: &[Message],
        _model: &str,
    ) -> Result<Completion, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());

        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(reply) => reply,
            None => Ok(completion(&self.fallback, self.tokens)),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        self.models.clone()
    }
}

pub fn producer(client: Arc<MockClient>) -> Arc<Agent> {
    Arc::new(Agent::new(
        AgentSlot::A,
        ProviderProfile::producer("Claude", vec!["claude-fallback".into()]),
        client,
    ))
}

pub fn consumer(client: Arc<MockClient>) -> Arc<Agent> {
    Arc::new(Agent::new(
        AgentSlot::B,
        ProviderProfile::consumer("ChatGPT", vec!["gpt-fallback".into()]),
        client,
    ))
}

/// Everything currently buffered in the channel.
pub fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn names(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

/// Receive until `name` arrives (or panic after a second).
pub async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    name: &str,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        let done = event.name() == name;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

pub fn timeout_error(provider: &str) -> ClientError {
    ClientError::Timeout {
        provider: provider.to_string(),
    }
}
