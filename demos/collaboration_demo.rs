//! Two-agent collaboration from the terminal.
//!
//! Claude (Agent A) writes code for the task given on the command line, ChatGPT (Agent B)
//! reviews every revision, and the session runs until Claude reports `STATUS: [COMPLETE]`
//! or a budget runs out. Every event is pretty-printed as it arrives, and the final
//! transcript is exported as JSON into the current directory.
//!
//! ## Running
//!
//! ```bash
//! export ANTHROPIC_API_KEY=your_key
//! export OPENAI_API_KEY=your_key
//! cargo run --example collaboration_demo -- "Write a rate limiter in Rust"
//! ```
//!
//! Pass `--step` before the task to pause after every round; press Enter to run the next
//! round or type `stop` to end the session.

use async_trait::async_trait;
use duet::clients::claude::{self, ClaudeClient, Model as ClaudeModel};
use duet::clients::openai::{self, Model as OpenAIModel, OpenAIClient};
use duet::config::{DuetConfig, ProviderCredentials, ProviderProfile};
use duet::event::{EventSink, SessionEvent};
use duet::registry::{Command, ConnectionId, SessionRegistry};
use duet::session_state::AgentSlot;
use duet::{Agent, SessionRequest};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

// ── Event Sink ─────────────────────────────────────────────────────────────

struct TerminalSink {
    done: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl EventSink for TerminalSink {
    async fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::SessionStarted {
                session_id,
                model_a,
                model_b,
                auto_run,
                ..
            } => {
                println!("\n== Session {} ==", session_id);
                println!("   A: {}   B: {}   auto-run: {}", model_a, model_b, auto_run);
            }
            SessionEvent::RoundOutput {
                agent,
                content,
                tokens,
                elapsed_seconds,
            } => {
                let who = match agent {
                    AgentSlot::A => "Claude",
                    AgentSlot::B => "ChatGPT",
                };
                println!(
                    "\n── {} [{}s, {} tokens] ──\n{}",
                    who,
                    elapsed_seconds,
                    tokens.map_or("?".to_string(), |t| t.to_string()),
                    content
                );
            }
            SessionEvent::StatusUpdate {
                iteration,
                max_iterations,
                time_left_seconds,
                status,
            } => {
                println!(
                    "   round {}/{} | {}s left | {}",
                    iteration, max_iterations, time_left_seconds, status
                );
            }
            SessionEvent::WaitingForContinue { iteration } => {
                println!("\n>> Round {} done. Enter = next round, 'stop' = end.", iteration);
            }
            SessionEvent::SessionEnded {
                iteration,
                status,
                total_tokens,
                reason,
            } => {
                println!(
                    "\n== Ended after {} rounds: {} ({}), {} tokens ==",
                    iteration, status, reason, total_tokens
                );
                let _ = self.done.send(());
            }
            SessionEvent::Error { message, .. } => {
                eprintln!("!! {}", message);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    duet::init_logger();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let step_mode = args.first().map_or(false, |a| a == "--step");
    if step_mode {
        args.remove(0);
    }
    let task = if args.is_empty() {
        "Write a Rust function that validates IPv4 addresses, with unit tests.".to_string()
    } else {
        args.join(" ")
    };

    let config = DuetConfig::from_env()?;
    let credentials = ProviderCredentials::from_env()?;

    let claude_client = ClaudeClient::new(&credentials.anthropic_api_key)?
        .with_timeout(config.request_timeout)
        .with_max_output_tokens(config.max_output_tokens);
    let openai_client = OpenAIClient::new(&credentials.openai_api_key)?
        .with_timeout(config.request_timeout)
        .with_max_output_tokens(config.max_output_tokens);

    let registry = SessionRegistry::new(
        Arc::new(Agent::new(
            AgentSlot::A,
            ProviderProfile::producer("Claude", claude::fallback_models()),
            Arc::new(claude_client),
        )),
        Arc::new(Agent::new(
            AgentSlot::B,
            ProviderProfile::consumer("ChatGPT", openai::fallback_models()),
            Arc::new(openai_client),
        )),
        config.limits,
    );

    let models = registry.list_models(AgentSlot::B).await;
    println!("OpenAI offers {} models", models.len());

    let connection = ConnectionId::from("terminal");
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn EventSink> = Arc::new(TerminalSink { done: done_tx });

    let request = SessionRequest::new(
        task,
        claude::model_to_string(ClaudeModel::ClaudeSonnet35),
        openai::model_to_string(OpenAIModel::GPT4o),
        !step_mode,
    );
    registry
        .dispatch(&connection, Command::Start(request), Arc::clone(&sink))
        .await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = step_mode;
    loop {
        tokio::select! {
            _ = done_rx.recv() => break,
            line = stdin.next_line(), if stdin_open => {
                let command = match line?.as_deref().map(str::trim) {
                    Some("stop") => Command::Stop,
                    Some(_) => Command::ContinueRound,
                    // EOF: stop once, then only wait for the session to end.
                    None => {
                        stdin_open = false;
                        Command::Stop
                    }
                };
                registry.dispatch(&connection, command, Arc::clone(&sink)).await?;
            }
        }
    }

    if let Some(report) = registry.report(&connection).await {
        let path = report.export_to_dir(&std::env::current_dir()?)?;
        println!("Transcript written to {}", path.display());
    }
    Ok(())
}
