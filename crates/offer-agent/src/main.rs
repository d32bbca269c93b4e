//! An interactive terminal client of the offer agent.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use offer_agent::SessionBuilder;
use offer_agent::core::conversation::{InteractiveChoice, Message, Role};
use offer_agent::core::{
    Error, LoopEvent, LoopOutcome, LoopState, OrchestratorConfig, offer,
    transcript,
};
use offer_agent_anthropic_model::{AnthropicConfigBuilder, AnthropicProvider};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;

enum SessionEvent {
    Loop(LoopEvent),
    Outcome(Result<LoopOutcome, Error>),
}

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(api_key) = env::var("ANTHROPIC_API_KEY") else {
        eprintln!("ANTHROPIC_API_KEY environment variable is not set");
        return;
    };
    let mut config_builder = AnthropicConfigBuilder::with_api_key(api_key);
    if let Ok(model) = env::var("ANTHROPIC_MODEL") {
        config_builder = config_builder.with_model(model);
    }
    if let Ok(base_url) = env::var("ANTHROPIC_BASE_URL") {
        config_builder = config_builder.with_base_url(base_url);
    }
    let model_provider = AnthropicProvider::new(config_builder.build());

    let mut config = OrchestratorConfig::default();
    if let Ok(budget) = env::var("OFFER_AGENT_THINKING_BUDGET") {
        match budget.parse() {
            Ok(budget) => config.thinking_budget = Some(budget),
            Err(err) => {
                eprintln!("invalid OFFER_AGENT_THINKING_BUDGET: {err}");
                return;
            }
        }
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut builder = SessionBuilder::with_model_provider(model_provider)
        .with_config(config)
        .on_event({
            let event_tx = event_tx.clone();
            move |event| {
                event_tx.send(SessionEvent::Loop(event)).ok();
            }
        })
        .on_outcome({
            let event_tx = event_tx.clone();
            move |outcome| {
                event_tx.send(SessionEvent::Outcome(outcome)).ok();
            }
        });
    if let Ok(url) = env::var("OFFER_AGENT_WEBHOOK_URL") {
        builder = builder.with_webhook_url(url);
    }
    let session = match builder.build("cli").await {
        Ok(session) => session,
        Err(err) => {
            eprintln!("failed to start the session: {err}");
            return;
        }
    };

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    'outer: loop {
        prompt("> ");

        let Some(line) = read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        session.send_message(line);

        let mut progress_bar: Option<ProgressBar> = None;
        let mut status = "🤔 Thinking...";
        let mut pending_choice: Option<InteractiveChoice> = None;

        loop {
            // Create a new progress bar if it has been finished.
            progress_bar
                .get_or_insert_with(|| {
                    let progress_bar = ProgressBar::new_spinner();
                    progress_bar.set_style(progress_style.clone());
                    progress_bar
                })
                .inc(1);
            if let Some(progress_bar) = &progress_bar {
                progress_bar.set_message(status);
            }

            let sleep = sleep(Duration::from_millis(100));
            let event = select! {
                event = event_rx.recv() => {
                    let Some(event) = event else {
                        break 'outer;
                    };
                    event
                },
                _ = sleep => {
                    continue;
                }
            };

            match event {
                SessionEvent::Loop(LoopEvent::State(state)) => {
                    status = match state {
                        LoopState::Requesting => "🤔 Thinking...",
                        LoopState::Streaming => "✍️  Writing...",
                        LoopState::ToolDispatch => "🔎 Checking the catalog...",
                        LoopState::Finalizing => "📝 Saving...",
                        LoopState::Idle | LoopState::Paused => status,
                    };
                    continue;
                }
                SessionEvent::Loop(LoopEvent::ArtifactStarted) => {
                    status = "📄 Drafting the offer...";
                    continue;
                }
                SessionEvent::Loop(LoopEvent::MessagePersisted(msg)) => {
                    if msg.role != Role::Assistant {
                        continue;
                    }
                    finish_progress(&mut progress_bar);
                    print_message(&msg);
                    pending_choice = msg.choice;
                }
                SessionEvent::Loop(LoopEvent::ArtifactUpdated(artifact)) => {
                    finish_progress(&mut progress_bar);
                    let bar = BAR_CHAR.bright_green();
                    println!(
                        "{bar}📄 Offer {} (version {})",
                        artifact.id.bright_white(),
                        artifact.version
                    );
                    for (key, value) in artifact.fields() {
                        let mut lines = value.lines();
                        let first = lines.next().unwrap_or_default();
                        println!("{bar}{}: {first}", key.bright_white().bold());
                        for line in lines {
                            println!("{bar}  {line}");
                        }
                    }
                }
                SessionEvent::Loop(_) => {
                    continue;
                }
                SessionEvent::Outcome(Ok(LoopOutcome::Finished { .. })) => {
                    finish_progress(&mut progress_bar);
                    break;
                }
                SessionEvent::Outcome(Ok(LoopOutcome::Paused { message_id })) => {
                    finish_progress(&mut progress_bar);
                    let Some(choice) = pending_choice.take() else {
                        warn!("paused without a choice on {message_id}");
                        break;
                    };
                    let Some(index) = ask_choice(&choice).await else {
                        break 'outer;
                    };
                    session.respond_to_choice(&message_id, index);
                    status = "🤔 Thinking...";
                }
                SessionEvent::Outcome(Err(err)) => {
                    finish_progress(&mut progress_bar);
                    println!("{}❌ {}", BAR_CHAR.bright_red(), err.bright_red());
                    break;
                }
            }
        }
    }
}

fn finish_progress(progress_bar: &mut Option<ProgressBar>) {
    // Finish the progress bar before printing anything else.
    if let Some(progress_bar) = progress_bar.take() {
        progress_bar.finish_and_clear();
    }
}

fn print_message(msg: &Message) {
    let Some(text) = msg.text() else {
        return;
    };
    let chat = offer::split_streaming(&transcript::strip(text)).chat;
    let chat = chat.trim();
    if chat.is_empty() {
        return;
    }
    println!("{}🤖 {}", BAR_CHAR.bright_cyan(), chat.bright_white());
}

async fn ask_choice(choice: &InteractiveChoice) -> Option<usize> {
    let bar = BAR_CHAR.bright_yellow();
    println!("\n{bar}❓ {}", choice.prompt.bold());
    for (i, option) in choice.options.iter().enumerate() {
        println!("{bar}  {}. {}", i + 1, option.label);
    }
    loop {
        prompt(&format!("Choose [1-{}]: ", choice.options.len()));
        let line = read_line().await?;
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=choice.options.len()).contains(&n) => {
                println!();
                return Some(n - 1);
            }
            _ => println!("Please enter a number from the list."),
        }
    }
}

fn prompt(text: &str) {
    print!("{text}");
    if let Err(err) = std::io::stdout().flush() {
        error!("error flushing output: {err}");
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(count) => {
            if count == 0 {
                return None;
            }
            Some(line)
        }
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
