//! Terminal front end: an interactive chat loop and a one-shot `ask`

use anyhow::{Context, Result};
use std::future::Future;
use std::io::{self, Write};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

use crate::client::{ExchangeClient, PendingExchange};
use crate::commands::{get_help_text, parse_slash_command, SlashCommand};
use crate::config::{Config, UiConfig};
use crate::error::ExchangeError;
use crate::events::{ExchangeOutcome, Role, Turn};
use crate::history::ConversationHistory;

pub const FAILURE_MESSAGE: &str =
    "Sorry, I encountered an error. Please try again or check if the service is available.";

/// How waiting on a pending exchange ended
#[derive(Debug)]
pub enum Waited {
    Outcome(ExchangeOutcome),
    /// Released before a terminal event
    Released,
    TimedOut,
    Interrupted,
}

/// Wait for `pending`, giving up after `timeout` or on Ctrl-C. Anything other
/// than a terminal outcome releases the exchange.
pub async fn await_reply(pending: &mut PendingExchange, timeout: Option<Duration>) -> Waited {
    let waited = tokio::select! {
        waited = wait_with_timeout(pending, timeout) => waited,
        _ = tokio::signal::ctrl_c() => Waited::Interrupted,
    };

    if !matches!(waited, Waited::Outcome(_)) {
        pending.cancel();
    }
    waited
}

async fn wait_with_timeout(pending: &mut PendingExchange, timeout: Option<Duration>) -> Waited {
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, pending.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => return Waited::TimedOut,
        },
        None => pending.wait().await,
    };

    match outcome {
        Some(outcome) => Waited::Outcome(outcome),
        None => Waited::Released,
    }
}

/// One read at the prompt
#[derive(Debug, PartialEq, Eq)]
pub enum Prompt {
    Line(String),
    Eof,
    Interrupted,
}

/// Read the next input line unless `interrupt` resolves first
pub async fn read_prompt<R, F>(lines: &mut Lines<R>, interrupt: F) -> Result<Prompt>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => {
            let line = line.context("Failed to read user input")?;
            Ok(line.map_or(Prompt::Eof, Prompt::Line))
        }
        _ = interrupt => Ok(Prompt::Interrupted),
    }
}

/// Run the interactive chat loop until `/bye`, Ctrl-C at the prompt or end of input
pub async fn run_chat(config: Config) -> Result<()> {
    let history = ConversationHistory::new();
    let client = ExchangeClient::from_config(&config, history.clone())?;

    println!("🛰️  spacechat connected to {}", config.base_url);
    println!("Type a message and press Enter. /help lists commands.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("👤 You: ");
        io::stdout().flush()?;

        // Once await_reply has polled ctrl_c, SIGINT no longer terminates the process
        let line = match read_prompt(&mut lines, tokio::signal::ctrl_c()).await? {
            Prompt::Line(line) => line,
            Prompt::Eof => {
                println!();
                break;
            }
            Prompt::Interrupted => {
                println!("\n👋 Bye!");
                break;
            }
        };
        let line = line.trim();

        if let Some(parsed) = parse_slash_command(line) {
            match parsed.command {
                SlashCommand::Reset => {
                    history.clear();
                    println!("🧹 Conversation cleared.");
                }
                SlashCommand::History => {
                    let limit = parsed.argument().and_then(|arg| arg.trim().parse::<usize>().ok());
                    print!("{}", render_history(&history.snapshot(), limit, &config.ui));
                }
                SlashCommand::Help => println!("{}", get_help_text()),
                SlashCommand::Bye => {
                    println!("👋 Bye!");
                    break;
                }
            }
            continue;
        }
        if line.starts_with('/') {
            println!("❓ Unknown command '{}'. Type /help for the list.", line);
            continue;
        }

        let mut pending = match client.submit(line) {
            Ok(pending) => pending,
            Err(ExchangeError::EmptyInput) => continue,
            Err(err) => {
                println!("❌ {}\n   ({})", FAILURE_MESSAGE, err);
                continue;
            }
        };
        debug!(exchange_id = %pending.id(), "waiting for reply");
        println!("⏳ Thinking...");

        match await_reply(&mut pending, config.exchange_timeout()).await {
            Waited::Outcome(ExchangeOutcome::Completed(reply)) => {
                println!("🤖 {}: {}\n", config.ui.assistant_name, reply);
            }
            Waited::Outcome(ExchangeOutcome::Failed(err)) => {
                println!("❌ {}\n   ({})\n", FAILURE_MESSAGE, err);
            }
            Waited::TimedOut => {
                println!("⌛ No reply in time, request abandoned.\n");
            }
            Waited::Interrupted | Waited::Released => {
                println!("✋ Request abandoned.\n");
            }
        }
    }

    Ok(())
}

/// Send a single message and print the reply
pub async fn ask(config: Config, text: &str) -> Result<()> {
    let client = ExchangeClient::from_config(&config, ConversationHistory::new())?;
    let mut pending = client.submit(text)?;

    match await_reply(&mut pending, config.exchange_timeout()).await {
        Waited::Outcome(outcome) => {
            let reply = outcome.into_result()?;
            println!("{}", reply);
            Ok(())
        }
        Waited::TimedOut => anyhow::bail!("no reply within the configured exchange timeout"),
        Waited::Interrupted | Waited::Released => anyhow::bail!("request abandoned"),
    }
}

/// Format turns for display, optionally only the last `limit`
pub fn render_history(turns: &[Turn], limit: Option<usize>, ui: &UiConfig) -> String {
    if turns.is_empty() {
        return "📭 No messages yet.\n".to_string();
    }

    let skip = limit.map_or(0, |limit| turns.len().saturating_sub(limit));
    let mut out = String::new();

    for turn in &turns[skip..] {
        let speaker = match turn.role() {
            Role::User => "👤 You".to_string(),
            Role::Assistant => format!("🤖 {}", ui.assistant_name),
        };
        if ui.show_timestamps {
            out.push_str(&format!(
                "[{}] ",
                turn.created_at().format("%Y-%m-%d %H:%M:%S")
            ));
        }
        out.push_str(&format!("{}: {}\n", speaker, turn.content()));
    }

    out
}
