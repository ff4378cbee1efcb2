//! `writingway chat` — Interactive or single-message conversation.

use std::io::Write;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use writingway_core::message::SessionId;
use writingway_workshop::{SessionOptions, StreamEvent, Workshop};

use super::project::{ingest, load_config};

pub async fn run(
    config: Option<&Path>,
    project: &Path,
    provider: Option<String>,
    model: Option<String>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let workshop = Workshop::from_config(config)?;

    let mut diagnostics = workshop.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = diagnostics.recv().await {
            debug!(?event, "diagnostic");
        }
    });

    let (files, chunks) = ingest(&workshop, project).await?;
    let provider_id = provider
        .clone()
        .unwrap_or_else(|| workshop.config().default_provider.clone());
    let resolved = workshop.config().resolve_provider(&provider_id, model.as_deref())?;
    let session = workshop
        .start_session(SessionOptions {
            provider,
            model,
            ..Default::default()
        })
        .await?;

    if let Some(msg) = message {
        // Single message mode
        exchange(&workshop, &session, &msg).await?;
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        Writingway — Interactive Session        ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:  {} / {}", resolved.id, resolved.model);
    println!("  Project:   {} ({files} files, {chunks} chunks)", project.display());
    println!();
    println!("  Commands:  /provider <id> [model]  /summary <text>  /history  /exit");
    println!("  Ctrl+C cancels a reply in progress.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Some(Command::Exit) => break,
            Some(Command::Provider { id, model }) => {
                match workshop.set_provider(&session, id, model).await {
                    Ok(p) => println!("  Switched to {} / {}", p.id, p.model),
                    Err(e) => eprintln!("  [Error] {e}"),
                }
            }
            Some(Command::Summary(text)) => {
                workshop.set_summary(&session, text.map(str::to_string)).await?;
                println!("  Summary {}", if text.is_some() { "set" } else { "cleared" });
            }
            Some(Command::History) => {
                for turn in workshop.history(&session).await? {
                    println!("  [{}] {}", turn.role.as_str(), turn.text);
                }
            }
            None => {
                if let Err(e) = exchange(&workshop, &session, line).await {
                    eprintln!("  [Error] {e}");
                }
            }
        }
        println!();
    }

    workshop.close_session(&session).await?;
    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

/// Send one message and print the streamed reply.
async fn exchange(
    workshop: &Workshop,
    session: &SessionId,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut handle = workshop.send_message(session, text).await?;
    let mut cancelled = false;

    print!("  Assistant > ");
    std::io::stdout().flush()?;
    loop {
        let event = tokio::select! {
            event = handle.events.recv() => event,
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                workshop.cancel(session).await?;
                continue;
            }
        };
        let Some(event) = event else {
            break;
        };

        match event {
            StreamEvent::Fragment { text } => {
                print!("{text}");
                std::io::stdout().flush()?;
            }
            StreamEvent::Retrying { attempt, provider } => {
                println!();
                eprintln!("  (retrying, attempt {attempt} via {provider})");
                print!("  Assistant > ");
                std::io::stdout().flush()?;
            }
            StreamEvent::Done {
                provider,
                model,
                prompt_tokens,
                chunks_used,
                ..
            } => {
                println!();
                eprintln!(
                    "  ({provider} / {model}, {prompt_tokens} prompt tokens, {chunks_used} passage(s))"
                );
                break;
            }
            StreamEvent::Cancelled => {
                println!();
                eprintln!("  (cancelled)");
                break;
            }
            StreamEvent::Error { message } => {
                println!();
                return Err(message.into());
            }
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Command<'a> {
    Exit,
    Provider { id: &'a str, model: Option<&'a str> },
    Summary(Option<&'a str>),
    History,
}

/// Slash commands; `None` means the line is a message.
fn parse_command(line: &str) -> Option<Command<'_>> {
    if line == "exit" || line == "quit" {
        return Some(Command::Exit);
    }
    let rest = line.strip_prefix('/')?;
    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    match name {
        "exit" | "quit" => Some(Command::Exit),
        "history" => Some(Command::History),
        "summary" => Some(Command::Summary((!args.is_empty()).then_some(args))),
        "provider" => {
            let mut parts = args.split_whitespace();
            let id = parts.next()?;
            Some(Command::Provider {
                id,
                model: parts.next(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_commands() {
        assert_eq!(parse_command("/exit"), Some(Command::Exit));
        assert_eq!(parse_command("quit"), Some(Command::Exit));
        assert_eq!(parse_command("/history"), Some(Command::History));
        assert_eq!(
            parse_command("/provider openai gpt-4o"),
            Some(Command::Provider {
                id: "openai",
                model: Some("gpt-4o")
            })
        );
        assert_eq!(
            parse_command("/summary Alice fled the castle."),
            Some(Command::Summary(Some("Alice fled the castle.")))
        );
        assert_eq!(parse_command("/summary"), Some(Command::Summary(None)));
    }

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(parse_command("Where is Bob?"), None);
        assert_eq!(parse_command("/provider"), None);
    }
}
