use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use jamal_lib::config::{ClientConfig, ServerConfig};
use jamal_lib::db::models::{Message, MessageMetadata, Role};
use jamal_lib::db::Database;
use jamal_lib::session::{ChatSession, Delivery, HttpBackend};

#[derive(Parser)]
#[command(name = "jamal")]
#[command(about = "Local chat assistant backed by Ollama", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backend HTTP server
    Serve(ServerConfig),

    /// Chat from the terminal against a running backend
    Chat(ClientConfig),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jamal=info,jamal_lib=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Serve(config) => jamal_lib::serve(config).await,
        Commands::Chat(config) => chat(config).await,
    }
}

const HELP: &str = "\
Commands:
  /new                 start a conversation
  /list                list conversations
  /switch <id>         switch conversation
  /rename <title>      rename the current conversation
  /delete [id]         delete a conversation (default: current)
  /upload <path>       upload a document
  /link <url>          add a web page
  /web on|off          web search mode
  /reason on|off       reasoning mode
  /docs [refresh]      list documents and links, optionally reloading them from the backend
  /select <id>         toggle a document or link in the context
  /chat-select <id>    toggle a document or link for the current conversation only
  /chat-select reset   use the global selection again in this conversation
  /remove <id>         delete a document or link
  /quit                exit
Anything else is sent as a message. Ctrl-C cancels a pending reply, or exits at the prompt.";

async fn chat(config: ClientConfig) -> Result<()> {
    let db = Arc::new(Database::new(&config.state)?);
    let backend = HttpBackend::new(config.backend.clone());
    let mut session = ChatSession::open(db, backend)?.with_cancel_on_switch(!config.keep_pending_on_switch);

    println!("Connected to {}. Type /help for commands.", config.backend);
    if let Some(chat) = session.registry().current() {
        println!("Current conversation: {} ({})", chat.title, chat.id);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let next = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = next else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, arg) = match line.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        let result = match command {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/new" => session.create_conversation().map(|id| println!("Created {id}")),
            "/list" => {
                let current = session.registry().current_id();
                for chat in session.registry().chats() {
                    let marker = if Some(chat.id.as_str()) == current { "*" } else { " " };
                    println!("{marker} {}  {}  ({} messages)", chat.id, chat.title, chat.messages.len());
                }
                Ok(())
            }
            "/switch" => session.select_conversation(arg).map(|_| {
                if let Some(chat) = session.registry().current() {
                    println!("Switched to {}", chat.title);
                    chat.messages.iter().for_each(print_message);
                }
            }),
            "/rename" => match session.registry().current_id().map(str::to_string) {
                Some(id) => session.rename_conversation(&id, arg),
                None => {
                    println!("No conversation selected");
                    Ok(())
                }
            },
            "/delete" => {
                let id = if arg.is_empty() {
                    session.registry().current_id().map(str::to_string)
                } else {
                    Some(arg.to_string())
                };
                match id {
                    Some(id) => session.delete_conversation(&id).map(|_| println!("Deleted {id}")),
                    None => Ok(()),
                }
            }
            "/upload" => session.upload_path(Path::new(arg)).await.map(|outcome| {
                if let Some(warning) = outcome.warning {
                    println!("warning: {warning}");
                }
                print_message(&outcome.message);
            }),
            "/link" => session.submit_link(arg).await.map(|m| print_message(&m)),
            "/web" => session.set_web_search(arg == "on"),
            "/reason" => session.set_reasoning_mode(arg == "on"),
            "/docs" => {
                if arg == "refresh" {
                    if let Err(e) = session.refresh_references().await {
                        println!("error: {e}");
                    }
                }
                for doc in session.attachments().documents() {
                    println!("[{}] doc  {}", if doc.selected { "x" } else { " " }, doc.id);
                }
                for link in session.attachments().links() {
                    let label = link.title.as_deref().unwrap_or(&link.url);
                    println!("[{}] link {}  {}", if link.selected { "x" } else { " " }, link.id, label);
                }
                Ok(())
            }
            "/select" => session
                .toggle_selected(arg)
                .map(|on| println!("{arg} {}", if on { "selected" } else { "deselected" })),
            "/chat-select" if arg == "reset" => session.reset_conversation_selection(),
            "/chat-select" => session
                .toggle_in_conversation(arg)
                .map(|on| println!("{arg} {} for this conversation", if on { "selected" } else { "deselected" })),
            "/remove" => session.delete_reference(arg).await.map(|_| println!("Removed {arg}")),
            _ if command.starts_with('/') => {
                println!("Unknown command {command}. Type /help.");
                Ok(())
            }
            _ => send(&mut session, line).await,
        };

        if let Err(e) = result {
            println!("error: {e}");
        }
    }
    Ok(())
}

async fn send(session: &mut ChatSession<HttpBackend>, line: &str) -> jamal_lib::session::SessionResult<()> {
    let pending = session.begin_text(line)?;
    let token = pending.cancel_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    let settled = pending.resolve(session.backend()).await;
    watcher.abort();

    match session.reconcile(settled)? {
        Delivery::Confirmed(message) | Delivery::Failed(message) => print_message(&message),
        Delivery::Cancelled => println!("(cancelled)"),
    }
    Ok(())
}

fn print_message(message: &Message) {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "jamal",
    };
    println!("[{}] {}: {}", message.kind.as_str(), who, message.content);
    if let Some(MessageMetadata::WebSearch(search)) = &message.metadata {
        for (i, result) in search.results.iter().enumerate() {
            println!("    {}. {} <{}>", i + 1, result.title, result.url);
        }
    }
}
