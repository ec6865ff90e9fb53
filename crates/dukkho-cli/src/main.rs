// Terminal chat client entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not the terminal, which is the chat UI)
// 2. Load config and open the chat store
// 3. Sign in with the configured user id and open a session
// 4. Read lines from stdin until EOF or /quit

mod command;
mod render;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use dukkho_app::{ChatSession, ClientError, RelayClient, UserContext};
use dukkho_core::config;
use dukkho_core::db::Database;

use command::Command;
use render::ReplyPrinter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Dukkho client starting up");

    let config = config::load_config().context("failed to load configuration")?;
    let db = Database::open(&config.db_path).context("failed to open chat store")?;
    info!("Chat store opened at {}", config.db_path.display());

    let user = UserContext::sign_in(config.client.user_id.clone())?;
    let relay = RelayClient::from_config(&config);
    info!("Using relay at {}", relay.url());
    let mut session = user.open_session(Arc::new(db), relay);

    println!("দুঃখ AI. Type a message, or /help for commands.");
    let mut listing: Vec<String> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        match command::parse(&line) {
            Command::Send("") => {}
            Command::Send(text) => {
                if let Err(e) = send(&mut session, text).await {
                    println!("error: {e:#}");
                }
            }
            Command::New => {
                session.new_chat();
                println!("(new chat)");
            }
            Command::Chats => report(list_chats(&session, &mut listing)),
            Command::Open(chat) => report(open_chat(&mut session, resolve(&listing, chat))),
            Command::Rename(chat, title) => report(session.rename_chat(resolve(&listing, chat), title)),
            Command::Pin(chat) => report(session.toggle_pin(resolve(&listing, chat)).map(|pinned| {
                println!("{}", if pinned { "(pinned)" } else { "(unpinned)" });
            })),
            Command::Delete(chat) => report(session.delete_chat(resolve(&listing, chat))),
            Command::Help => println!("{}", command::HELP),
            Command::Usage(usage) => println!("usage: {usage}"),
            Command::Unknown(name) => println!("unknown command /{name} (try /help)"),
            Command::Quit => break,
        }
        prompt()?;
    }

    session.sign_out();
    info!("Dukkho client shut down cleanly");
    Ok(())
}

/// Run one exchange, rendering events while the reply streams in.
async fn send(session: &mut ChatSession, text: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(64);

    let exchange = async move {
        let result = session.send_message(text, &tx).await;
        drop(tx);
        result
    };

    let render = async {
        let mut printer = ReplyPrinter::new();
        let mut out = std::io::stdout();
        while let Some(event) = rx.recv().await {
            render::render_event(&mut out, &mut printer, event)?;
            out.flush()?;
        }
        Ok::<_, std::io::Error>(())
    };

    let (result, rendered) = tokio::join!(exchange, render);
    rendered?;
    result?;
    Ok(())
}

fn list_chats(session: &ChatSession, listing: &mut Vec<String>) -> Result<(), ClientError> {
    let chats = session.list_chats()?;
    if chats.is_empty() {
        println!("(no chats yet)");
    }
    for (idx, chat) in chats.iter().enumerate() {
        let pin = if chat.pinned { "*" } else { " " };
        println!(
            "{:>3}{pin} {}  [{}]  {}",
            idx + 1,
            chat.title,
            chat.score,
            chat.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    *listing = chats.into_iter().map(|chat| chat.id).collect();
    Ok(())
}

fn open_chat(session: &mut ChatSession, chat_id: &str) -> Result<(), ClientError> {
    session.select_chat(chat_id)?;
    for turn in session.messages() {
        println!("{}> {}", turn.role.as_str(), turn.text);
    }
    println!("[দুঃখ স্কোর {}]", session.score());
    Ok(())
}

/// A listing number maps to its chat id; anything else is taken as an id.
fn resolve<'a>(listing: &'a [String], chat: &'a str) -> &'a str {
    chat.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|idx| listing.get(idx))
        .map_or(chat, String::as_str)
}

fn report(result: Result<(), ClientError>) {
    if let Err(e) = result {
        println!("error: {e}");
    }
}

fn prompt() -> std::io::Result<()> {
    let mut out = std::io::stdout();
    write!(out, "> ")?;
    out.flush()
}

/// Initialize tracing to log to a file (not the terminal, which is the chat UI).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("dukkho.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dukkho=info,dukkho_app=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
