//! rill - streaming chat client CLI

mod config;

use std::io::Write as _;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use rill_api::{ChatClient, ChatMode, ChatModel, DocPayload, HistoryEntry, ImageAttachment, Role};
use rill_chat::{ChatController, ChatEvent, Notice, SessionContext, SessionState};

/// rill - streaming chat client
#[derive(Parser, Debug)]
#[command(name = "rill")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Chat endpoint URL
    #[arg(long)]
    chat_url: Option<String>,

    /// Identity endpoint base URL
    #[arg(long)]
    auth_base: Option<String>,

    /// Bearer token (defaults to RILL_TOKEN or the config file)
    #[arg(long)]
    token: Option<String>,

    /// Model id
    #[arg(short, long)]
    model: Option<String>,

    /// Mode (deep or fast)
    #[arg(long)]
    mode: Option<String>,

    /// Enable web search
    #[arg(long)]
    web_search: bool,

    /// Start a fresh conversation instead of resuming the last one
    #[arg(long)]
    new: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("rill=debug")
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let chat_url = args
        .chat_url
        .or(cfg.chat_url.clone())
        .unwrap_or_else(|| "http://localhost:3001/api/ai_talk/Doubao".to_string());
    let auth_base = args
        .auth_base
        .or(cfg.auth_base.clone())
        .unwrap_or_else(|| "http://localhost:3001".to_string());
    let token = args
        .token
        .or_else(|| std::env::var("RILL_TOKEN").ok())
        .or(cfg.token.clone());
    let Some(token) = token else {
        anyhow::bail!("no token; pass --token, set RILL_TOKEN, or add it to the config file");
    };

    let model = args
        .model
        .as_deref()
        .or(cfg.model.as_deref())
        .and_then(ChatModel::parse)
        .unwrap_or(ChatModel::SeedVision);
    let mode = args
        .mode
        .as_deref()
        .or(cfg.mode.as_deref())
        .and_then(ChatMode::parse)
        .unwrap_or(ChatMode::Deep);
    let web_search = args.web_search || cfg.web_search.unwrap_or(false);

    let client = ChatClient::new(chat_url, auth_base);
    let conversation_id = if args.new {
        None
    } else {
        config::load_conversation_id()
    };
    let controller = ChatController::new(Arc::new(client), SessionContext::new(), conversation_id);
    controller.set_options(|options| {
        options.model = model;
        options.mode = mode;
        options.web_search = web_search;
    });

    let user = controller.login(token).await?;
    println!(
        "Logged in as {} <{}> — {} requests remaining",
        user.username, user.email, user.remaining_quota
    );

    config::store_conversation_id(&controller.conversation_id()).ok();
    spawn_event_watcher(&controller);

    repl(controller).await
}

/// Persist conversation-id changes and surface notices as they happen.
fn spawn_event_watcher(controller: &ChatController) {
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChatEvent::ConversationChanged { conversation_id }) => {
                    if let Err(err) = config::store_conversation_id(&conversation_id) {
                        tracing::warn!("failed to persist conversation id: {err}");
                    }
                }
                Ok(ChatEvent::Notice { notice }) => print_notice(&notice),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::SearchDisabled { reason } => {
            println!("(web search disabled by server: {reason})");
        }
        Notice::QuotaExhausted { message } => {
            println!("(quota exhausted: {message})");
        }
        Notice::HistoryFailed { message } => {
            println!("(history unavailable: {message})");
        }
    }
}

async fn repl(controller: ChatController) -> anyhow::Result<()> {
    println!("Type a message to send, /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            if !handle_command(&controller, rest).await {
                break;
            }
        } else {
            controller.update_draft(|draft| draft.text = line.clone());
            start_send(&controller);
        }
    }

    Ok(())
}

/// Handle a slash command. Returns false when the REPL should exit.
async fn handle_command(controller: &ChatController, input: &str) -> bool {
    let mut parts = input.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match cmd {
        "quit" | "exit" => return false,
        "help" => print_help(),
        "stop" => controller.handle().stop(),
        "new" => match controller.new_conversation() {
            Ok(id) => println!("Started conversation {id}"),
            Err(err) => println!("! {err}"),
        },
        "history" => match controller.history().list().await {
            Ok(entries) => print_history(&entries),
            Err(err) => println!("! {err}"),
        },
        "load" => {
            if rest.is_empty() {
                println!("usage: /load <conversation-id>");
            } else {
                match controller.history().load(rest).await {
                    Ok(()) => print_transcript(controller),
                    Err(err) => println!("! {err}"),
                }
            }
        }
        "rename" => {
            let mut words = rest.splitn(2, char::is_whitespace);
            match (words.next(), words.next()) {
                (Some(id), Some(title)) if !title.trim().is_empty() => {
                    match controller.history().rename(id, title.trim()).await {
                        Ok(()) => println!("Renamed {id}"),
                        Err(err) => println!("! {err}"),
                    }
                }
                _ => println!("usage: /rename <conversation-id> <title>"),
            }
        }
        "delete" => {
            if rest.is_empty() {
                println!("usage: /delete <conversation-id>");
            } else {
                match controller.history().delete(rest).await {
                    Ok(()) => println!("Deleted {rest}"),
                    Err(err) => println!("! {err}"),
                }
            }
        }
        "edit" => {
            let Some(last) = controller.store().last_turn_of(Role::User) else {
                println!("nothing to edit");
                return true;
            };
            match controller.begin_edit(&last.id) {
                Ok(()) => {
                    if !rest.is_empty() {
                        controller.update_draft(|draft| draft.text = rest.to_string());
                    }
                    start_send(controller);
                }
                Err(err) => println!("! {err}"),
            }
        }
        "image" => attach_image(controller, rest),
        "attach" => attach_doc(controller, rest),
        "model" => match ChatModel::parse(rest) {
            Some(model) => {
                controller.set_options(|options| options.model = model);
                println!("model: {}", model.wire_id());
            }
            None => {
                let ids: Vec<&str> = ChatModel::all().iter().map(|m| m.wire_id()).collect();
                println!("usage: /model <{}>", ids.join("|"));
            }
        },
        "mode" => match ChatMode::parse(rest) {
            Some(mode) => controller.set_options(|options| options.mode = mode),
            None => println!("usage: /mode <deep|fast>"),
        },
        "search" => match rest {
            "on" => controller.set_options(|options| options.web_search = true),
            "off" => controller.set_options(|options| options.web_search = false),
            _ => println!("usage: /search <on|off>"),
        },
        "quota" => match controller.context().remaining_quota() {
            Some(remaining) => println!("{remaining} requests remaining"),
            None => println!("quota unknown"),
        },
        _ => println!("unknown command: /{cmd}"),
    }

    true
}

/// Kick off a send without blocking the REPL, so /stop stays responsive.
fn start_send(controller: &ChatController) {
    let controller = controller.clone();
    tokio::spawn(async move {
        let printer = spawn_printer(&controller);
        if let Err(err) = controller.send().await {
            println!("! {err}");
        }
        let _ = printer.await;
    });
}

/// Print assistant deltas as they land in the transcript.
fn spawn_printer(controller: &ChatController) -> tokio::task::JoinHandle<()> {
    let mut transcript = controller.store().subscribe();
    let mut events = controller.subscribe();

    tokio::spawn(async move {
        // The StreamStarted event names the turn to watch.
        let turn_id = loop {
            match events.recv().await {
                Ok(ChatEvent::StreamStarted { turn_id }) => break turn_id,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        };

        let mut printed = 0usize;
        loop {
            tokio::select! {
                changed = transcript.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let text = transcript
                        .borrow_and_update()
                        .turn(&turn_id)
                        .map(|turn| turn.text.clone())
                        .unwrap_or_default();
                    printed = print_tail(&text, printed);
                }
                event = events.recv() => match event {
                    Ok(ChatEvent::StreamFinished { state, .. }) => {
                        let snapshot = transcript.borrow().clone();
                        let turn = snapshot.turn(&turn_id);
                        match state {
                            SessionState::Completed => {
                                if let Some(turn) = turn {
                                    print_tail(&turn.text, printed);
                                }
                                println!();
                            }
                            SessionState::Aborted => println!("\n[stopped]"),
                            SessionState::Failed => {
                                if let Some(turn) = turn {
                                    if turn.text.is_empty() {
                                        println!();
                                    } else {
                                        println!("\n! {}", turn.text);
                                    }
                                }
                            }
                            _ => {}
                        }
                        return;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    })
}

/// Print whatever grew beyond `printed`, returning the new watermark.
/// A shrinking or rewritten text (failure overwrite) just resets the
/// watermark; the final message is printed by the finish handler.
fn print_tail(text: &str, printed: usize) -> usize {
    if text.len() > printed && text.is_char_boundary(printed) {
        print!("{}", &text[printed..]);
        std::io::stdout().flush().ok();
        text.len()
    } else if text.len() < printed {
        text.len()
    } else {
        printed
    }
}

fn attach_image(controller: &ChatController, path: &str) {
    if path.is_empty() {
        println!("usage: /image <path>");
        return;
    }
    match std::fs::read(path) {
        Ok(bytes) => {
            let name = file_name(path);
            let mime = image_mime(path).unwrap_or("image/png");
            let data_url = format!("data:{mime};base64,{}", BASE64.encode(&bytes));
            controller.update_draft(|draft| {
                draft.images.push(ImageAttachment::new(name.clone(), data_url));
            });
            println!("attached image {name}");
        }
        Err(err) => println!("! {path}: {err}"),
    }
}

fn attach_doc(controller: &ChatController, path: &str) {
    if path.is_empty() {
        println!("usage: /attach <path>");
        return;
    }
    match std::fs::read(path) {
        Ok(bytes) => {
            let name = file_name(path);
            let mime = doc_mime(path).unwrap_or("application/octet-stream");
            let payload = DocPayload {
                name: name.clone(),
                mime_type: mime.to_string(),
                content_base64: BASE64.encode(&bytes),
            };
            controller.update_draft(|draft| draft.docs.push(payload));
            println!("attached document {name}");
        }
        Err(err) => println!("! {path}: {err}"),
    }
}

fn file_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn extension(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn image_mime(path: &str) -> Option<&'static str> {
    match extension(path).as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn doc_mime(path: &str) -> Option<&'static str> {
    match extension(path).as_str() {
        "pdf" => Some("application/pdf"),
        "doc" => Some("application/msword"),
        "docx" => {
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        "xls" => Some("application/vnd.ms-excel"),
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        "ppt" => Some("application/vnd.ms-powerpoint"),
        "pptx" => {
            Some("application/vnd.openxmlformats-officedocument.presentationml.presentation")
        }
        "txt" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "md" => Some("text/markdown"),
        "mobi" => Some("application/x-mobipocket-ebook"),
        "epub" => Some("application/epub+zip"),
        _ => None,
    }
}

fn print_history(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("no saved conversations");
        return;
    }
    for entry in entries {
        let when = entry
            .updated_at
            .as_deref()
            .map(format_timestamp)
            .unwrap_or_default();
        let model = entry.model.as_deref().unwrap_or("-");
        println!("{}  {}  [{}] {}", entry.conversation_id, when, model, entry.title);
    }
}

/// Format a server timestamp for display; unparseable values pass through.
fn format_timestamp(value: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| value.to_string())
}

fn print_transcript(controller: &ChatController) {
    let snapshot = controller.store().snapshot();
    for turn in &snapshot.turns {
        match turn.role {
            Role::User => println!("you: {}", turn.text),
            Role::Assistant => println!("assistant: {}", turn.text),
        }
        for image in &turn.images {
            println!("  [image: {}]", image.name);
        }
        for doc in &turn.attached_docs {
            println!("  [document: {}]", doc.name);
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  /stop                     stop the current reply");
    println!("  /edit [new text]          edit the last message and resend");
    println!("  /new                      start a fresh conversation");
    println!("  /history                  list saved conversations");
    println!("  /load <id>                load a conversation");
    println!("  /rename <id> <title>      rename a conversation");
    println!("  /delete <id>              delete a conversation");
    println!("  /image <path>             attach an image to the next message");
    println!("  /attach <path>            attach a document to the next message");
    println!("  /model <id>               switch model");
    println!("  /mode <deep|fast>         switch mode");
    println!("  /search <on|off>          toggle web search");
    println!("  /quota                    show remaining quota");
    println!("  /quit                     exit");
}
