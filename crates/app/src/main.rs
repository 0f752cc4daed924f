use anyhow::{bail, Context, Result};
use attachments::{AttachmentEncoder, AttachmentSource, PdfEncoder, PopplerRasterizer};
use clap::Parser;
use providers::{BackendRouter, StreamDelta};
use services::{
    ChatSession, ConversationStore, JsonFileStore, KeyValueStore, SqliteStore, TurnReport,
};
use shared::conversation::Conversation;
use shared::settings::ChatSettings;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

use cli::{Args, Command, StoreKind};
use config::SettingsSource;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_backend(kind: StoreKind, path: Option<PathBuf>) -> Result<Box<dyn KeyValueStore>> {
    Ok(match kind {
        StoreKind::Json => {
            let path = path.unwrap_or_else(JsonFileStore::default_path);
            let store = JsonFileStore::open(&path)
                .with_context(|| format!("opening conversations at {}", path.display()))?;
            Box::new(store)
        }
        StoreKind::Sqlite => {
            let path = path.unwrap_or_else(config::default_sqlite_path);
            let store = SqliteStore::open(&path)
                .with_context(|| format!("opening database at {}", path.display()))?;
            Box::new(store)
        }
    })
}

fn read_screenshot(path: &Path) -> Result<AttachmentSource> {
    let data_url = std::fs::read_to_string(path)
        .with_context(|| format!("reading screenshot {}", path.display()))?;
    let data_url = data_url.trim();
    if !data_url.starts_with("data:") {
        bail!("{} does not contain a data: URL", path.display());
    }
    Ok(AttachmentSource::screenshot(data_url))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(config::config_path)
        .context("no settings location available; pass --config")?;
    let (mut settings, source) = config::load_settings_or_default(&config_path);
    tracing::debug!(path = %config_path.display(), ?source, "settings loaded");

    if let Command::Config { write } = args.command {
        if write {
            config::write_defaults(&settings, source, &config_path)?;
            println!("Wrote {}", config_path.display());
        } else {
            let note = match source {
                SettingsSource::Loaded => "",
                SettingsSource::Missing => " (not created yet, showing defaults)",
                SettingsSource::Invalid => " (unreadable, showing defaults)",
            };
            println!("# {}{}", config_path.display(), note);
        }
        println!("{}", config::redacted_json(&settings)?);
        return Ok(());
    }

    let backend = open_backend(args.store, args.store_path)?;
    let mut store = ConversationStore::load(backend, settings.store.clone());

    match args.command {
        Command::Send {
            text,
            images,
            pdfs,
            screenshots,
            selected,
            no_stream,
        } => {
            if no_stream {
                settings.text.stream = false;
                settings.multimodal.stream = false;
            }
            let mut session = build_session(store, &settings);
            for path in images.into_iter().chain(pdfs) {
                session.attach(AttachmentSource::file(path));
            }
            for path in &screenshots {
                session.attach(read_screenshot(path)?);
            }
            for text in selected {
                session.add_selected_text(text);
            }
            send(session, &text).await?;
        }
        Command::New => {
            let conversation = store.create_new();
            println!("{}", conversation.id);
        }
        Command::List => {
            let current = store.current_id().to_string();
            for conversation in store.conversations() {
                let marker = if conversation.id == current { '*' } else { ' ' };
                println!(
                    "{} {}  {}  {:<24} {} message(s), {:?}",
                    marker,
                    conversation.id,
                    conversation.updated_at.format("%Y-%m-%d %H:%M"),
                    conversation.title,
                    conversation.messages.len(),
                    conversation.model_type,
                );
            }
        }
        Command::Show { id } => {
            let id = id.unwrap_or_else(|| store.current_id().to_string());
            match store.get(&id) {
                Some(conversation) => print_conversation(conversation),
                None => bail!("no conversation with id {}", id),
            }
        }
        Command::Switch { id } => {
            if !store.switch_conversation(&id) {
                if store.current_id() == id {
                    println!("{} is already current", id);
                } else {
                    bail!("no conversation with id {}", id);
                }
            }
        }
        Command::Delete { id } => {
            if !store.delete(&id) {
                bail!("no conversation with id {}", id);
            }
        }
        Command::DeleteMessage { id, index } => {
            if !store.delete_message(&id, index) {
                bail!("conversation {} has no message {}", id, index);
            }
        }
        Command::Clear => store.clear_history(),
        Command::Config { .. } => unreachable!("handled before the store is opened"),
    }
    Ok(())
}

fn build_session(store: ConversationStore, settings: &ChatSettings) -> ChatSession {
    let rasterizer = Arc::new(PopplerRasterizer::default());
    let encoder = AttachmentEncoder::new(PdfEncoder::from_settings(
        Some(rasterizer),
        &settings.attachments,
    ));
    let backend = Arc::new(BackendRouter::from_settings(settings));
    ChatSession::new(store, backend, encoder, settings.history_limit)
}

/// Submits one turn, printing the answer as it streams in.
async fn send(mut session: ChatSession, text: &str) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    session.stream_to(tx);
    let printer = tokio::spawn(async move {
        let mut printed = false;
        let mut stdout = std::io::stdout();
        while let Some(delta) = rx.recv().await {
            match delta {
                StreamDelta::Content(text) => {
                    let _ = write!(stdout, "{}", text);
                    let _ = stdout.flush();
                    printed = true;
                }
                StreamDelta::Reasoning(text) => eprint!("{}", text),
            }
        }
        printed
    });

    let result = session.submit(text).await;
    // Dropping the session closes the delta channel so the printer finishes
    drop(session);
    let printed = printer.await.unwrap_or(false);
    let report: TurnReport = result?;

    for failure in &report.failures {
        eprintln!("warning: {} was not attached: {}", failure.name, failure.reason);
    }
    if !report.is_success() || !printed {
        print!("{}", report.reply);
    }
    println!();
    if let Some(error) = report.error {
        return Err(error).context("chat request failed");
    }
    Ok(())
}

fn print_conversation(conversation: &Conversation) {
    println!("# {} ({:?})", conversation.title, conversation.model_type);
    println!("# {}", conversation.id);
    for (index, message) in conversation.messages.iter().enumerate() {
        println!();
        println!(
            "[{}] {:?} {}",
            index,
            message.sender,
            message.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        for selection in &message.selected_texts {
            println!("> {}", selection);
        }
        for attachment in &message.attachments {
            println!("[{:?}: {}]", attachment.kind, attachment.name);
        }
        if !message.text.is_empty() {
            println!("{}", message.text);
        }
    }
}
