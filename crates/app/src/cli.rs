use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sidechat",
    author,
    version,
    about = "Chat with an LLM, with screenshots, images and PDFs attached",
    long_about = None
)]
pub struct Args {
    /// Where conversations are kept
    #[arg(long, value_enum, env = "SIDECHAT_STORE", default_value = "json")]
    pub store: StoreKind,

    /// Conversation file or database; defaults to the platform data directory
    #[arg(long, env = "SIDECHAT_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Settings file; defaults to settings.json in the platform config directory
    #[arg(long, env = "SIDECHAT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Json,
    Sqlite,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a message to the current conversation
    Send {
        /// Message text; may be empty when something is attached
        #[arg(default_value = "")]
        text: String,

        /// Image file to attach (repeatable)
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,

        /// PDF file to attach, one image per page (repeatable)
        #[arg(long = "pdf", value_name = "PATH")]
        pdfs: Vec<PathBuf>,

        /// File holding a screenshot as a data: URL (repeatable)
        #[arg(long = "screenshot", value_name = "FILE")]
        screenshots: Vec<PathBuf>,

        /// Page text to quote with the message (repeatable)
        #[arg(long = "selected", value_name = "TEXT")]
        selected: Vec<String>,

        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Start a new conversation
    New,
    /// List conversations, newest first
    List,
    /// Print a conversation (the current one by default)
    Show { id: Option<String> },
    /// Make another conversation current
    Switch { id: String },
    /// Delete a conversation
    Delete { id: String },
    /// Delete one message from a conversation
    DeleteMessage { id: String, index: usize },
    /// Delete all conversations
    Clear,
    /// Print the effective settings
    Config {
        /// Write the settings file if it does not exist yet
        #[arg(long)]
        write: bool,
    },
}
