//! Command-line interface parsing and top-level wiring.
//!
//! This module owns the run lifecycle: configuration, startup, the
//! conversation session, and the single unwind point that releases every
//! acquired resource no matter how the session ended.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::chat::observers::{ResponseObserver, TextObserver, ToolTraceObserver};
use crate::chat::{Conversation, StdinPromptReader};
use crate::core::config::{self, ServerDescriptor, SERVERS_FILE};
use crate::core::ledger::ResourceLedger;
use crate::genai::{GeminiClient, GeminiConfig};
use crate::mcp::registry::SessionRegistry;
use crate::ui::Console;
use crate::utils::env::load_dotenv;

const MISSING_KEY_HELP: &str = "❌ No API key configured\n\nSet one of:\n  export GEMINI_API_KEY=\"your-api-key\"\n  export GOOGLE_API_KEY=\"your-api-key\"\n\nOptional:\n  export GEMINI_MODEL=\"...\"      # override the default model\n  export GEMINI_BASE_URL=\"...\"   # alternate endpoint";

#[derive(Parser)]
#[command(name = "causerie")]
#[command(about = "Chat with Gemini over your MCP tool servers")]
#[command(
    long_about = "Causerie reads MCP server definitions from mcp_servers.json, starts every \
server, and hands their tools to Gemini for an interactive chat session.\n\n\
Environment Variables:\n\
  GEMINI_API_KEY    Your Gemini API key (GOOGLE_API_KEY also works)\n\
  GEMINI_MODEL      Override the default model\n\
  GEMINI_BASE_URL   Alternate generateContent endpoint\n\n\
Server definitions:\n\
  command entries spawn a subprocess speaking JSON-RPC over stdio\n\
  url entries connect to a server-push SSE event stream\n\
  url entries marked \"type\": \"http\" use streamable HTTP\n\n\
An empty message ends the session; Ctrl+C does too, after cleanup."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server definitions file
    #[arg(
        short = 'c',
        long,
        global = true,
        value_name = "FILE",
        default_value = SERVERS_FILE
    )]
    pub config: PathBuf,

    /// Model to chat with
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Render replies as plain text instead of styled Markdown
    #[arg(long, global = true)]
    pub plain: bool,

    /// Ask the model to respond in this language
    #[arg(long, global = true, value_name = "LANGUAGE")]
    pub language: Option<String>,

    /// Warn when no tool servers come up
    #[arg(long, global = true)]
    pub warn_no_tools: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chat session (default)
    Chat,
    /// Write a starter server definitions file
    Init,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    load_dotenv();
    let args = Args::parse();
    init_tracing();

    match &args.command {
        Some(Commands::Init) => {
            if let Err(message) = write_starter_document(&args.config) {
                eprintln!("❌ {message}");
                std::process::exit(1);
            }
            println!("Wrote {}", args.config.display());
            println!("Entries with a url connect over SSE; add \"type\": \"http\" for streamable HTTP.");
            Ok(())
        }
        Some(Commands::Chat) | None => {
            let runtime = tokio::runtime::Runtime::new()?;
            let code = runtime.block_on(run(&args));
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("causerie=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The whole run: startup, session, then exactly one unwind pass. Returns
/// the process exit code.
async fn run(args: &Args) -> i32 {
    let console = Console::stdio(!args.plain);

    let descriptors = match config::load_descriptors(&args.config) {
        Ok(descriptors) => descriptors,
        Err(err) => {
            console.error(&format!("⚠️  {err}; continuing without tools"));
            Vec::new()
        }
    };

    let Some(mut gemini) = GeminiConfig::from_env() else {
        console.error(MISSING_KEY_HELP);
        return 1;
    };
    if let Some(model) = &args.model {
        gemini = gemini.with_model(model.clone());
    }
    let client = match GeminiClient::new(gemini) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            console.error(&format!("❌ Error: {err}"));
            return 1;
        }
    };

    let mut ledger = ResourceLedger::new();
    let code = tokio::select! {
        code = session(args, &console, &descriptors, client, &mut ledger) => code,
        _ = tokio::signal::ctrl_c() => {
            console.error("Interrupted.");
            0
        }
    };

    let mut release_failed = false;
    for failure in ledger.unwind_all().await {
        console.error(&format!("⚠️  {failure}"));
        release_failed = true;
    }
    let _ = console.line("Goodbye.");
    if release_failed {
        code.max(1)
    } else {
        code
    }
}

async fn session(
    args: &Args,
    console: &Console,
    descriptors: &[ServerDescriptor],
    client: Arc<GeminiClient>,
    ledger: &mut ResourceLedger,
) -> i32 {
    let registry = match SessionRegistry::build(descriptors, ledger, console).await {
        Ok(registry) => registry,
        Err(err) => {
            console.error(&format!("❌ Error: {err}"));
            return 1;
        }
    };
    if args.warn_no_tools && registry.is_empty() {
        console.error("⚠️  no tool servers configured; the model will answer unaided");
    }

    let observers: Vec<Box<dyn ResponseObserver>> = vec![
        Box::new(ToolTraceObserver::new(console.clone())),
        Box::new(TextObserver::new(console.clone())),
    ];
    let mut conversation = Conversation::new(
        client,
        registry,
        observers,
        console.clone(),
        args.language.clone(),
    );
    let mut reader = StdinPromptReader::new(console.clone());
    match conversation.run(&mut reader).await {
        Ok(()) => 0,
        Err(err) => {
            console.error(&format!("❌ Error: {err}"));
            1
        }
    }
}

fn write_starter_document(path: &Path) -> Result<(), String> {
    if path.exists() {
        return Err(format!("{} already exists; not overwriting", path.display()));
    }
    std::fs::write(path, config::starter_document())
        .map_err(|err| format!("could not write {}: {err}", path.display()))
}
