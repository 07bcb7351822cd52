//! # Agentic RAG CLI (`arag`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `arag ask -f <file>... "<question>"` | Ingest files and answer one question |
//! | `arag chat [-f <file>...]` | Interactive question answering session |
//! | `arag formats` | List supported document formats |
//! | `arag config` | Print the effective configuration |
//! | `arag check` | Test the embedding and generation providers |
//!
//! ## Examples
//!
//! ```bash
//! arag ask -f handbook.pdf -f faq.md "How many vacation days do I get?"
//! arag chat -f quarterly.csv --config ./arag.toml
//! RUST_LOG=agentic_rag=debug arag chat
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use agentic_rag::{cli, telemetry};

/// Agentic RAG: ask questions about your documents.
///
/// Settings are read from `--config`, or `./arag.toml` when present,
/// otherwise built-in defaults apply. API keys come from the
/// environment (a `.env` file is loaded if present).
#[derive(Parser)]
#[command(name = "arag", version, about = "Agentic RAG: ask questions about your documents")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (repeat for trace level).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the given files and answer a single question.
    Ask {
        /// Document to ingest (repeatable).
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,

        /// The question to answer.
        question: String,

        /// Print the answer and its sources as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive session.
    ///
    /// Lines starting with `/` are commands (`/help` lists them); anything
    /// else is asked as a question against the uploaded documents.
    Chat {
        /// Document to ingest before the session starts (repeatable).
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
    },

    /// List supported document formats.
    Formats,

    /// Print the effective configuration as TOML.
    Config,

    /// Make one call to each configured provider.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();
    telemetry::init(args.verbose, args.quiet, args.log_json);

    let config_path = args.config.as_deref();
    match args.command {
        Commands::Formats => cli::run_formats(),
        Commands::Config => cli::run_config(&cli::resolve_config(config_path)?)?,
        Commands::Check => cli::run_check(&cli::resolve_config(config_path)?).await?,
        Commands::Ask {
            files,
            question,
            json,
        } => {
            let cfg = cli::resolve_config(config_path)?;
            cli::run_ask(&cfg, &files, &question, json).await?
        }
        Commands::Chat { files } => {
            let cfg = cli::resolve_config(config_path)?;
            cli::run_chat(&cfg, &files).await?
        }
    }

    Ok(())
}
