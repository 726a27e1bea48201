//! # script-rag CLI (`srag`)
//!
//! ## Usage
//!
//! ```bash
//! srag [--config ./srag.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srag add <path>` | Extract, chunk, embed and store a script |
//! | `srag remove <name>` | Remove every document with that name |
//! | `srag query "<text>"` | Show the most similar chunks |
//! | `srag context "<text>"` | Print a formatted context block for a prompt |
//! | `srag info` | Show store statistics and configuration |
//! | `srag clear --confirm` | Delete every document |
//! | `srag rebuild` | Re-embed all chunks and regenerate the index |
//!
//! Errors are printed as `error[<Kind>]: <cause>` and exit with status 1.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use script_rag::commands::{self, QueryFormat};
use script_rag::config;
use script_rag::logging;

/// Vector-indexed retrieval for screenplay and anime-script text.
#[derive(Parser)]
#[command(name = "srag", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a script (PDF or text file) to the store.
    Add {
        /// File to ingest.
        path: PathBuf,
        /// Document name (defaults to the file stem).
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove every document registered under a name.
    Remove {
        name: String,
    },

    /// Retrieve the chunks most similar to a query.
    Query {
        text: String,
        /// Number of results (defaults to `[retrieval] top_k`).
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long, value_enum, default_value = "simple")]
        format: QueryFormat,
    },

    /// Print ranked context blocks for a generation prompt.
    Context {
        text: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Character budget (defaults to `[retrieval] max_context_chars`).
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// Show document and chunk counts and the active configuration.
    Info,

    /// Delete every document and chunk.
    Clear {
        /// Required to actually clear.
        #[arg(long)]
        confirm: bool,
    },

    /// Re-embed every stored chunk and regenerate the index.
    ///
    /// Repairs a store whose index artifact is missing or disagrees with
    /// its metadata.
    Rebuild,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {:#}", commands::error_kind(&err), err);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_or_default(cli.config.as_deref())?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Add { path, name } => commands::run_add(&cfg, &path, name).await?,
        Commands::Remove { name } => commands::run_remove(&cfg, &name).await?,
        Commands::Query {
            text,
            top_k,
            format,
        } => commands::run_query(&cfg, &text, top_k, format).await?,
        Commands::Context {
            text,
            top_k,
            max_chars,
        } => commands::run_context(&cfg, &text, top_k, max_chars).await?,
        Commands::Info => commands::run_info(&cfg).await?,
        Commands::Clear { confirm } => commands::run_clear(&cfg, confirm).await?,
        Commands::Rebuild => commands::run_rebuild(&cfg).await?,
    }

    Ok(())
}
