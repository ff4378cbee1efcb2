//! Writingway CLI — the main entry point.
//!
//! Commands:
//! - `providers` — List the provider catalogue
//! - `init`      — Write (or print) a starter config
//! - `index`     — Ingest files and report chunk counts
//! - `search`    — Query a project without calling a model
//! - `chat`      — Converse with the assistant, grounded in a project

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "writingway",
    about = "Writingway — an AI writing partner grounded in your project",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.writingway/config.toml)
    #[arg(short, long, global = true, env = "WRITINGWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured and built-in providers
    Providers,

    /// Create a starter configuration file
    Init {
        /// Print the config instead of writing it
        #[arg(long)]
        print: bool,
    },

    /// Ingest files or directories and report chunk counts
    Index {
        /// Files or directories (.md and .txt are read)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Retrieve the passages most relevant to a query
    Search {
        query: String,

        /// Project directory to index
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Maximum passages to return
        #[arg(short)]
        k: Option<usize>,

        /// Minimum cosine similarity
        #[arg(long)]
        floor: Option<f32>,
    },

    /// Chat with the assistant
    Chat {
        /// Project directory to ground the conversation in
        #[arg(short, long, default_value = ".")]
        project: PathBuf,

        /// Provider id from the catalogue
        #[arg(long)]
        provider: Option<String>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Providers => commands::providers::run(config).await?,
        Commands::Init { print } => commands::init::run(config, print).await?,
        Commands::Index { paths } => commands::index::run(config, &paths).await?,
        Commands::Search {
            query,
            project,
            k,
            floor,
        } => commands::search::run(config, &project, &query, k, floor).await?,
        Commands::Chat {
            project,
            provider,
            model,
            message,
        } => commands::chat::run(config, &project, provider, model, message).await?,
    }

    Ok(())
}
