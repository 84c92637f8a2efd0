//! llmc CLI - command-line interface for the repository-aware code indexing and
//! retrieval engine.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::enrich::EnrichMode;

#[derive(Parser)]
#[command(name = "llmc")]
#[command(about = "Repository-aware code indexing and retrieval", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an incremental index pass over a repository
    Index {
        /// Repository root
        repo: std::path::PathBuf,
        /// Also push newly pending spans onto the global work queue
        #[arg(long)]
        feed_queue: bool,
    },
    /// Run an enrichment pass over pending spans
    Enrich {
        /// Repository root
        repo: std::path::PathBuf,
        /// Concurrency model to run
        #[arg(long, value_enum, default_value_t = EnrichMode::V1)]
        mode: EnrichMode,
        /// Maximum spans to process this pass
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Per-backend worker pool depth (V2 only)
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Overall wall-clock budget in seconds (V2 only)
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    /// Search the index (falls back to local grep when the index is stale)
    Search {
        /// Repository root
        repo: std::path::PathBuf,
        /// Query text
        query: String,
        /// Maximum results
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Find callers of a symbol
    WhereUsed {
        /// Repository root
        repo: std::path::PathBuf,
        /// Symbol name
        symbol: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Trace upstream callers or downstream callees of a symbol
    Lineage {
        /// Repository root
        repo: std::path::PathBuf,
        /// Symbol name
        symbol: String,
        /// Direction to traverse
        #[arg(long, value_enum, default_value_t = Direction::Upstream)]
        direction: Direction,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Print an operational health report for a repository's index
    Doctor {
        /// Repository root
        repo: std::path::PathBuf,
    },
    /// Export a repository's index to a portable archive
    Export {
        /// Repository root
        repo: std::path::PathBuf,
        /// Output archive path (defaults to `<repo>/llmc-export-<timestamp>.tar.gz`)
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },
    /// Schema/graph builder commands
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
    /// Run a V3 pool worker, configured entirely from `LLMC_WORKER_*` environment variables
    Worker {
        /// Stop after this many pulled items instead of running until a signal
        #[arg(long)]
        max_iterations: Option<usize>,
    },
}

#[derive(Subcommand)]
enum GraphCommands {
    /// Build the schema graph from the current span store and load it into the Graph Store
    Build {
        /// Repository root
        repo: std::path::PathBuf,
        /// Allow building an AST-only graph with zero enrichments
        #[arg(long)]
        allow_empty: bool,
    },
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum Direction {
    Upstream,
    Downstream,
}

impl From<Direction> for llmc_core::LineageDirection {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Upstream => llmc_core::LineageDirection::Upstream,
            Direction::Downstream => llmc_core::LineageDirection::Downstream,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index { repo, feed_queue } => commands::index::run(&repo, feed_queue),
        Commands::Enrich { repo, mode, limit, concurrency, timeout_secs } => {
            commands::enrich::run(&repo, mode, limit, concurrency, timeout_secs).await
        }
        Commands::Search { repo, query, limit } => commands::search::run(&repo, &query, limit),
        Commands::WhereUsed { repo, symbol, limit } => commands::where_used::run(&repo, &symbol, limit),
        Commands::Lineage { repo, symbol, direction, limit } => {
            commands::lineage::run(&repo, &symbol, direction.into(), limit)
        }
        Commands::Doctor { repo } => commands::doctor::run(&repo),
        Commands::Export { repo, output } => commands::export::run(&repo, output.as_deref()),
        Commands::Graph { command } => match command {
            GraphCommands::Build { repo, allow_empty } => commands::graph::build(&repo, allow_empty),
        },
        Commands::Worker { max_iterations } => commands::worker::run(max_iterations).await,
    }
}
