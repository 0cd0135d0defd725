//! space-cloud CLI - run and inspect cluster nodes.

mod commands;
mod observability;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use observability::{TracingConfig, TracingGuard, init_tracing};

/// space-cloud - replicated configuration for a space-cloud cluster.
#[derive(Parser)]
#[command(name = "space-cloud")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cluster node and run until interrupted
    Start(commands::start::StartArgs),

    /// Print the token layout for a set of members
    Tokens {
        /// Member identities (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        members: Vec<String>,

        /// Only print the range of this member
        #[arg(short, long)]
        node: Option<String>,

        /// Size of the token space
        #[arg(short = 't', long, default_value = "100")]
        max_tokens: u32,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Configuration file commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config document, or a node config with --cluster
    Validate {
        /// Path to the .yaml, .yml or .json file
        file: PathBuf,

        /// Treat the file as a cluster node config
        #[arg(long)]
        cluster: bool,
    },
}

fn setup_logging(verbosity: u8) -> Result<TracingGuard> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let from_env = TracingConfig::from_env();
    // An explicit filter in the environment wins over -v
    let log_filter = if std::env::var_os("SC_LOG_LEVEL").is_some() || std::env::var_os("RUST_LOG").is_some() {
        from_env.log_filter().to_string()
    } else {
        filter.to_string()
    };

    let config = TracingConfig::builder()
        .log_format(from_env.log_format())
        .log_filter(log_filter)
        .include_location(from_env.include_location())
        .include_thread_ids(from_env.include_thread_ids())
        .build();

    init_tracing(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Start(args) => commands::start::run(args).await,
        Commands::Tokens {
            members,
            node,
            max_tokens,
            json,
        } => commands::tokens::run(&members, node.as_deref(), max_tokens, json),
        Commands::Config { action } => match action {
            ConfigAction::Validate { file, cluster } => commands::config::validate(&file, cluster),
        },
        Commands::Version => commands::version::run(),
    }
}
