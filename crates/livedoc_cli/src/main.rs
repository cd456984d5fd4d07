//! LiveDoc CLI
//!
//! Runs a live query server from a model file.
//!
//! # Commands
//!
//! - `serve` - Serve live queries over TCP
//! - `models` - Validate a model file and print its metadata
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use livedoc_server::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LiveDoc live query server and tools.
#[derive(Parser)]
#[command(name = "livedoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve live queries over TCP
    Serve {
        /// Model definition file (JSON)
        #[arg(short, long)]
        models: PathBuf,

        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Maximum concurrent connections
        #[arg(long, default_value = "1000")]
        max_connections: usize,

        /// Maximum open live queries per connection
        #[arg(long, default_value = "64")]
        max_live_queries: usize,

        /// Cap on documents per list result (0 for no cap)
        #[arg(long, default_value = "0")]
        max_limit: u64,
    },

    /// Validate a model file and print its metadata
    Models {
        /// Model definition file (JSON)
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            models,
            bind,
            max_connections,
            max_live_queries,
            max_limit,
        } => {
            let config = ServerConfig::new(bind)
                .with_max_connections(max_connections)
                .with_max_live_queries(max_live_queries)
                .with_max_limit((max_limit > 0).then_some(max_limit));
            commands::serve::run(&models, config)?;
        }
        Commands::Models { file, format } => {
            commands::models::run(&file, &format)?;
        }
        Commands::Version => {
            println!("LiveDoc CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("LiveDoc Core v{}", livedoc_core::VERSION);
        }
    }

    Ok(())
}
