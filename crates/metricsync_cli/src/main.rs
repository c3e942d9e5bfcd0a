//! Metricsync CLI
//!
//! Command-line client for a remote metrics API.
//!
//! # Commands
//!
//! - `whoami` - Show the logged-in user
//! - `login` - Check credentials and show the user
//! - `logout` - End the session
//! - `metrics` - Run a one-shot metrics query
//! - `recents` - Follow the most recent records
//! - `dashboard` - Follow the latest record for a source

mod commands;

use clap::{Parser, Subcommand};
use commands::{Format, GlobalArgs};
use tracing_subscriber::EnvFilter;

/// Metricsync command-line client.
#[derive(Parser)]
#[command(name = "metricsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the logged-in user
    Whoami,

    /// Log in with --username/--password and show the user
    Login,

    /// End the session
    Logout,

    /// Run a one-shot metrics query
    Metrics {
        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<u32>,

        /// Only rows at or after this Unix timestamp
        #[arg(long)]
        from: Option<i64>,

        /// Only rows at or before this Unix timestamp
        #[arg(long)]
        to: Option<i64>,

        /// Rows to skip
        #[arg(long)]
        skip: Option<u32>,

        /// Source filter
        #[arg(long)]
        src: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Follow the most recent records
    Recents {
        /// Buffer size
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Stop after this many seconds (runs until ctrl-c if omitted)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Follow the latest record for a source
    Dashboard {
        /// Source filter (all sources if omitted)
        #[arg(long, default_value = "")]
        src: String,

        /// Stop after this many seconds (runs until ctrl-c if omitted)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Whoami => commands::session::whoami(&cli.global).await?,
        Commands::Login => commands::session::login(&cli.global).await?,
        Commands::Logout => commands::session::logout(&cli.global).await?,
        Commands::Metrics {
            limit,
            from,
            to,
            skip,
            src,
            format,
        } => {
            let query = commands::metrics::build_query(limit, from, to, skip, src);
            commands::metrics::run(&cli.global, &query, format).await?;
        }
        Commands::Recents {
            limit,
            duration,
            format,
        } => {
            let stream = commands::watch::Stream::Recents { limit };
            commands::watch::run(&cli.global, stream, duration, format).await?;
        }
        Commands::Dashboard {
            src,
            duration,
            format,
        } => {
            let stream = commands::watch::Stream::Dashboard { source: src };
            commands::watch::run(&cli.global, stream, duration, format).await?;
        }
        Commands::Version => {
            println!("Metricsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
