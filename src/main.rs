//! # AutoEngage CLI
//!
//! Entry point for the engagement engine binary. Parses flags with clap and
//! hands each subcommand to [`cli`].
//!
//! | Command | Effect |
//! |---------|--------|
//! | `serve` | run the polling/dispatch/maintenance loops and the HTTP surface |
//! | `migrate` | apply `migrations/` to `DATABASE_URL` |
//! | `poll-once` | poll every active page once and print the poll statuses |
//! | `trigger <url>` | feed one link through the realtime trigger path |
//! | `export-audit --org` | write the org's audit trail as CSV |
//! | `check-config` | parse and validate the TOML configuration |

mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "autoengage", version, about = "Engagement orchestration engine")]
pub struct Cli {
    /// PostgreSQL connection string. Without it the engine runs on an in-memory store.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Engine configuration file (TOML). Defaults apply when absent.
    #[arg(long, env = "AUTOENGAGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the browser-automation sidecar (post source, action sink, sessions)
    #[arg(long, env = "SIDECAR_URL", global = true)]
    pub sidecar_url: Option<String>,

    /// API key for comment drafting
    #[arg(long, env = "OPENROUTER_API_KEY", global = true, hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the engine loops and the HTTP surface
    Serve {
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Apply database migrations
    Migrate,
    /// Poll every active tracked page once
    PollOnce,
    /// Submit one link as a realtime trigger
    Trigger {
        url: String,
        /// Restrict page matching to one organization
        #[arg(long)]
        org: Option<Uuid>,
        #[arg(long)]
        source_label: Option<String>,
    },
    /// Export an organization's audit trail as CSV
    ExportAudit {
        #[arg(long)]
        org: Uuid,
        /// Output file (stdout when omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Parse and validate the configuration, then print it
    CheckConfig,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new()?;
    match &cli.command {
        Commands::CheckConfig => cli::run_check_config(&cli),
        Commands::Serve { port } => rt.block_on(cli::run_serve(&cli, *port)),
        Commands::Migrate => rt.block_on(cli::run_migrate(&cli)),
        Commands::PollOnce => rt.block_on(cli::run_poll_once(&cli)),
        Commands::Trigger {
            url,
            org,
            source_label,
        } => rt.block_on(cli::run_trigger(&cli, url, *org, source_label.clone())),
        Commands::ExportAudit { org, output, limit } => {
            rt.block_on(cli::run_export_audit(&cli, *org, output.as_deref(), *limit))
        }
    }
}
