//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Each `run_*`
//! function builds the store and collaborators a subcommand needs, then
//! drives the [`Engine`] or the store directly.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use autoengage::collaborators::SidecarClient;
use autoengage::comments::{CommentDrafter, DraftRequest, OpenRouterDrafter};
use autoengage::config::{self, EngineConfig};
use autoengage::db::Database;
use autoengage::discovery::LinkTrigger;
use autoengage::engine::Collaborators;
use autoengage::identity::HttpLinkExpander;
use autoengage::{audit, dashboard, Engine, MemoryStore, Store};
use tracing::{info, warn};
use uuid::Uuid;

use super::Cli;

const LINK_EXPAND_TIMEOUT: Duration = Duration::from_secs(10);
const SIDECAR_TIMEOUT: Duration = Duration::from_secs(180);

/// Drafter used when no API key is configured; every comment fails retryably
/// until one is.
struct UnconfiguredDrafter;

#[async_trait]
impl CommentDrafter for UnconfiguredDrafter {
    async fn draft(&self, _request: &DraftRequest) -> Result<Vec<String>> {
        Err(anyhow!("comment drafting unavailable: OPENROUTER_API_KEY not set"))
    }
}

// ── Wiring ──────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    config::load(cli.config.as_deref())
}

fn require_database_url(cli: &Cli) -> Result<&str> {
    cli.database_url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL is required (set via --database-url or env)"))
}

async fn connect_database(cli: &Cli) -> Result<Database> {
    let url = require_database_url(cli)?;
    Database::connect(url).await
}

/// PostgreSQL when a database URL is given, otherwise an empty in-memory store.
async fn open_store(cli: &Cli) -> Result<Arc<dyn Store>> {
    match cli.database_url.as_deref() {
        Some(url) => Ok(Arc::new(Database::connect(url).await?)),
        None => {
            warn!("DATABASE_URL not set, using in-memory store (state is lost on exit)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_collaborators(cli: &Cli, config: &EngineConfig) -> Result<Collaborators> {
    let sidecar_url = cli
        .sidecar_url
        .as_deref()
        .ok_or_else(|| anyhow!("SIDECAR_URL is required (set via --sidecar-url or env)"))?;
    let sidecar = Arc::new(SidecarClient::new(sidecar_url, SIDECAR_TIMEOUT)?);

    let drafter: Arc<dyn CommentDrafter> = match cli.openrouter_api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            Arc::new(OpenRouterDrafter::new(key.trim(), config.comments.clone())?)
        }
        _ => {
            warn!("OPENROUTER_API_KEY not set, comment actions will fail until it is");
            Arc::new(UnconfiguredDrafter)
        }
    };

    Ok(Collaborators {
        source: sidecar.clone(),
        sink: sidecar.clone(),
        sessions: sidecar,
        drafter,
        expander: Some(Arc::new(HttpLinkExpander::new(LINK_EXPAND_TIMEOUT)?)),
    })
}

async fn build_engine(cli: &Cli) -> Result<Engine> {
    let config = load_config(cli)?;
    let collaborators = build_collaborators(cli, &config)?;
    let store = open_store(cli).await?;
    Ok(Engine::new(store, collaborators, config))
}

// ── Subcommands ─────────────────────────────────────────────────

pub async fn run_serve(cli: &Cli, port: u16) -> Result<()> {
    let engine = Arc::new(build_engine(cli).await?);
    info!(port, "autoengage starting");
    let loops = engine.spawn_loops();
    let result = dashboard::run(engine, port).await;
    for handle in loops {
        handle.abort();
    }
    result
}

pub async fn run_migrate(cli: &Cli) -> Result<()> {
    let db = connect_database(cli).await?;
    db.migrate().await?;
    println!("Migrations applied");
    Ok(())
}

pub async fn run_poll_once(cli: &Cli) -> Result<()> {
    let engine = build_engine(cli).await?;
    let results = engine.poll_once().await?;
    if results.is_empty() {
        println!("No active tracked pages");
    }
    for (page, status) in results {
        match status {
            Some(s) => println!(
                "{:<36}  {:<24}  {:<7}  found={} new={}{}",
                page.id,
                page.name,
                s.status,
                s.posts_found,
                s.new_posts,
                s.error.map(|e| format!("  error={}", e)).unwrap_or_default()
            ),
            None => println!("{:<36}  {:<24}  skipped (poll already running)", page.id, page.name),
        }
    }
    Ok(())
}

pub async fn run_trigger(
    cli: &Cli,
    url: &str,
    org: Option<Uuid>,
    source_label: Option<String>,
) -> Result<()> {
    let engine = build_engine(cli).await?;
    let outcome = engine
        .trigger(&LinkTrigger {
            url: url.to_string(),
            observed_at: None,
            source_label,
            org_id: org,
        })
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub async fn run_export_audit(
    cli: &Cli,
    org: Uuid,
    output: Option<&Path>,
    limit: Option<i64>,
) -> Result<()> {
    let db = connect_database(cli).await?;
    let entries = db
        .list_audit(&audit::AuditFilter {
            org_id: Some(org),
            limit: Some(limit.unwrap_or(10_000)),
            ..Default::default()
        })
        .await?;
    let csv = audit::export_csv(&entries)?;
    match output {
        Some(path) => {
            std::fs::write(path, csv).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {} audit rows to {}", entries.len(), path.display());
        }
        None => print!("{}", csv),
    }
    Ok(())
}

pub fn run_check_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    match cli.config.as_deref() {
        Some(path) => println!("# {} is valid", path.display()),
        None => println!("# no config file given, using defaults"),
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
