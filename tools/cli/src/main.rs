//! ReviewSync CLI - Command line interface for review reconciliation.
//!
//! This tool pushes pending local review data to the sync server, checks
//! the configured token, and inspects sync state and settings.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use reviewsync_common::{EntityType, SyncType};
use reviewsync_remote::{HttpTransport, RemoteConfig};
use reviewsync_store::{setting_keys, sync_enabled, Store, SyncLog};
use reviewsync_sync::{SyncConfig, SyncEngine, SyncResult};

#[derive(Parser)]
#[command(name = "reviewsync")]
#[command(about = "ReviewSync - Push local review data to the sync server")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the local database.
    #[arg(long, env = "REVIEWSYNC_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push every pending record to the server.
    Sync {
        /// Only push this review and its children.
        #[arg(long, value_name = "REVIEW_ID")]
        post_review: Option<String>,

        /// Pushes in flight per entity type.
        #[arg(short, long, default_value_t = 1)]
        concurrency: usize,

        /// Abort the run after this many seconds.
        #[arg(short, long, default_value_t = 600)]
        timeout: u64,
    },

    /// Check the configured API token against the server.
    Verify,

    /// Show pending counts and the latest sync activity.
    Status,

    /// Show sync log entries, newest first.
    Logs {
        /// Number of entries to show.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Restrict to one entity type.
        #[arg(long)]
        entity_type: Option<EntityType>,

        /// Restrict to one entity (requires --entity-type).
        #[arg(long, requires = "entity_type")]
        entity_id: Option<String>,
    },

    /// Read or change settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one setting.
    Get { key: String },

    /// Store a setting.
    Set { key: String, value: String },

    /// Print every setting.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db_path = match cli.db {
        Some(path) => path,
        None => default_db_path()?,
    };
    let store = open_store(&db_path)?;

    match cli.command {
        Commands::Sync {
            post_review,
            concurrency,
            timeout,
        } => cmd_sync(store, post_review.as_deref(), concurrency, timeout).await,

        Commands::Verify => cmd_verify(store).await,

        Commands::Status => cmd_status(&store),

        Commands::Logs {
            limit,
            entity_type,
            entity_id,
        } => cmd_logs(&store, limit, entity_type, entity_id.as_deref()),

        Commands::Config { action } => match action {
            ConfigAction::Get { key } => cmd_config_get(&store, &key),
            ConfigAction::Set { key, value } => cmd_config_set(&store, &key, &value),
            ConfigAction::Show => cmd_config_show(&store),
        },
    }
}

/// `<data dir>/reviewsync/reviewsync.db`
fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data_dir.join("reviewsync").join("reviewsync.db"))
}

fn open_store(path: &Path) -> Result<Arc<Store>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = Store::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Build an engine over `store`, refusing when sync is disabled or unconfigured.
fn build_engine(store: Arc<Store>, config: SyncConfig) -> Result<SyncEngine> {
    if !sync_enabled(store.get_setting(setting_keys::SYNC_ENABLED)?.as_deref()) {
        anyhow::bail!(
            "Sync is disabled. Enable it with: reviewsync config set {} true",
            setting_keys::SYNC_ENABLED
        );
    }
    for key in [setting_keys::SERVER_URL, setting_keys::API_TOKEN] {
        let configured = store
            .get_setting(key)?
            .is_some_and(|value| !value.trim().is_empty());
        if !configured {
            anyhow::bail!("{} is not set. Use: reviewsync config set {} <value>", key, key);
        }
    }

    let transport = HttpTransport::new(RemoteConfig::default(), store.clone())
        .context("Failed to create sync transport")?;
    Ok(SyncEngine::new(store, Arc::new(transport), config))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing current push");
            token.cancel();
        }
    });
}

/// Run reconciliation.
async fn cmd_sync(
    store: Arc<Store>,
    post_review: Option<&str>,
    concurrency: usize,
    timeout: u64,
) -> Result<()> {
    let config = SyncConfig {
        max_concurrency: concurrency.max(1),
        run_timeout: Duration::from_secs(timeout),
        ..SyncConfig::default()
    };
    let engine = build_engine(store, config)?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let result = match post_review {
        Some(review_id) => {
            info!("Syncing review: {}", review_id);
            engine
                .sync_review(review_id, cancel)
                .await
                .context("Post-review sync failed")?
        }
        None => engine.run(SyncType::Manual, cancel).await,
    };

    print_result(&result);

    if !result.success {
        anyhow::bail!(
            "{} of {} records failed to sync",
            result.failed_items,
            result.total_items
        );
    }
    Ok(())
}

fn print_result(result: &SyncResult) {
    println!(
        "Sync {}: {} pushed, {} failed ({} total) in {:.1}s",
        if result.success { "completed" } else { "finished with errors" },
        result.success_items,
        result.failed_items,
        result.total_items,
        result.duration.as_secs_f64()
    );
    for (entity_type, stats) in &result.by_type {
        println!(
            "  {:<12} {:>5} ok {:>5} failed",
            entity_type.as_str(),
            stats.success,
            stats.failed
        );
    }
    if let (Some(kind), Some(message)) = (result.error_type, result.error_message.as_deref()) {
        println!("  First error ({}): {}", kind, message);
    }
    if result.cancelled {
        println!("  Run stopped early; remaining records will sync next time.");
    }
}

/// Check the API token.
async fn cmd_verify(store: Arc<Store>) -> Result<()> {
    let engine = build_engine(store, SyncConfig::default())?;
    let valid = engine
        .verify_token()
        .await
        .context("Could not verify token")?;

    if valid {
        println!("Token is valid.");
        Ok(())
    } else {
        anyhow::bail!("Token was rejected by the server")
    }
}

/// Show pending counts and the most recent log entry.
fn cmd_status(store: &Store) -> Result<()> {
    let enabled = sync_enabled(store.get_setting(setting_keys::SYNC_ENABLED)?.as_deref());
    let server = store.get_setting(setting_keys::SERVER_URL)?;

    println!("Sync:    {}", if enabled { "enabled" } else { "disabled" });
    println!("Server:  {}", server.as_deref().unwrap_or("(not set)"));
    println!();
    println!("Pending:");
    for (entity_type, count) in store.pending_counts()? {
        println!("  {:<12} {:>6}", entity_type.as_str(), count);
    }

    println!();
    match store.recent_logs(1)?.first() {
        Some(log) => println!("Last push: {}", format_log(log)),
        None => println!("Last push: never"),
    }
    Ok(())
}

/// Show sync log entries.
fn cmd_logs(
    store: &Store,
    limit: usize,
    entity_type: Option<EntityType>,
    entity_id: Option<&str>,
) -> Result<()> {
    let logs = match (entity_type, entity_id) {
        (Some(entity_type), Some(id)) => store.logs_for_entity(entity_type, id, limit)?,
        (Some(entity_type), None) => {
            // Overfetch, then filter by type.
            let mut logs = store.recent_logs(limit.saturating_mul(5))?;
            logs.retain(|log| log.entity_type == entity_type);
            logs.truncate(limit);
            logs
        }
        _ => store.recent_logs(limit)?,
    };

    if logs.is_empty() {
        println!("No sync log entries.");
        return Ok(());
    }
    for log in &logs {
        println!("{}", format_log(log));
    }
    Ok(())
}

fn format_log(log: &SyncLog) -> String {
    let outcome = if log.success {
        "ok".to_string()
    } else {
        format!(
            "FAILED [{}] {}",
            log.error_type.map(|t| t.as_str()).unwrap_or("unknown"),
            log.error_message.as_deref().unwrap_or("")
        )
    };
    format!(
        "{} {:<11} {:<12} {} {}",
        log.completed_at.format("%Y-%m-%d %H:%M:%S"),
        log.sync_type.as_str(),
        log.entity_type.as_str(),
        log.entity_id,
        outcome
    )
}

fn mask(key: &str, value: &str) -> String {
    if key != setting_keys::API_TOKEN {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

fn cmd_config_get(store: &Store, key: &str) -> Result<()> {
    match store.get_setting(key)? {
        Some(value) => println!("{}", mask(key, &value)),
        None => anyhow::bail!("{} is not set", key),
    }
    Ok(())
}

fn cmd_config_set(store: &Store, key: &str, value: &str) -> Result<()> {
    if key == setting_keys::SERVER_URL {
        check_server_url(value)?;
    }
    store
        .set_setting(key, value)
        .with_context(|| format!("Failed to save {}", key))?;
    println!("Saved {}.", key);
    Ok(())
}

fn check_server_url(value: &str) -> Result<()> {
    let lower = value.trim().to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        anyhow::bail!("Server URL must start with http:// or https://");
    }
    Ok(())
}

fn cmd_config_show(store: &Store) -> Result<()> {
    let settings = store.all_settings()?;
    if settings.is_empty() {
        println!("No settings stored.");
        return Ok(());
    }
    for (key, value) in settings {
        println!("{} = {}", key, mask(&key, &value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_token_masked() {
        assert_eq!(mask(setting_keys::API_TOKEN, "abcdef123456"), "****3456");
        assert_eq!(mask(setting_keys::API_TOKEN, "abc"), "****");
        assert_eq!(mask(setting_keys::SERVER_URL, "https://x"), "https://x");
    }

    #[test]
    fn test_parse_logs_filters() {
        let cli = Cli::try_parse_from([
            "reviewsync",
            "logs",
            "--entity-type",
            "review-file",
            "--entity-id",
            "rf-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Logs {
                entity_type,
                entity_id,
                ..
            } => {
                assert_eq!(entity_type, Some(EntityType::ReviewFile));
                assert_eq!(entity_id.as_deref(), Some("rf-1"));
            }
            _ => panic!("expected logs command"),
        }
    }

    #[test]
    fn test_build_engine_requires_configuration() {
        let store = Arc::new(Store::in_memory().unwrap());
        assert!(build_engine(store.clone(), SyncConfig::default()).is_err());

        store
            .set_setting(setting_keys::SERVER_URL, "https://sync.example.com")
            .unwrap();
        store.set_setting(setting_keys::API_TOKEN, "token").unwrap();
        assert!(build_engine(store.clone(), SyncConfig::default()).is_ok());

        store
            .set_setting(setting_keys::SYNC_ENABLED, "false")
            .unwrap();
        assert!(build_engine(store, SyncConfig::default()).is_err());
    }
}
