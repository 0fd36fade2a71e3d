use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use stash_cache::{CacheAside, LogSink, Origin, StashConfig};
use stash_store::{ConnectionManager, StoreHandle};
use stash_types::AssetName;
use tokio::sync::watch;
use tracing::debug;

use crate::cli::*;

const DEFAULT_CONFIG: &str = "stash.toml";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.store.root = Some(root);
    }

    match cli.command {
        Command::Resolve(args) => cmd_resolve(config, args).await,
        Command::Ls => with_store(&config, cmd_ls).await,
        Command::Rm(args) => with_store(&config, |store| cmd_rm(store, args.names)).await,
        Command::Stat => with_store(&config, cmd_stat).await,
        Command::Compact => with_store(&config, cmd_compact).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StashConfig> {
    let config = match path {
        Some(path) => StashConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => StashConfig::load(Path::new(DEFAULT_CONFIG))?,
        None => StashConfig::default(),
    };
    debug!(?config, "configuration loaded");
    Ok(config)
}

/// Open the configured store, run `f`, and close the store whatever `f`
/// returned.
async fn with_store<F, Fut>(config: &StashConfig, f: F) -> anyhow::Result<()>
where
    F: FnOnce(StoreHandle) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let manager = ConnectionManager::new(config.store_config());
    let store = config
        .open_store(&manager)
        .await
        .with_context(|| format!("opening store {:?}", config.store.name))?;
    let result = f(store.clone()).await;
    manager.close(&store).await?;
    result
}

fn parse_names(names: &[String]) -> anyhow::Result<Vec<AssetName>> {
    names
        .iter()
        .map(|n| AssetName::new(n.as_str()).with_context(|| format!("invalid asset name {n:?}")))
        .collect()
}

async fn cmd_resolve(mut config: StashConfig, args: ResolveArgs) -> anyhow::Result<()> {
    if let Some(url) = args.base_url {
        config.fetch.base_url = Some(url);
        config.fetch.dir = None;
    }
    if let Some(dir) = args.source_dir {
        config.fetch.dir = Some(dir);
        config.fetch.base_url = None;
    }
    if let Some(retries) = args.retries {
        config.fetch.retry_attempts = retries.max(1);
    }
    if let Some(timeout) = args.timeout {
        config.fetch.timeout_secs = timeout;
    }
    config.validate()?;

    let names = if args.names.is_empty() {
        config.assets.clone()
    } else {
        parse_names(&args.names)?
    };
    let requests = names
        .into_iter()
        .map(|name| {
            let plan = config.plan_for(&name)?;
            Ok((name, plan))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let fetcher = config.fetcher()?;
    let manager = ConnectionManager::new(config.store_config());
    let store = config
        .open_store(&manager)
        .await
        .with_context(|| format!("opening store {:?}", config.store.name))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let cache = Arc::new(
        CacheAside::new(store.clone(), fetcher, Arc::new(LogSink), config.cache_config())
            .with_shutdown(shutdown_rx),
    );
    let total = requests.len();
    let results = cache.resolve_all(requests).await;

    let (mut hits, mut fetched, mut failed) = (0usize, 0usize, 0usize);
    for (name, result) in &results {
        match result {
            Ok(asset) => {
                let origin = match asset.origin {
                    Origin::Store => {
                        hits += 1;
                        "hit".green()
                    }
                    Origin::Network { persisted } => {
                        fetched += 1;
                        if persisted {
                            "fetched".cyan()
                        } else {
                            "fetched (dup)".yellow()
                        }
                    }
                };
                let sizes: Vec<String> = asset
                    .variants
                    .iter()
                    .map(|(tag, bytes)| format!("{tag} {}", human_bytes(bytes.len() as u64)))
                    .collect();
                println!("{} {:<12} {:<14} {}", "✓".green(), name.as_str().bold(), origin, sizes.join(", "));
            }
            Err(e) => {
                failed += 1;
                println!("{} {:<12} {}", "✗".red(), name.as_str().bold(), e.to_string().red());
            }
        }
    }

    println!(
        "\n{} resolved ({} hits, {} fetched, {} transferred), {} failed",
        (hits + fetched).to_string().bold(),
        hits,
        fetched,
        human_bytes(cache.stats().bytes_fetched),
        if failed == 0 { "0".green() } else { failed.to_string().red() },
    );

    manager.close(&store).await?;
    if failed > 0 {
        bail!("{failed} of {total} assets failed");
    }
    Ok(())
}

async fn cmd_ls(store: StoreHandle) -> anyhow::Result<()> {
    let mut cursor = store.list_all().await?;
    let mut count = 0usize;
    while let Some(record) = cursor.next().await? {
        count += 1;
        let variants: Vec<String> = record
            .variants
            .iter()
            .map(|(tag, bytes)| format!("{tag}:{}", human_bytes(bytes.len() as u64)))
            .collect();
        println!(
            "{:<16} {}  {}",
            record.name.as_str().bold(),
            record.digest().short_hex().dimmed(),
            variants.join(" ")
        );
    }
    if count == 0 {
        println!("No records.");
    }
    Ok(())
}

async fn cmd_rm(store: StoreHandle, names: Vec<String>) -> anyhow::Result<()> {
    for name in parse_names(&names)? {
        if store.delete(&name).await? {
            println!("{} deleted {}", "✓".green(), name.as_str().yellow());
        } else {
            println!("  {} not present", name.as_str().dimmed());
        }
    }
    Ok(())
}

async fn cmd_stat(store: StoreHandle) -> anyhow::Result<()> {
    let stats = store.stats().await?;
    let schema = store.schema();
    println!("Store {} (schema v{})", store.name().bold(), store.version());
    println!("  Records:   {}", stats.records.to_string().bold());
    println!("  Payload:   {}", human_bytes(stats.total_bytes));
    match stats.log_bytes {
        Some(bytes) => println!("  Log size:  {}", human_bytes(bytes)),
        None => println!("  Log size:  {}", "in-memory".dimmed()),
    }
    println!("  Key path:  {}", schema.key_path.as_deref().unwrap_or("-").cyan());
    for index in &schema.indexes {
        println!("  Index:     {} -> {} ({})", index.name, index.field, index.field.media_type().dimmed());
    }
    Ok(())
}

async fn cmd_compact(store: StoreHandle) -> anyhow::Result<()> {
    match store.compact().await? {
        Some(report) => println!(
            "{} Compacted {} records: {} -> {}",
            "✓".green().bold(),
            report.records,
            human_bytes(report.before_bytes),
            human_bytes(report.after_bytes)
        ),
        None => println!("In-memory store; nothing to compact."),
    }
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
