use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info, warn};

mod config;

use feedrelay_core::SourceRef;
use feedrelay_messaging::SpoolMessaging;
use feedrelay_pipeline::resolve::resolve_one;
use feedrelay_pipeline::{Forwarder, ForwarderConfig, RunOutcome};
use feedrelay_store::{CheckpointStore, FingerprintCache, RunLock};

use crate::config::AppConfig;

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML, or a .env file)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Print run reports and command output as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward new items once (default)
    Run,
    /// Forward repeatedly until interrupted
    Watch {
        /// Override the configured interval, e.g. "30s" or "5m"
        #[arg(long, value_parser = parse_interval)]
        interval: Option<Duration>,
    },
    /// Print the channel id behind each identifier
    Resolve {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Show checkpoints, lock state and fingerprint cache size
    Status,
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(raw).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() {
    let filter = std::env::var("FEEDRELAY_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = match AppConfig::new(cli.config.clone()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let forwarder = build_forwarder(&config).await;
            if !run_and_print(&forwarder, cli.json).await {
                std::process::exit(1);
            }
        }
        Commands::Watch { interval } => {
            let forwarder = build_forwarder(&config).await;
            watch(&forwarder, interval.unwrap_or(config.watch_interval), cli.json).await;
        }
        Commands::Resolve { identifiers } => {
            let spool = open_spool(&config.spool_dir).await;
            if !resolve_identifiers(&spool, &identifiers, cli.json).await {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let forwarder_config = validated(&config);
            if let Err(err) = print_status(&forwarder_config, cli.json) {
                error!("status failed: {err}");
                std::process::exit(1);
            }
        }
    }
}

fn validated(config: &AppConfig) -> ForwarderConfig {
    match config.forwarder_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("invalid config: {err}");
            std::process::exit(1);
        }
    }
}

async fn open_spool(dir: &Path) -> SpoolMessaging {
    match SpoolMessaging::open(dir).await {
        Ok(spool) => spool,
        Err(err) => {
            error!("failed to open spool at {}: {err}", dir.display());
            std::process::exit(1);
        }
    }
}

async fn build_forwarder(config: &AppConfig) -> Forwarder<SpoolMessaging> {
    let forwarder_config = validated(config);
    let spool = open_spool(&config.spool_dir).await;
    match Forwarder::new(spool, forwarder_config) {
        Ok(forwarder) => forwarder,
        Err(err) => {
            error!("failed to initialise forwarder: {err}");
            std::process::exit(1);
        }
    }
}

/// Runs once and prints the outcome. Returns false on a fatal error.
async fn run_and_print(forwarder: &Forwarder<SpoolMessaging>, json: bool) -> bool {
    match forwarder.run_once().await {
        Ok(outcome) => {
            if json {
                match serde_json::to_string_pretty(&outcome) {
                    Ok(text) => println!("{text}"),
                    Err(err) => warn!("failed to encode run report: {err}"),
                }
            }
            if let RunOutcome::Completed(report) = &outcome {
                if report.has_failures() {
                    warn!(
                        source_failures = report.source_failures.len(),
                        delivery_failures = report.delivery_failures.len(),
                        "run completed with contained failures"
                    );
                }
            }
            true
        }
        Err(err) => {
            error!("run failed: {err}");
            false
        }
    }
}

async fn watch(forwarder: &Forwarder<SpoolMessaging>, interval: Duration, json: bool) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = flag::register(SIGTERM, Arc::clone(&shutdown));
    let _ = flag::register(SIGINT, Arc::clone(&shutdown));
    info!(interval = ?interval, "watching sources");

    loop {
        let started = Instant::now();
        // Fatal errors end only this iteration; the next one starts afresh.
        run_and_print(forwarder, json).await;

        let next = started + interval;
        while Instant::now() < next {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, leaving watch loop");
                return;
            }
            tokio::time::sleep(SHUTDOWN_POLL.min(next.saturating_duration_since(Instant::now())))
                .await;
        }
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested, leaving watch loop");
            return;
        }
    }
}

async fn resolve_identifiers(spool: &SpoolMessaging, identifiers: &[String], json: bool) -> bool {
    let mut ok = true;
    let mut resolved = serde_json::Map::new();
    for raw in identifiers {
        let reference = match raw.parse::<SourceRef>() {
            Ok(reference) => reference,
            Err(err) => {
                error!(identifier = %raw, "{err}");
                ok = false;
                continue;
            }
        };
        match resolve_one(spool, &reference).await {
            Ok(channel) => {
                if json {
                    resolved.insert(raw.clone(), serde_json::json!(channel));
                } else {
                    println!("{raw}\t{channel}");
                }
            }
            Err(err) => {
                error!(identifier = %raw, "could not resolve: {err}");
                ok = false;
            }
        }
    }
    if json {
        println!("{}", serde_json::Value::Object(resolved));
    }
    ok
}

fn print_status(config: &ForwarderConfig, json: bool) -> Result<(), String> {
    let checkpoints = CheckpointStore::open(config.checkpoint_dir())
        .and_then(|store| store.list())
        .map_err(|err| err.to_string())?;
    let lock = RunLock::new(config.lock_path());
    let holder = lock.holder();
    let locked = lock.is_held();
    let cached = config.dedup.as_ref().and_then(|dedup| {
        let path = config.fingerprint_path();
        path.exists()
            .then(|| FingerprintCache::load(&path, dedup.cache_size).ok())
            .flatten()
            .map(|cache| cache.size())
    });

    if json {
        let value = serde_json::json!({
            "checkpoints": checkpoints
                .iter()
                .map(|(channel, id)| (channel.to_string(), serde_json::json!(id)))
                .collect::<serde_json::Map<_, _>>(),
            "locked": locked,
            "lock_holder": holder,
            "fingerprints": cached,
        });
        println!("{value}");
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("no checkpoints in {}", config.checkpoint_dir().display());
    }
    for (channel, id) in &checkpoints {
        println!("checkpoint {channel}\t{id}");
    }
    match (&holder, locked) {
        (Some(owner), _) => println!(
            "lock held by pid {} run {} for {}s",
            owner.pid,
            owner.run_id,
            owner.age_secs()
        ),
        (None, true) => println!("lock marker present at {}", config.lock_path().display()),
        (None, false) => println!("lock free"),
    }
    if let Some(count) = cached {
        println!("fingerprints cached\t{count}");
    }
    Ok(())
}
