//! Cadence asset fetcher
//!
//! Fetches assets through the resilient loader and writes them to disk.
//!
//! ## Usage
//!
//! ```bash
//! # Fetch two samples with default endpoints
//! cadence-fetch bass/low-e.wav:bass-sample drums/kick.wav:percussion-sample
//!
//! # Custom configuration and output directory
//! cadence-fetch --config engine.json --out ./assets loops/groove.mid:rhythm-track
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cadence_fetch::{AssetKind, AssetLoader, AssetReference, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "cadence-fetch")]
#[command(version)]
#[command(about = "Fetch audio and note-sequence assets with CDN fallback", long_about = None)]
struct Args {
    /// Assets as `id[:category]`; ids ending in .mid/.midi are note sequences
    #[arg(required = true)]
    assets: Vec<String>,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory payloads are written to
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Override the concurrency limit
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_asset(arg: &str) -> AssetReference {
    let (id, category) = match arg.rsplit_once(':') {
        // Leave URLs such as https://host/path intact
        Some((id, category)) if !category.contains('/') => (id, category),
        _ => (arg, "other"),
    };

    let kind = if id.ends_with(".mid") || id.ends_with(".midi") {
        AssetKind::NoteSequence
    } else {
        AssetKind::Audio
    };

    AssetReference::new(id, category).with_kind(kind)
}

fn log_filter(log_level: &str, env: Option<&str>) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(log_level.to_lowercase()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides --log-level
    let filter = log_filter(&args.log_level, std::env::var("RUST_LOG").ok().as_deref());
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(max) = args.max_concurrent {
        config = config.with_max_concurrent(max);
    }

    let loader = AssetLoader::builder(config).build()?;
    let assets: Vec<AssetReference> = args.assets.iter().map(|s| parse_asset(s)).collect();

    tokio::fs::create_dir_all(&args.out).await?;

    let mut failures = 0usize;
    for outcome in loader.load_all(&assets).await {
        match (&outcome.payload, &outcome.error) {
            (Some(payload), _) => {
                let name = outcome
                    .id
                    .rsplit('/')
                    .next()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("asset.bin");
                let path = args.out.join(name);
                tokio::fs::write(&path, payload).await?;
                info!(
                    "{} -> {} ({} bytes from {}, {}ms)",
                    outcome.id,
                    path.display(),
                    payload.len(),
                    outcome.source_used.as_deref().unwrap_or("?"),
                    outcome.elapsed_ms()
                );
            }
            (None, Some(failure)) => {
                failures += 1;
                warn!(
                    "{} failed: {} (attempted {:?}, skipped {:?})",
                    outcome.id, failure.error, failure.attempted_sources, failure.skipped_sources
                );
            }
            (None, None) => failures += 1,
        }
    }

    println!("{}", serde_json::to_string_pretty(&loader.metrics_snapshot())?);

    if failures > 0 {
        return Err(format!("{failures} asset(s) failed to load").into());
    }
    Ok(())
}
