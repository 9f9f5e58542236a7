//! DeckScan - Offline-first collectible deck scanner
//!
//! Recognizes collectible playing-card decks from captured frames,
//! cross-verifies with OCR text, attaches locally cached pricing, and
//! aggregates accepted scans into priced sessions. Everything works
//! offline; pricing refreshes and history uploads queue up and drain
//! when connectivity allows.

mod catalog;
mod config;
mod error;
mod export;
mod recognition;
mod session;
mod storage;
mod sync;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::AppConfig;
use crate::export::ExportFormat;
use crate::recognition::{Frame, NoOpRecognizer, OnnxClassifier, PreprocessConfig, RecognitionEngine};
use crate::session::{FrameOutcome, SessionAggregator};
use crate::storage::Store;
use crate::sync::{HttpRemoteService, SyncProcessor};

/// DeckScan - Offline-first collectible deck scanner
#[derive(Parser, Debug)]
#[command(name = "deckscan")]
#[command(about = "Recognize, price, and track collectible playing-card decks")]
struct Args {
    /// Database file path (defaults to the platform data directory)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import catalog entries (and optional pricing) from a JSON seed file
    Import {
        /// Path to the seed file
        seed: PathBuf,
    },
    /// Run a scanning session over a directory of frame images
    Scan {
        /// Directory of frame images, processed in name order
        frames: PathBuf,

        /// ONNX classifier model (overrides config)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Label file, one catalog id per line (overrides config)
        #[arg(long)]
        labels: Option<PathBuf>,
    },
    /// Dispatch pending sync tasks to the remote service
    Drain,
    /// Export a past session from scan history
    Export {
        /// Session id to export
        session_id: String,

        /// Output format: csv or json
        #[arg(long, default_value = "csv")]
        format: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let app_config = load_or_create_config();

    let store = Arc::new(open_store(&args, &app_config)?);

    match args.command {
        Command::Import { seed } => run_import(&store, &seed),
        Command::Scan {
            frames,
            model,
            labels,
        } => run_scan(store, &app_config, &frames, model, labels),
        Command::Drain => run_drain(store, &app_config),
        Command::Export {
            session_id,
            format,
            output,
        } => run_export(&store, &session_id, &format, output),
    }
}

/// Load configuration from file or create default
fn load_or_create_config() -> AppConfig {
    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn open_store(args: &Args, app_config: &AppConfig) -> Result<Store> {
    let path = if let Some(path) = &args.database {
        path.clone()
    } else if let Some(path) = &app_config.storage.database_path {
        PathBuf::from(path)
    } else {
        storage::get_data_dir()?.join("deckscan.db")
    };

    info!("Opening database at {:?}", path);
    Ok(Store::open(&path)?)
}

fn run_import(store: &Store, seed: &Path) -> Result<()> {
    let imported = catalog::import_catalog(store, seed)
        .with_context(|| format!("failed to import catalog from {seed:?}"))?;
    println!("Imported {} catalog entries", imported);
    Ok(())
}

fn run_scan(
    store: Arc<Store>,
    app_config: &AppConfig,
    frames_dir: &Path,
    model: Option<PathBuf>,
    labels: Option<PathBuf>,
) -> Result<()> {
    let recognition = &app_config.recognition;
    let model_path = model
        .or_else(|| recognition.model_path.as_ref().map(PathBuf::from))
        .context("no classifier model configured; pass --model or set recognition.model_path")?;
    let labels_path = labels
        .or_else(|| recognition.labels_path.as_ref().map(PathBuf::from))
        .context("no label file configured; pass --labels or set recognition.labels_path")?;

    let classifier = OnnxClassifier::new(&model_path, &labels_path)?;
    let engine = RecognitionEngine::new(
        Box::new(classifier),
        Box::new(NoOpRecognizer),
        PreprocessConfig::with_geometry(recognition.input_width, recognition.input_height),
        store.clone(),
        app_config.pricing.staleness_hours,
    );
    let aggregator = SessionAggregator::new(engine, store, recognition.acceptance_threshold);

    let mut frame_paths: Vec<PathBuf> = std::fs::read_dir(frames_dir)
        .with_context(|| format!("failed to read frame directory {frames_dir:?}"))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    frame_paths.sort();

    if frame_paths.is_empty() {
        bail!("no frame images found in {frames_dir:?}");
    }

    let session_id = aggregator.start()?;
    println!("Session {} started ({} frames)", session_id, frame_paths.len());

    for path in &frame_paths {
        let frame = match Frame::from_file(path) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping unreadable frame {:?}: {}", path, e);
                continue;
            }
        };

        match aggregator.submit_frame(&frame) {
            Ok(FrameOutcome::Accepted(result)) => {
                println!(
                    "  {} -> {} (confidence {:.1}%, sell {:.2})",
                    path.display(),
                    result.name,
                    result.classification_confidence * 100.0,
                    result.pricing_snapshot.sell_price
                );
            }
            Ok(FrameOutcome::Discarded { confidence }) => {
                println!(
                    "  {} -> discarded (confidence {:.1}%)",
                    path.display(),
                    confidence * 100.0
                );
            }
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => warn!("Frame {:?} failed: {}", path, e),
        }
    }

    let summary = aggregator.stop()?;
    println!();
    println!("Session {} complete:", summary.session_id);
    println!("  Decks:      {}", summary.total_decks);
    println!("  Buy total:  {:.2}", summary.total_buy_value);
    println!("  Sell total: {:.2}", summary.total_sell_value);
    println!("  Profit:     {:.2}", summary.total_profit);
    println!("  Avg margin: {}", summary.average_margin);
    if let Some(best) = &summary.most_profitable {
        println!(
            "  Best find:  {} (profit {:.2})",
            best.name,
            best.pricing_snapshot.profit()
        );
    }
    Ok(())
}

fn run_drain(store: Arc<Store>, app_config: &AppConfig) -> Result<()> {
    let remote = HttpRemoteService::new(&app_config.sync.endpoint, app_config.sync.timeout_secs)?;
    let processor = SyncProcessor::new(store, Box::new(remote));

    let dispatched = processor.drain()?;
    println!("Dispatched {} sync tasks", dispatched);
    Ok(())
}

fn run_export(store: &Store, session_id: &str, format: &str, output: Option<PathBuf>) -> Result<()> {
    let format = ExportFormat::parse(format)
        .with_context(|| format!("unknown export format '{format}' (expected csv or json)"))?;

    let summary = export::replay_session(store, session_id)?;
    if summary.total_decks == 0 {
        warn!("Session {} has no recorded scans", session_id);
    }

    match output {
        Some(path) => {
            export::export_to_file(&summary, format, &path)?;
            println!("Exported session {} to {}", session_id, path.display());
        }
        None => print!("{}", export::render(&summary, format)?),
    }
    Ok(())
}
