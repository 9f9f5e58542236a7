//! Storage Layer
//!
//! Durable keyed storage for the catalog, pricing, scan history, and the
//! outbound sync queue, backed by SQLite.

pub mod database;

pub use database::Store;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::catalog::PricingSnapshot;

/// A durable record of one accepted frame. Created exactly once per
/// acceptance and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub session_id: String,
    pub catalog_id: String,
    pub observed_at: DateTime<Utc>,
    pub classification_confidence: f32,
    pub pricing_snapshot: PricingSnapshot,
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "deckscan", "DeckScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "deckscan", "DeckScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
