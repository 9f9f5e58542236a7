//! Application Configuration
//!
//! Scanner settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Recognition settings
    pub recognition: RecognitionConfig,
    /// Pricing settings
    pub pricing: PricingConfig,
    /// Remote sync settings
    pub sync: SyncConfig,
    /// Storage settings
    pub storage: StorageConfig,
}

/// Recognition-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Path to the deck classifier ONNX model
    pub model_path: Option<String>,
    /// Path to the label file (one catalog id per line, model output order)
    pub labels_path: Option<String>,
    /// Classifier input width in pixels
    pub input_width: u32,
    /// Classifier input height in pixels
    pub input_height: u32,
    /// Minimum classification confidence for a frame to be accepted
    /// into a session. Results at or below this value are discarded.
    pub acceptance_threshold: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            labels_path: None,
            input_width: 224,
            input_height: 224,
            acceptance_threshold: 0.75,
        }
    }
}

/// Pricing-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Freshness window in hours; pricing older than this triggers a
    /// refresh task on lookup
    pub staleness_hours: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self { staleness_hours: 24 }
    }
}

/// Remote sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the remote pricing/sync service
    pub endpoint: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deckscan.example/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path override (defaults to the platform data dir)
    pub database_path: Option<String>,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
