//! Deck catalog
//!
//! Catalog entries are created by bulk import from a JSON seed file and
//! are immutable afterwards. Each entry carries a visual fingerprint
//! derived from its reference back-image, unique across the catalog.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

use crate::storage::Store;

/// A known deck design in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Catalog identifier (also the classifier label)
    pub id: String,
    /// Display name
    pub name: String,
    /// Manufacturer name, used for text verification
    pub manufacturer: String,
    /// Casino name, if the deck is casino-branded
    pub casino: Option<String>,
    /// Visual fingerprint of the reference back-image, unique per entry
    pub fingerprint: String,
}

/// Active pricing for a catalog entry (at most one per entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRecord {
    pub id: String,
    pub catalog_id: String,
    /// Non-negative buy price
    pub buy_price: f64,
    /// Non-negative sell price
    pub sell_price: f64,
    pub last_updated: DateTime<Utc>,
    pub confidence_score: f64,
    pub data_source: String,
}

impl PricingRecord {
    /// Zero-priced placeholder used when no pricing exists for a
    /// classified deck. A lookup miss must never block the pipeline.
    pub fn default_for(catalog_id: &str) -> Self {
        Self {
            id: format!("pricing-{catalog_id}"),
            catalog_id: catalog_id.to_string(),
            buy_price: 0.0,
            sell_price: 0.0,
            last_updated: Utc::now(),
            confidence_score: 0.0,
            data_source: "default".to_string(),
        }
    }

    /// Whether this record is older than the given freshness window.
    pub fn is_stale(&self, staleness_hours: i64, now: DateTime<Utc>) -> bool {
        now - self.last_updated > chrono::Duration::hours(staleness_hours)
    }
}

/// Buy/sell copy taken at evaluation time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSnapshot {
    pub buy_price: f64,
    pub sell_price: f64,
}

impl PricingSnapshot {
    pub fn of(record: &PricingRecord) -> Self {
        Self {
            buy_price: record.buy_price,
            sell_price: record.sell_price,
        }
    }

    pub fn profit(&self) -> f64 {
        self.sell_price - self.buy_price
    }
}

/// One entry of the JSON catalog seed file
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSeedEntry {
    pub id: String,
    pub name: String,
    pub manufacturer: String,
    #[serde(default)]
    pub casino: Option<String>,
    /// Reference back-image path, relative to the seed file
    pub back_image: String,
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default)]
    pub sell_price: Option<f64>,
}

/// Compute the visual fingerprint of a reference back-image.
///
/// The image is reduced to a 16x16 grayscale thumbnail before hashing so
/// the fingerprint is stable across minor resolution differences of the
/// same source asset.
pub fn fingerprint_image(img: &image::DynamicImage) -> String {
    let thumb = image::imageops::resize(
        &img.to_luma8(),
        16,
        16,
        image::imageops::FilterType::Triangle,
    );

    let mut hasher = Sha256::new();
    hasher.update(thumb.as_raw());
    format!("{:x}", hasher.finalize())
}

/// Compute a fingerprint from a back-image file on disk.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let img = image::open(path)
        .with_context(|| format!("failed to load back-image {:?}", path))?;
    Ok(fingerprint_image(&img))
}

/// Bulk-import a catalog seed file into the store.
///
/// Returns the number of imported entries. A duplicate fingerprint or id
/// fails the import with a constraint violation rather than silently
/// overwriting an existing entry.
pub fn import_catalog(store: &Store, seed_path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(seed_path)
        .with_context(|| format!("failed to read catalog seed {:?}", seed_path))?;
    let seed: Vec<CatalogSeedEntry> =
        serde_json::from_str(&content).context("invalid catalog seed file")?;

    let base_dir = seed_path.parent().unwrap_or_else(|| Path::new("."));
    let mut imported = 0;

    for entry in seed {
        let fingerprint = fingerprint_file(&base_dir.join(&entry.back_image))?;

        store.insert_catalog_entry(&CatalogEntry {
            id: entry.id.clone(),
            name: entry.name,
            manufacturer: entry.manufacturer,
            casino: entry.casino,
            fingerprint,
        })?;

        if let (Some(buy), Some(sell)) = (entry.buy_price, entry.sell_price) {
            store.upsert_pricing(&PricingRecord {
                id: format!("pricing-{}", entry.id),
                catalog_id: entry.id,
                buy_price: buy,
                sell_price: sell,
                last_updated: Utc::now(),
                confidence_score: 1.0,
                data_source: "catalog".to_string(),
            })?;
        }

        imported += 1;
    }

    info!("Imported {} catalog entries from {:?}", imported, seed_path);
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let img = image::DynamicImage::ImageLuma8(image::GrayImage::from_fn(
            64,
            64,
            |x, y| image::Luma([((x * 3 + y * 7) % 256) as u8]),
        ));

        assert_eq!(fingerprint_image(&img), fingerprint_image(&img));
    }

    #[test]
    fn test_fingerprint_differs_for_different_images() {
        let a = image::DynamicImage::ImageLuma8(image::GrayImage::from_fn(
            64,
            64,
            |x, _| image::Luma([(x % 256) as u8]),
        ));
        let b = image::DynamicImage::ImageLuma8(image::GrayImage::from_fn(
            64,
            64,
            |_, y| image::Luma([(y % 256) as u8]),
        ));

        assert_ne!(fingerprint_image(&a), fingerprint_image(&b));
    }

    #[test]
    fn test_fingerprint_stable_across_resolutions() {
        // Same gradient rendered at two sizes reduces to the same thumbnail
        let small = image::DynamicImage::ImageLuma8(image::GrayImage::from_fn(
            16,
            16,
            |x, _| image::Luma([(x * 16) as u8]),
        ));
        let resized = small.resize_exact(16, 16, image::imageops::FilterType::Triangle);

        assert_eq!(fingerprint_image(&small), fingerprint_image(&resized));
    }

    #[test]
    fn test_default_pricing_is_zero_priced() {
        let record = PricingRecord::default_for("bellagio-88");
        assert_eq!(record.catalog_id, "bellagio-88");
        assert_eq!(record.buy_price, 0.0);
        assert_eq!(record.sell_price, 0.0);
        assert_eq!(record.data_source, "default");
    }

    #[test]
    fn test_staleness_window() {
        let now = Utc::now();
        let mut record = PricingRecord::default_for("x");

        record.last_updated = now - chrono::Duration::hours(23);
        assert!(!record.is_stale(24, now));

        record.last_updated = now - chrono::Duration::hours(25);
        assert!(record.is_stale(24, now));
    }

    #[test]
    fn test_snapshot_profit() {
        let snapshot = PricingSnapshot {
            buy_price: 2.0,
            sell_price: 12.0,
        };
        assert!((snapshot.profit() - 10.0).abs() < 1e-9);
    }
}
