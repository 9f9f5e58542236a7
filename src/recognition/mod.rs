//! Recognition Fusion Engine
//!
//! Turns a raw frame into a verified, priced recognition result:
//! classifier output and OCR output are evaluated independently on the
//! same frame and fused, then pricing is attached from the local store.
//! A pricing miss never blocks the pipeline; a stale hit fires a refresh
//! task without blocking either.

pub mod classifier;
pub mod frame;
pub mod ocr;
pub mod preprocess;

pub use classifier::{argmax, Classifier, OnnxClassifier};
pub use frame::Frame;
pub use ocr::{NoOpRecognizer, TextRecognizer};
pub use preprocess::PreprocessConfig;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::{CatalogEntry, PricingRecord, PricingSnapshot};
use crate::error::{Result, ScanError};
use crate::storage::Store;
use crate::sync::SyncTaskKind;

/// Outcome of the OCR cross-check against the expected catalog names.
///
/// Manufacturer identity is load-bearing; the casino name only
/// corroborates. A casino match without a manufacturer match cannot lift
/// the score above the unverified floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextVerification {
    pub manufacturer_match: bool,
    pub casino_match: bool,
    pub verification_score: f32,
}

impl TextVerification {
    /// No OCR evidence available (empty text, or replayed history).
    pub fn unverified() -> Self {
        Self {
            manufacturer_match: false,
            casino_match: false,
            verification_score: 0.3,
        }
    }
}

/// Score OCR text against the expected manufacturer and casino names
/// using case-insensitive containment.
pub fn verify_text(text: &str, manufacturer: &str, casino: Option<&str>) -> TextVerification {
    let text = text.to_lowercase();

    let manufacturer_match =
        !manufacturer.is_empty() && text.contains(&manufacturer.to_lowercase());
    let casino_match = casino
        .map(|c| !c.is_empty() && text.contains(&c.to_lowercase()))
        .unwrap_or(false);

    let verification_score = match (manufacturer_match, casino_match) {
        (true, true) => 1.0,
        (true, false) => 0.7,
        (false, _) => 0.3,
    };

    TextVerification {
        manufacturer_match,
        casino_match,
        verification_score,
    }
}

/// A verified, priced identification of one frame. Transient: only
/// accepted results become scan records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub catalog_id: String,
    pub name: String,
    pub manufacturer: String,
    pub casino: Option<String>,
    pub classification_confidence: f32,
    pub text_verification: TextVerification,
    pub pricing_snapshot: PricingSnapshot,
    pub observed_at: DateTime<Utc>,
}

/// Fuses classifier and OCR output into a single recognition result.
pub struct RecognitionEngine {
    classifier: Box<dyn Classifier>,
    text_recognizer: Box<dyn TextRecognizer>,
    preprocess: PreprocessConfig,
    store: Arc<Store>,
    staleness_hours: i64,
}

impl RecognitionEngine {
    pub fn new(
        classifier: Box<dyn Classifier>,
        text_recognizer: Box<dyn TextRecognizer>,
        preprocess: PreprocessConfig,
        store: Arc<Store>,
        staleness_hours: i64,
    ) -> Self {
        Self {
            classifier,
            text_recognizer,
            preprocess,
            store,
            staleness_hours,
        }
    }

    /// Evaluate one frame. Classifier or OCR backend failure surfaces as
    /// `RecognitionUnavailable`; the caller skips the frame and the
    /// session continues.
    pub fn evaluate(&mut self, frame: &Frame) -> Result<RecognitionResult> {
        // Tensor lives only for the classify call
        let probabilities = {
            let tensor = preprocess::preprocess_for_classification(
                &frame.data,
                frame.width,
                frame.height,
                &self.preprocess,
            );
            self.classifier.classify(&tensor)?
        };

        let (index, confidence) = argmax(&probabilities).ok_or_else(|| {
            ScanError::RecognitionUnavailable("classifier returned no probabilities".to_string())
        })?;
        let catalog_id = self
            .classifier
            .labels()
            .get(index)
            .cloned()
            .ok_or_else(|| {
                ScanError::RecognitionUnavailable(format!(
                    "model output index {index} outside the label set"
                ))
            })?;

        let text = self.text_recognizer.recognize_text(frame)?;

        let entry = self
            .store
            .get_catalog_entry(&catalog_id)?
            .unwrap_or_else(|| CatalogEntry {
                id: catalog_id.clone(),
                name: catalog_id.clone(),
                manufacturer: String::new(),
                casino: None,
                fingerprint: String::new(),
            });

        let verification = verify_text(&text, &entry.manufacturer, entry.casino.as_deref());
        let pricing = self.attach_pricing(&catalog_id)?;

        debug!(
            "Evaluated frame: {} conf={:.3} verification={:.1}",
            catalog_id, confidence, verification.verification_score
        );

        Ok(RecognitionResult {
            catalog_id,
            name: entry.name,
            manufacturer: entry.manufacturer,
            casino: entry.casino,
            classification_confidence: confidence,
            text_verification: verification,
            pricing_snapshot: PricingSnapshot::of(&pricing),
            observed_at: frame.captured_at,
        })
    }

    /// Look up pricing for the classified deck. A miss yields the
    /// zero-priced default; a stale hit enqueues a refresh task on every
    /// lookup (no dedup against already-pending tasks) without blocking
    /// or failing the evaluation.
    fn attach_pricing(&self, catalog_id: &str) -> Result<PricingRecord> {
        match self.store.get_pricing_for(catalog_id)? {
            Some(record) => {
                if record.is_stale(self.staleness_hours, Utc::now()) {
                    if let Err(e) = self
                        .store
                        .enqueue_task(SyncTaskKind::PricingRefresh, catalog_id)
                    {
                        warn!("Failed to enqueue pricing refresh for {}: {}", catalog_id, e);
                    }
                }
                Ok(record)
            }
            None => {
                debug!("No pricing for {}, using zero-priced default", catalog_id);
                Ok(PricingRecord::default_for(catalog_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    /// Classifier stub returning a fixed probability vector.
    pub(crate) struct StubClassifier {
        pub labels: Vec<String>,
        pub probabilities: Vec<f32>,
        pub fail: bool,
    }

    impl Classifier for StubClassifier {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn classify(&mut self, _input: &Array4<f32>) -> Result<Vec<f32>> {
            if self.fail {
                return Err(ScanError::RecognitionUnavailable("stub offline".to_string()));
            }
            Ok(self.probabilities.clone())
        }
    }

    /// OCR stub returning fixed text.
    pub(crate) struct StubRecognizer(pub String);

    impl TextRecognizer for StubRecognizer {
        fn recognize_text(&mut self, _frame: &Frame) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn engine(
        store: Arc<Store>,
        labels: Vec<&str>,
        probabilities: Vec<f32>,
        text: &str,
    ) -> RecognitionEngine {
        RecognitionEngine::new(
            Box::new(StubClassifier {
                labels: labels.into_iter().map(str::to_string).collect(),
                probabilities,
                fail: false,
            }),
            Box::new(StubRecognizer(text.to_string())),
            PreprocessConfig::with_geometry(8, 8),
            store,
            24,
        )
    }

    fn bellagio_store() -> Arc<Store> {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_catalog_entry(&CatalogEntry {
                id: "bellagio-88".to_string(),
                name: "Bellagio 88".to_string(),
                manufacturer: "Bee".to_string(),
                casino: Some("Bellagio".to_string()),
                fingerprint: "fp-bellagio".to_string(),
            })
            .unwrap();
        Arc::new(store)
    }

    fn test_frame() -> Frame {
        Frame::new(vec![200u8; 8 * 8 * 4], 8, 8)
    }

    #[test]
    fn test_verification_scoring_policy() {
        let both = verify_text("club special bee bellagio casino", "Bee", Some("Bellagio"));
        assert!(both.manufacturer_match && both.casino_match);
        assert!((both.verification_score - 1.0).abs() < 0.001);

        let manufacturer_only = verify_text("bee playing cards", "Bee", Some("Bellagio"));
        assert!(manufacturer_only.manufacturer_match);
        assert!(!manufacturer_only.casino_match);
        assert!((manufacturer_only.verification_score - 0.7).abs() < 0.001);

        // Casino alone cannot lift the score
        let casino_only = verify_text("bellagio las vegas", "Bee", Some("Bellagio"));
        assert!(!casino_only.manufacturer_match);
        assert!(casino_only.casino_match);
        assert!((casino_only.verification_score - 0.3).abs() < 0.001);

        let neither = verify_text("unreadable smudge", "Bee", Some("Bellagio"));
        assert!((neither.verification_score - 0.3).abs() < 0.001);
    }

    #[test]
    fn test_verification_is_case_insensitive() {
        let v = verify_text("BEE BELLAGIO", "Bee", Some("Bellagio"));
        assert!((v.verification_score - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_verification_empty_names_never_match() {
        let v = verify_text("anything at all", "", None);
        assert!(!v.manufacturer_match);
        assert!(!v.casino_match);
    }

    #[test]
    fn test_evaluate_fuses_classification_and_text() {
        let store = bellagio_store();
        let mut engine = engine(
            store,
            vec!["bellagio-88"],
            vec![0.91],
            "bee bellagio back design",
        );

        let result = engine.evaluate(&test_frame()).unwrap();
        assert_eq!(result.catalog_id, "bellagio-88");
        assert_eq!(result.manufacturer, "Bee");
        assert!((result.classification_confidence - 0.91).abs() < 0.001);
        assert!((result.text_verification.verification_score - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_evaluate_unknown_pricing_yields_zero_default() {
        let store = bellagio_store();
        let mut engine = engine(store, vec!["bellagio-88"], vec![0.9], "");

        let result = engine.evaluate(&test_frame()).unwrap();
        assert_eq!(result.pricing_snapshot.buy_price, 0.0);
        assert_eq!(result.pricing_snapshot.sell_price, 0.0);
    }

    #[test]
    fn test_evaluate_attaches_pricing_snapshot() {
        let store = bellagio_store();
        let mut pricing = PricingRecord::default_for("bellagio-88");
        pricing.buy_price = 2.0;
        pricing.sell_price = 12.0;
        pricing.data_source = "catalog".to_string();
        store.upsert_pricing(&pricing).unwrap();

        let mut engine = engine(store, vec!["bellagio-88"], vec![0.9], "");
        let result = engine.evaluate(&test_frame()).unwrap();
        assert_eq!(result.pricing_snapshot.buy_price, 2.0);
        assert_eq!(result.pricing_snapshot.sell_price, 12.0);
    }

    #[test]
    fn test_stale_pricing_enqueues_refresh_on_every_lookup() {
        let store = bellagio_store();
        let mut pricing = PricingRecord::default_for("bellagio-88");
        pricing.last_updated = Utc::now() - chrono::Duration::hours(48);
        store.upsert_pricing(&pricing).unwrap();

        let mut engine = engine(store.clone(), vec!["bellagio-88"], vec![0.9], "");
        engine.evaluate(&test_frame()).unwrap();
        engine.evaluate(&test_frame()).unwrap();

        // one task per stale lookup, not deduplicated
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending
            .iter()
            .all(|t| t.kind == SyncTaskKind::PricingRefresh && t.payload_key == "bellagio-88"));
    }

    #[test]
    fn test_fresh_pricing_enqueues_nothing() {
        let store = bellagio_store();
        let mut pricing = PricingRecord::default_for("bellagio-88");
        pricing.last_updated = Utc::now() - chrono::Duration::hours(1);
        store.upsert_pricing(&pricing).unwrap();

        let mut engine = engine(store.clone(), vec!["bellagio-88"], vec![0.9], "");
        engine.evaluate(&test_frame()).unwrap();

        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_classifier_failure_is_recognition_unavailable() {
        let store = bellagio_store();
        let mut engine = RecognitionEngine::new(
            Box::new(StubClassifier {
                labels: vec!["bellagio-88".to_string()],
                probabilities: vec![],
                fail: true,
            }),
            Box::new(StubRecognizer(String::new())),
            PreprocessConfig::with_geometry(8, 8),
            store,
            24,
        );

        let err = engine.evaluate(&test_frame()).unwrap_err();
        assert!(matches!(err, ScanError::RecognitionUnavailable(_)));
    }

    #[test]
    fn test_tie_break_prefers_lowest_index() {
        let store = bellagio_store();
        store
            .insert_catalog_entry(&CatalogEntry {
                id: "aria-blue".to_string(),
                name: "Aria Blue".to_string(),
                manufacturer: "Bicycle".to_string(),
                casino: Some("Aria".to_string()),
                fingerprint: "fp-aria".to_string(),
            })
            .unwrap();

        let mut engine = engine(
            store,
            vec!["bellagio-88", "aria-blue"],
            vec![0.5, 0.5],
            "",
        );
        let result = engine.evaluate(&test_frame()).unwrap();
        assert_eq!(result.catalog_id, "bellagio-88");
    }
}
