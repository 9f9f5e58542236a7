//! Deck classifier backend
//!
//! The trained model is an opaque collaborator: image tensor in,
//! probability vector over a fixed label set out. The ONNX implementation
//! loads the model and its label file from disk; tests inject
//! deterministic stubs through the same trait.

use anyhow::Context;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::info;

use crate::error::{Result, ScanError};

/// Capability interface for the deck classifier.
pub trait Classifier: Send {
    /// Catalog ids in model output order.
    fn labels(&self) -> &[String];

    /// Probability vector over the label set for one preprocessed frame.
    /// Deterministic for a given image and model version.
    fn classify(&mut self, input: &Array4<f32>) -> Result<Vec<f32>>;
}

/// Select the winning label index and its probability. Exact ties are
/// broken toward the lowest index (stable, deterministic).
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &p) in probabilities.iter().enumerate() {
        match best {
            Some((_, bp)) if p <= bp => {}
            _ => best = Some((i, p)),
        }
    }
    best
}

/// ONNX Runtime classifier
pub struct OnnxClassifier {
    session: Session,
    input_name: String,
    labels: Vec<String>,
}

impl OnnxClassifier {
    /// Load the model and its label file. A failure here is fatal to the
    /// pipeline instance.
    pub fn new(model_path: &Path, labels_path: &Path) -> Result<Self> {
        info!("Loading deck classifier from {:?}", model_path);

        let session = Session::builder()
            .and_then(|b| {
                b.with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(ort::Error::from)
            })
            .and_then(|b| b.with_intra_threads(4).map_err(ort::Error::from))
            .and_then(|mut b| b.commit_from_file(model_path))
            .map_err(|e| ScanError::Initialization(format!("failed to load model: {e}")))?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| ScanError::Initialization("model has no inputs".to_string()))?;

        let labels = load_labels(labels_path)
            .map_err(|e| ScanError::Initialization(format!("failed to load labels: {e}")))?;

        info!(
            "Classifier loaded: input '{}', {} labels",
            input_name,
            labels.len()
        );

        Ok(Self {
            session,
            input_name,
            labels,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&mut self, input: &Array4<f32>) -> Result<Vec<f32>> {
        let shape: Vec<usize> = input.shape().to_vec();
        let data: Vec<f32> = input.iter().copied().collect();

        let tensor = ort::value::Tensor::from_array((shape, data))
            .map_err(|e| ScanError::RecognitionUnavailable(format!("bad input tensor: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| ScanError::RecognitionUnavailable(format!("inference failed: {e}")))?;

        let (_, probabilities) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ScanError::RecognitionUnavailable(format!("bad model output: {e}")))?;

        Ok(probabilities.to_vec())
    }
}

/// Load the label file: one catalog id per line, model output order.
fn load_labels(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label file {:?}", path))?;

    let labels: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if labels.is_empty() {
        anyhow::bail!("label file {:?} is empty", path);
    }

    Ok(labels)
}
