//! OCR backend seam
//!
//! The OCR engine is an opaque collaborator: frame in, best-effort UTF-8
//! text out. Recognition runs independently of classification on the same
//! frame; an empty string is a valid result and simply fails the
//! manufacturer/casino containment checks downstream.

use crate::error::Result;
use crate::recognition::frame::Frame;

/// Capability interface for text extraction.
pub trait TextRecognizer: Send {
    /// Extract whatever text is legible in the frame. May return an
    /// empty string; errors mean the backend itself is unavailable.
    fn recognize_text(&mut self, frame: &Frame) -> Result<String>;
}

/// Recognizer that always reports no legible text. Used when scanning
/// without an OCR backend; verification then bottoms out at the
/// unverified score.
#[derive(Debug, Default)]
pub struct NoOpRecognizer;

impl TextRecognizer for NoOpRecognizer {
    fn recognize_text(&mut self, _frame: &Frame) -> Result<String> {
        Ok(String::new())
    }
}
