//! Error taxonomy for the scanning pipeline
//!
//! Failure modes are deliberately coarse: per-frame recognition failures
//! must not abort a session, constraint breaches must not be retried, and
//! sync dispatch failures leave the queue untouched for the next drain.

use thiserror::Error;

/// Errors surfaced by the recognition, session, storage, and sync layers.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A backend (classifier, OCR, database) was unavailable at startup.
    /// Fatal to the pipeline instance; not retried internally.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The classifier or OCR call failed for a single frame. The caller
    /// should skip the frame and continue the session.
    #[error("recognition backend unavailable: {0}")]
    RecognitionUnavailable(String),

    /// A uniqueness constraint was breached at write time (duplicate
    /// fingerprint, second pricing record for a catalog entry).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A remote call failed during a sync drain. The task stays pending
    /// and the batch halts.
    #[error("sync dispatch failed: {0}")]
    SyncDispatch(String),

    /// Any other storage-level failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Session operation attempted in the wrong state (e.g. submitting a
    /// frame while the session is not active).
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// File-level failure while reading a seed or writing an export.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure while rendering an export document.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
