//! Session Aggregator
//!
//! Owns the lifecycle of a scanning session: frames are admitted through
//! a single-slot gate, evaluated by the recognition engine, and accepted
//! results accumulate until `stop()` folds them into a summary. The gate
//! drops excess frames instead of buffering them; a fixed-rate capture
//! loop can submit freely without building a backlog.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, ScanError};
use crate::recognition::{Frame, RecognitionEngine, RecognitionResult};
use crate::storage::{ScanRecord, Store};
use crate::sync::SyncTaskKind;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Closed,
}

/// Outcome of one frame submission
#[derive(Debug)]
pub enum FrameOutcome {
    /// Evaluated above the acceptance threshold and recorded
    Accepted(RecognitionResult),
    /// Evaluated at or below the acceptance threshold; not recorded
    Discarded { confidence: f32 },
    /// Dropped without evaluation: another frame was in flight, or the
    /// session stopped while this frame was being evaluated
    Skipped,
}

/// Final economics of a completed session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub total_decks: usize,
    pub total_buy_value: f64,
    pub total_sell_value: f64,
    pub total_profit: f64,
    /// Mean per-item margin, formatted with one decimal and a `%` suffix
    pub average_margin: String,
    pub most_profitable: Option<RecognitionResult>,
    pub results: Vec<RecognitionResult>,
}

struct SessionInner {
    state: SessionState,
    session_id: Option<String>,
    accepted: Vec<RecognitionResult>,
}

/// Aggregates accepted recognition results for one session at a time.
pub struct SessionAggregator {
    engine: Mutex<RecognitionEngine>,
    store: Arc<Store>,
    inner: Mutex<SessionInner>,
    /// Admission gate: at most one frame evaluation in flight
    gate: AtomicBool,
    acceptance_threshold: f32,
}

/// Releases the admission gate on drop, covering both normal and error
/// return paths out of `submit_frame`.
struct GateGuard<'a>(&'a AtomicBool);

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SessionAggregator {
    pub fn new(engine: RecognitionEngine, store: Arc<Store>, acceptance_threshold: f32) -> Self {
        Self {
            engine: Mutex::new(engine),
            store,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                session_id: None,
                accepted: Vec::new(),
            }),
            gate: AtomicBool::new(false),
            acceptance_threshold,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Begin a fresh session. Always creates a new session id and an
    /// empty accumulator; a closed session is never resumed.
    pub fn start(&self) -> Result<String> {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Active {
            return Err(ScanError::InvalidState(
                "session already active".to_string(),
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        inner.state = SessionState::Active;
        inner.session_id = Some(session_id.clone());
        inner.accepted.clear();

        info!("Session {} started", session_id);
        Ok(session_id)
    }

    /// Submit one frame for evaluation.
    ///
    /// If another frame is already in flight the call returns `Skipped`
    /// without evaluating: this is admission control, not a queue. The
    /// gate is released on every exit path.
    pub fn submit_frame(&self, frame: &Frame) -> Result<FrameOutcome> {
        // Admission check: state and the id this frame would commit into
        let admitted_session = {
            let inner = self.inner.lock();
            if inner.state != SessionState::Active {
                return Err(ScanError::InvalidState(
                    "session is not active".to_string(),
                ));
            }
            inner
                .session_id
                .clone()
                .ok_or_else(|| ScanError::InvalidState("active session has no id".to_string()))?
        };

        if self
            .gate
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("Frame dropped: evaluation already in flight");
            return Ok(FrameOutcome::Skipped);
        }
        let _gate = GateGuard(&self.gate);

        let result = self.engine.lock().evaluate(frame)?;

        if result.classification_confidence <= self.acceptance_threshold {
            debug!(
                "Frame discarded: confidence {:.3} at or below threshold {:.2}",
                result.classification_confidence, self.acceptance_threshold
            );
            return Ok(FrameOutcome::Discarded {
                confidence: result.classification_confidence,
            });
        }

        self.commit(admitted_session, result)
    }

    /// Commit an accepted result. Session state is re-checked here: a
    /// result landing after `stop()` (or into a different session) is
    /// ignored rather than recorded.
    fn commit(&self, admitted_session: String, result: RecognitionResult) -> Result<FrameOutcome> {
        {
            let inner = self.inner.lock();
            if inner.state != SessionState::Active
                || inner.session_id.as_deref() != Some(admitted_session.as_str())
            {
                debug!("In-flight result ignored: session no longer active");
                return Ok(FrameOutcome::Skipped);
            }
        }

        let record = ScanRecord {
            id: Uuid::new_v4().to_string(),
            session_id: admitted_session.clone(),
            catalog_id: result.catalog_id.clone(),
            observed_at: result.observed_at,
            classification_confidence: result.classification_confidence,
            pricing_snapshot: result.pricing_snapshot,
        };

        // Two separate writes; a crash in between leaves an orphaned
        // scan record, which the sync layer tolerates.
        self.store.insert_scan_record(&record)?;
        self.store
            .enqueue_task(SyncTaskKind::HistoryUpload, &record.id)?;

        let mut inner = self.inner.lock();
        inner.accepted.push(result.clone());
        info!(
            "Accepted {} (confidence {:.3}) into session {}",
            result.catalog_id, result.classification_confidence, admitted_session
        );

        Ok(FrameOutcome::Accepted(result))
    }

    /// Close the session and fold the accumulator into a summary.
    pub fn stop(&self) -> Result<SessionSummary> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Active {
            return Err(ScanError::InvalidState(
                "session is not active".to_string(),
            ));
        }

        inner.state = SessionState::Closed;
        let session_id = inner
            .session_id
            .clone()
            .ok_or_else(|| ScanError::InvalidState("active session has no id".to_string()))?;
        let summary = summarize(&session_id, &inner.accepted);

        info!(
            "Session {} closed: {} decks, profit {:.2}",
            session_id, summary.total_decks, summary.total_profit
        );
        Ok(summary)
    }

    /// Accepted results of the current session, most recent first.
    pub fn recent_results(&self) -> Vec<RecognitionResult> {
        self.inner.lock().accepted.iter().rev().cloned().collect()
    }
}

/// Pure fold over accepted results. Order-independent for all totals;
/// the most-profitable tie-break favors first-seen order.
pub fn summarize(session_id: &str, results: &[RecognitionResult]) -> SessionSummary {
    let total_buy: f64 = results.iter().map(|r| r.pricing_snapshot.buy_price).sum();
    let total_sell: f64 = results.iter().map(|r| r.pricing_snapshot.sell_price).sum();
    let total_profit: f64 = results.iter().map(|r| r.pricing_snapshot.profit()).sum();

    let average_margin = if results.is_empty() {
        "0%".to_string()
    } else {
        let margin_sum: f64 = results
            .iter()
            .map(|r| {
                let snapshot = &r.pricing_snapshot;
                // Zero-priced defaults contribute no computable margin
                if snapshot.buy_price > 0.0 {
                    snapshot.profit() / snapshot.buy_price * 100.0
                } else {
                    0.0
                }
            })
            .sum();
        format!("{:.1}%", margin_sum / results.len() as f64)
    };

    let most_profitable = results
        .iter()
        .fold(None::<&RecognitionResult>, |best, r| match best {
            Some(b) if r.pricing_snapshot.profit() <= b.pricing_snapshot.profit() => Some(b),
            _ => Some(r),
        })
        .cloned();

    SessionSummary {
        session_id: session_id.to_string(),
        total_decks: results.len(),
        total_buy_value: round2(total_buy),
        total_sell_value: round2(total_sell),
        total_profit: round2(total_profit),
        average_margin,
        most_profitable,
        results: results.to_vec(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
