//! Sync Queue Processor
//!
//! Outbound reconciliation with the remote pricing/sync service. Tasks
//! are enqueued by the recognition engine (stale pricing) and the session
//! aggregator (new history) and drained opportunistically when an
//! external trigger reports connectivity. The drain is fail-fast and
//! in-order: the first dispatch failure halts the batch so later tasks
//! are never reordered ahead of a stuck one.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::catalog::PricingRecord;
use crate::error::{Result, ScanError};
use crate::storage::{ScanRecord, Store};

/// What a queued task asks the remote service to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTaskKind {
    /// Fetch updated pricing for a catalog entry (payload key: catalog id)
    PricingRefresh,
    /// Upload a scan record (payload key: scan record id)
    HistoryUpload,
}

impl SyncTaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTaskKind::PricingRefresh => "pricing_refresh",
            SyncTaskKind::HistoryUpload => "history_upload",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pricing_refresh" => Some(SyncTaskKind::PricingRefresh),
            "history_upload" => Some(SyncTaskKind::HistoryUpload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTaskStatus {
    Pending,
    Done,
}

impl SyncTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTaskStatus::Pending => "pending",
            SyncTaskStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SyncTaskStatus::Pending),
            "done" => Some(SyncTaskStatus::Done),
            _ => None,
        }
    }
}

/// A durable outbound task, FIFO by monotonic id.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub id: i64,
    pub kind: SyncTaskKind,
    pub payload_key: String,
    pub enqueued_at: DateTime<Utc>,
    pub status: SyncTaskStatus,
}

/// Contract of the remote pricing/sync service. Both calls are
/// idempotent from the core's perspective.
pub trait RemoteService: Send {
    fn refresh_pricing(&self, catalog_id: &str) -> Result<PricingRecord>;
    fn upload_history(&self, record: &ScanRecord) -> Result<()>;
}

/// HTTP implementation of the remote contract.
pub struct HttpRemoteService {
    client: reqwest::Client,
    base_url: String,
    runtime: Runtime,
}

impl HttpRemoteService {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ScanError::Initialization(format!("failed to create HTTP client: {e}")))?;

        let runtime = Runtime::new()
            .map_err(|e| ScanError::Initialization(format!("failed to create tokio runtime: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            runtime,
        })
    }
}

impl RemoteService for HttpRemoteService {
    fn refresh_pricing(&self, catalog_id: &str) -> Result<PricingRecord> {
        let url = format!("{}/pricing/refresh", self.base_url);

        self.runtime.block_on(async {
            let response = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "catalogId": catalog_id }))
                .send()
                .await
                .map_err(|e| ScanError::SyncDispatch(format!("pricing refresh failed: {e}")))?;

            if !response.status().is_success() {
                return Err(ScanError::SyncDispatch(format!(
                    "pricing refresh for {} returned {}",
                    catalog_id,
                    response.status()
                )));
            }

            response
                .json::<PricingRecord>()
                .await
                .map_err(|e| ScanError::SyncDispatch(format!("bad pricing payload: {e}")))
        })
    }

    fn upload_history(&self, record: &ScanRecord) -> Result<()> {
        let url = format!("{}/history/upload", self.base_url);

        self.runtime.block_on(async {
            let response = self
                .client
                .post(&url)
                .json(record)
                .send()
                .await
                .map_err(|e| ScanError::SyncDispatch(format!("history upload failed: {e}")))?;

            if !response.status().is_success() {
                return Err(ScanError::SyncDispatch(format!(
                    "history upload for {} returned {}",
                    record.id,
                    response.status()
                )));
            }

            Ok(())
        })
    }
}

/// Drains the outbound queue against the remote service.
pub struct SyncProcessor {
    store: Arc<Store>,
    remote: Box<dyn RemoteService>,
    drain_gate: Mutex<()>,
}

impl SyncProcessor {
    pub fn new(store: Arc<Store>, remote: Box<dyn RemoteService>) -> Self {
        Self {
            store,
            remote,
            drain_gate: Mutex::new(()),
        }
    }

    /// Process pending tasks in enqueue order. Returns the number of
    /// tasks completed; the first dispatch failure leaves its task
    /// pending and halts the batch (retried on the next drain).
    ///
    /// Only one drain runs at a time per processor; a drain invoked
    /// while another is in flight returns immediately with 0.
    pub fn drain(&self) -> Result<usize> {
        let Some(_guard) = self.drain_gate.try_lock() else {
            debug!("Drain already in flight, skipping");
            return Ok(0);
        };

        let pending = self.store.list_pending()?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!("Draining {} pending sync tasks", pending.len());
        let mut processed = 0;

        for task in pending {
            match self.dispatch(&task) {
                Ok(()) => {
                    self.store.mark_done(task.id)?;
                    processed += 1;
                }
                Err(e) => {
                    warn!(
                        "Sync task {} ({:?} {}) failed, halting batch: {}",
                        task.id, task.kind, task.payload_key, e
                    );
                    break;
                }
            }
        }

        info!("Drain complete: {} tasks processed", processed);
        Ok(processed)
    }

    fn dispatch(&self, task: &SyncTask) -> Result<()> {
        match task.kind {
            SyncTaskKind::PricingRefresh => {
                let refreshed = self.remote.refresh_pricing(&task.payload_key)?;
                self.store.upsert_pricing(&refreshed)?;
                Ok(())
            }
            SyncTaskKind::HistoryUpload => {
                match self.store.get_scan_record(&task.payload_key)? {
                    Some(record) => self.remote.upload_history(&record),
                    None => {
                        // Orphaned task; nothing to upload
                        warn!("Scan record {} missing for upload task", task.payload_key);
                        Ok(())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, PricingSnapshot};

    /// Remote stub that records calls and fails on configured keys.
    struct StubRemote {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl StubRemote {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: fail_on.map(str::to_string),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl RemoteService for Arc<StubRemote> {
        fn refresh_pricing(&self, catalog_id: &str) -> Result<PricingRecord> {
            if self.fail_on.as_deref() == Some(catalog_id) {
                return Err(ScanError::SyncDispatch("stub offline".to_string()));
            }
            self.calls.lock().push(format!("refresh:{catalog_id}"));
            let mut record = PricingRecord::default_for(catalog_id);
            record.buy_price = 3.0;
            record.sell_price = 9.0;
            record.data_source = "remote".to_string();
            Ok(record)
        }

        fn upload_history(&self, record: &ScanRecord) -> Result<()> {
            if self.fail_on.as_deref() == Some(record.id.as_str()) {
                return Err(ScanError::SyncDispatch("stub offline".to_string()));
            }
            self.calls.lock().push(format!("upload:{}", record.id));
            Ok(())
        }
    }

    fn store_with_entry(id: &str) -> Arc<Store> {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_catalog_entry(&CatalogEntry {
                id: id.to_string(),
                name: id.to_string(),
                manufacturer: "Bee".to_string(),
                casino: None,
                fingerprint: format!("fp-{id}"),
            })
            .unwrap();
        Arc::new(store)
    }

    fn scan_record(id: &str, session: &str) -> ScanRecord {
        ScanRecord {
            id: id.to_string(),
            session_id: session.to_string(),
            catalog_id: "deck-1".to_string(),
            observed_at: Utc::now(),
            classification_confidence: 0.9,
            pricing_snapshot: PricingSnapshot {
                buy_price: 1.0,
                sell_price: 2.0,
            },
        }
    }

    #[test]
    fn test_drain_processes_in_enqueue_order() {
        let store = store_with_entry("deck-1");
        store.insert_scan_record(&scan_record("scan-1", "s-1")).unwrap();
        store.enqueue_task(SyncTaskKind::PricingRefresh, "deck-1").unwrap();
        store.enqueue_task(SyncTaskKind::HistoryUpload, "scan-1").unwrap();

        let remote = Arc::new(StubRemote::new(None));
        let processor = SyncProcessor::new(store.clone(), Box::new(remote.clone()));

        assert_eq!(processor.drain().unwrap(), 2);
        assert_eq!(remote.calls(), vec!["refresh:deck-1", "upload:scan-1"]);
        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_drain_writes_refreshed_pricing_back() {
        let store = store_with_entry("deck-1");
        store.enqueue_task(SyncTaskKind::PricingRefresh, "deck-1").unwrap();

        let remote = Arc::new(StubRemote::new(None));
        let processor = SyncProcessor::new(store.clone(), Box::new(remote));
        processor.drain().unwrap();

        let pricing = store.get_pricing_for("deck-1").unwrap().unwrap();
        assert_eq!(pricing.data_source, "remote");
        assert_eq!(pricing.sell_price, 9.0);
    }

    #[test]
    fn test_first_failure_halts_batch_and_preserves_order() {
        let store = store_with_entry("deck-1");
        store.insert_scan_record(&scan_record("scan-1", "s-1")).unwrap();
        store.enqueue_task(SyncTaskKind::PricingRefresh, "deck-1").unwrap();
        store.enqueue_task(SyncTaskKind::PricingRefresh, "deck-down").unwrap();
        store.enqueue_task(SyncTaskKind::HistoryUpload, "scan-1").unwrap();

        let remote = Arc::new(StubRemote::new(Some("deck-down")));
        let processor = SyncProcessor::new(store.clone(), Box::new(remote.clone()));

        assert_eq!(processor.drain().unwrap(), 1);
        // the failed task and everything behind it stay pending, in order
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload_key, "deck-down");
        assert_eq!(pending[1].payload_key, "scan-1");
        assert_eq!(remote.calls(), vec!["refresh:deck-1"]);
    }

    #[test]
    fn test_drain_twice_does_not_redispatch_done_tasks() {
        let store = store_with_entry("deck-1");
        store.enqueue_task(SyncTaskKind::PricingRefresh, "deck-1").unwrap();

        let remote = Arc::new(StubRemote::new(None));
        let processor = SyncProcessor::new(store.clone(), Box::new(remote.clone()));

        assert_eq!(processor.drain().unwrap(), 1);
        assert_eq!(processor.drain().unwrap(), 0);
        assert_eq!(remote.calls().len(), 1);
    }

    #[test]
    fn test_orphaned_upload_task_is_completed_without_dispatch() {
        let store = store_with_entry("deck-1");
        store.enqueue_task(SyncTaskKind::HistoryUpload, "scan-missing").unwrap();

        let remote = Arc::new(StubRemote::new(None));
        let processor = SyncProcessor::new(store.clone(), Box::new(remote.clone()));

        assert_eq!(processor.drain().unwrap(), 1);
        assert!(remote.calls().is_empty());
        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_kind_and_status_roundtrip() {
        assert_eq!(
            SyncTaskKind::parse(SyncTaskKind::PricingRefresh.as_str()),
            Some(SyncTaskKind::PricingRefresh)
        );
        assert_eq!(
            SyncTaskStatus::parse(SyncTaskStatus::Done.as_str()),
            Some(SyncTaskStatus::Done)
        );
        assert_eq!(SyncTaskKind::parse("bogus"), None);
    }
}
