//! Refund watchdog (§4.7): a long-running supervisor over pending
//! refund records, independent of any in-progress coordinator. Grounded
//! on the cross-chain monitor pattern of polling loops plus
//! retry-with-backoff over a shared registry of tracked obligations.

use crate::chain::Chain;
use crate::error::{Error, HtlcError, Result};
use crate::htlc::HtlcState;
use crate::registry::AdapterRegistry;
use crate::signer::Signer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const DEFAULT_SCAN_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_REFUND_BUFFER_SECONDS: i64 = 300;
const DEFAULT_MAX_CONCURRENT: usize = 3;
const MAX_ATTEMPTS: u32 = 5;
const CONFIRMATION_TIMEOUT_SECONDS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundRecordState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One pending refund obligation. Exported/imported verbatim for
/// persistence (§6: "the watchdog's import/export interface is the only
/// persistence contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub htlc_id: String,
    pub chain: Chain,
    pub refund_after: i64,
    pub state: RefundRecordState,
    pub attempts: u32,
    pub refund_tx: Option<String>,
    pub last_error: Option<String>,
}

/// Outcome of one refund attempt, appended to the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub htlc_id: String,
    pub chain: Chain,
    pub success: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

/// What [`RefundWatchdog::run_attempt`] actually accomplished. Finding the
/// HTLC already resolved on-chain is not a refund failure — the
/// counterparty completed the swap after all, and the obligation is gone
/// either way.
enum RefundOutcome {
    Refunded(String),
    AlreadyResolved,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchdogStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_attempts: u32,
    pub success_rate: f64,
}

pub struct WatchdogConfig {
    pub scan_interval_seconds: u64,
    pub refund_buffer_seconds: i64,
    pub max_concurrent: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: DEFAULT_SCAN_INTERVAL_SECONDS,
            refund_buffer_seconds: DEFAULT_REFUND_BUFFER_SECONDS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

struct Tracked {
    record: RefundRecord,
    signer: Arc<dyn Signer>,
}

pub struct RefundWatchdog {
    registry: Arc<AdapterRegistry>,
    config: WatchdogConfig,
    records: Mutex<HashMap<String, Tracked>>,
    history: Mutex<Vec<RefundResult>>,
    scanning: AtomicBool,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl RefundWatchdog {
    pub fn new(registry: Arc<AdapterRegistry>, config: WatchdogConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            records: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            scanning: AtomicBool::new(false),
            scan_task: Mutex::new(None),
        })
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    /// Idempotent on HTLC identifier: re-registering an already-tracked
    /// HTLC is a no-op.
    pub async fn register(&self, chain: Chain, htlc_id: String, refund_after: i64, signer: Arc<dyn Signer>) {
        let mut records = self.records.lock().await;
        records.entry(htlc_id.clone()).or_insert_with(|| Tracked {
            record: RefundRecord {
                htlc_id,
                chain,
                refund_after,
                state: RefundRecordState::Pending,
                attempts: 0,
                refund_tx: None,
                last_error: None,
            },
            signer,
        });
    }

    pub async fn unregister(&self, htlc_id: &str) {
        self.records.lock().await.remove(htlc_id);
    }

    pub fn start_monitoring(self: &Arc<Self>) {
        if self.scanning.swap(true, Ordering::SeqCst) {
            return;
        }
        let watchdog = self.clone();
        let handle = tokio::spawn(async move {
            let interval = std::time::Duration::from_secs(watchdog.config.scan_interval_seconds);
            while watchdog.scanning.load(Ordering::SeqCst) {
                watchdog.check_now().await;
                tokio::time::sleep(interval).await;
            }
        });
        // Replacing any previous handle; `scanning` being false guarantees
        // it had already finished.
        if let Ok(mut guard) = self.scan_task.try_lock() {
            *guard = Some(handle);
        }
    }

    pub async fn stop_monitoring(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        if let Some(handle) = self.scan_task.lock().await.take() {
            handle.abort();
        }
    }

    /// One-shot scan: select all Pending records past their refund
    /// deadline, dispatch up to `max_concurrent` attempts in parallel.
    pub async fn check_now(&self) {
        let now = Self::now();
        let due: Vec<String> = {
            let records = self.records.lock().await;
            records
                .values()
                .filter(|t| {
                    t.record.state == RefundRecordState::Pending
                        && t.record.refund_after + self.config.refund_buffer_seconds <= now
                })
                .map(|t| t.record.htlc_id.clone())
                .collect()
        };

        for batch in due.chunks(self.config.max_concurrent) {
            let attempts = batch.iter().map(|htlc_id| self.attempt(htlc_id, now));
            futures::future::join_all(attempts).await;
        }
    }

    /// Attempt an immediate refund regardless of schedule.
    pub async fn force(&self, htlc_id: &str) -> Result<()> {
        let now = Self::now();
        self.attempt(htlc_id, now).await
    }

    async fn attempt(&self, htlc_id: &str, now: i64) -> Result<()> {
        {
            let mut records = self.records.lock().await;
            let Some(tracked) = records.get_mut(htlc_id) else {
                return Err(Error::Htlc(HtlcError::NotFound(htlc_id.to_string())));
            };
            tracked.record.state = RefundRecordState::Processing;
            tracked.record.attempts += 1;
        }

        let result = self.run_attempt(htlc_id, now).await;

        let mut records = self.records.lock().await;
        if let Some(tracked) = records.get_mut(htlc_id) {
            match &result {
                Ok(RefundOutcome::Refunded(tx_hash)) => {
                    tracked.record.state = RefundRecordState::Completed;
                    tracked.record.refund_tx = Some(tx_hash.clone());
                }
                Ok(RefundOutcome::AlreadyResolved) => {
                    tracked.record.state = RefundRecordState::Completed;
                }
                Err(e) => {
                    tracked.record.last_error = Some(e.to_string());
                    if tracked.record.attempts >= MAX_ATTEMPTS {
                        tracked.record.state = RefundRecordState::Failed;
                    } else {
                        tracked.record.state = RefundRecordState::Pending;
                    }
                }
            }
        }
        let chain = records.get(htlc_id).map(|t| t.record.chain).unwrap_or(Chain::Utxo);
        drop(records);

        if matches!(result, Ok(RefundOutcome::AlreadyResolved)) {
            self.unregister(htlc_id).await;
        }

        let tx_hash = match &result {
            Ok(RefundOutcome::Refunded(tx_hash)) => Some(tx_hash.clone()),
            _ => None,
        };
        let mut history = self.history.lock().await;
        history.push(RefundResult {
            htlc_id: htlc_id.to_string(),
            chain,
            success: result.is_ok(),
            tx_hash,
            error: result.as_ref().err().map(|e| e.to_string()),
        });

        result.map(|_| ())
    }

    async fn run_attempt(&self, htlc_id: &str, now: i64) -> Result<RefundOutcome> {
        let (chain, signer) = {
            let records = self.records.lock().await;
            let tracked = records
                .get(htlc_id)
                .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))?;
            (tracked.record.chain, tracked.signer.clone())
        };

        let adapter = self.registry.lookup_ready(chain)?;
        let adapter = adapter.read().await;

        let status = adapter.htlc_status(htlc_id).await?;
        match status.state {
            HtlcState::Claimed | HtlcState::Refunded => {
                // The counterparty completed the swap (or someone else
                // already refunded it) before we got to it. The obligation
                // is resolved either way, not a failure of this watchdog.
                return Ok(RefundOutcome::AlreadyResolved);
            }
            _ => {}
        }
        if status.expiry > now {
            return Err(Error::Htlc(HtlcError::TimelockNotExpired(htlc_id.to_string())));
        }

        let unsigned = adapter.refund_htlc(htlc_id).await?;
        let signed = signer.sign(chain, unsigned).await?;
        let tx_hash = adapter.broadcast(signed).await?;

        let confirmed = tokio::time::timeout(
            std::time::Duration::from_secs(CONFIRMATION_TIMEOUT_SECONDS),
            adapter.wait_for_confirmation(&tx_hash, 1),
        )
        .await;
        match confirmed {
            Ok(Ok(())) => Ok(RefundOutcome::Refunded(tx_hash)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Transaction(crate::error::TransactionError::ConfirmationTimeout {
                tx_hash,
            })),
        }
    }

    pub async fn stats(&self) -> WatchdogStats {
        let records = self.records.lock().await;
        let mut stats = WatchdogStats::default();
        let mut total_attempts = 0u32;
        let mut successes = 0u32;
        for tracked in records.values() {
            total_attempts += tracked.record.attempts;
            match tracked.record.state {
                RefundRecordState::Pending => stats.pending += 1,
                RefundRecordState::Processing => stats.processing += 1,
                RefundRecordState::Completed => {
                    stats.completed += 1;
                    successes += 1;
                }
                RefundRecordState::Failed => stats.failed += 1,
            }
        }
        stats.total_attempts = total_attempts;
        stats.success_rate = if total_attempts > 0 {
            successes as f64 / (stats.completed + stats.failed).max(1) as f64
        } else {
            0.0
        };
        stats
    }

    /// The append-only log of every attempt made so far, successful or
    /// not, including obligations found already resolved on-chain.
    pub async fn history(&self) -> Vec<RefundResult> {
        self.history.lock().await.clone()
    }

    /// Export the in-memory record set so a restart does not lose pending
    /// refund obligations. Signer handles are not exportable; the
    /// embedding application must re-supply them via [`Self::rebind`]
    /// after import.
    pub async fn export_records(&self) -> Vec<RefundRecord> {
        self.records.lock().await.values().map(|t| t.record.clone()).collect()
    }

    pub async fn import_records(&self, records: Vec<RefundRecord>, default_signer: Arc<dyn Signer>) {
        let mut guard = self.records.lock().await;
        for record in records {
            guard.entry(record.htlc_id.clone()).or_insert_with(|| Tracked {
                record,
                signer: default_signer.clone(),
            });
        }
    }

    /// Replace the signer bound to an already-registered record, e.g.
    /// after importing exported records with a fresh signer instance.
    pub async fn rebind(&self, htlc_id: &str, signer: Arc<dyn Signer>) {
        if let Some(tracked) = self.records.lock().await.get_mut(htlc_id) {
            tracked.signer = signer;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EvmAdapter;

    struct NoopSigner;

    #[async_trait::async_trait]
    impl Signer for NoopSigner {
        async fn sign(
            &self,
            _chain: Chain,
            unsigned: crate::adapter::UnsignedTransaction,
        ) -> Result<crate::adapter::SignedTransaction> {
            Ok(unsigned)
        }
    }

    /// Reports every HTLC as already claimed, to exercise the
    /// found-already-resolved branch of [`RefundWatchdog::run_attempt`]
    /// without a real chain round trip.
    struct AlreadyClaimedAdapter;

    #[async_trait::async_trait]
    impl crate::adapter::ChainAdapter for AlreadyClaimedAdapter {
        fn chain(&self) -> Chain {
            Chain::Evm
        }

        async fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        fn derive_address(&self, _public_key: &[u8]) -> Result<String> {
            Ok("addr".to_string())
        }

        async fn balance(&self, _address: &str, _asset: Option<&crate::chain::Asset>) -> Result<u64> {
            Ok(0)
        }

        async fn build_transaction(&self, _params: &crate::adapter::TransferParams) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn create_htlc(&self, _params: &crate::htlc::HtlcParams) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn claim_htlc(&self, _htlc_id: &str, _preimage: &[u8; 32]) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn refund_htlc(&self, _htlc_id: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn sign_transaction(&self, unsigned: Vec<u8>, _key: &Vec<u8>) -> Result<Vec<u8>> {
            Ok(unsigned)
        }

        async fn broadcast(&self, _signed: Vec<u8>) -> Result<String> {
            Ok("tx".to_string())
        }

        async fn htlc_status(&self, htlc_id: &str) -> Result<crate::htlc::HtlcStatus> {
            Ok(crate::htlc::HtlcStatus {
                state: HtlcState::Claimed,
                create_tx: Some("create".to_string()),
                claim_tx: Some("claim".to_string()),
                refund_tx: None,
                amount: 1,
                hashlock: crate::crypto::Hashlock([0u8; 32]),
                expiry: 0,
                receiver_address: htlc_id.to_string(),
            })
        }

        async fn subscribe_address(
            &self,
            _address: &str,
        ) -> Result<(crate::adapter::EventStream, crate::adapter::SubscriptionHandle)> {
            let (tx, _rx) = tokio::sync::oneshot::channel();
            let stream: crate::adapter::EventStream =
                Box::pin(futures::stream::empty::<crate::adapter::AddressEvent>());
            Ok((stream, crate::adapter::SubscriptionHandle::new(tx)))
        }

        async fn get_transaction(&self, tx_hash: &str) -> Result<crate::adapter::ObservedTransaction> {
            Ok(crate::adapter::ObservedTransaction {
                tx_hash: tx_hash.to_string(),
                confirmations: 1,
                block_height: Some(1),
            })
        }

        async fn block_height(&self) -> Result<u64> {
            Ok(1)
        }

        async fn confirmations(&self, _tx_hash: &str) -> Result<u32> {
            Ok(1)
        }

        async fn estimate_gas(&self, _unsigned: &Vec<u8>) -> Result<u64> {
            Ok(1)
        }

        async fn wait_for_confirmation(&self, _tx_hash: &str, _confirmations_needed: u32) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn an_already_claimed_htlc_counts_as_completed_not_failed() {
        let mut registry = AdapterRegistry::new();
        registry.register(AlreadyClaimedAdapter);
        registry.initialize_all().await;
        let watchdog = RefundWatchdog::new(Arc::new(registry), WatchdogConfig::default());

        let signer: Arc<dyn Signer> = Arc::new(NoopSigner);
        watchdog
            .register(Chain::Evm, "already-claimed".to_string(), 0, signer)
            .await;

        watchdog.force("already-claimed").await.unwrap();

        // The obligation is resolved, so it's dropped from active
        // tracking rather than sitting around as Completed forever; the
        // history log is where the outcome is asserted.
        assert_eq!(watchdog.export_records().await.len(), 0);
        let history = watchdog.history().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
    }

    #[tokio::test]
    async fn registering_twice_is_idempotent() {
        let mut registry = AdapterRegistry::new();
        registry.register(EvmAdapter::new("http://127.0.0.1:1", "0xhtlc"));
        let watchdog = RefundWatchdog::new(Arc::new(registry), WatchdogConfig::default());

        let signer: Arc<dyn Signer> = Arc::new(NoopSigner);
        watchdog.register(Chain::Evm, "abc".to_string(), 0, signer.clone()).await;
        watchdog.register(Chain::Evm, "abc".to_string(), 999, signer).await;

        let records = watchdog.export_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].refund_after, 0);
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let registry = AdapterRegistry::new();
        let watchdog = RefundWatchdog::new(Arc::new(registry), WatchdogConfig::default());
        let stats = watchdog.stats().await;
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total_attempts, 0);
    }
}
