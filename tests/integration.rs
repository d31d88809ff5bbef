//! End-to-end scenarios over in-memory fake adapters: a standard swap's
//! happy path, a privacy-hub swap's completion witnesses, the watchdog's
//! auto-refund behavior, and broadcast retry-then-succeed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use swaprail_core::adapter::{
    AddressEvent, ChainAdapter, EventStream, ObservedTransaction, SubscriptionHandle,
    TransferParams,
};
use swaprail_core::chain::{Asset, Chain};
use swaprail_core::error::{Error, HtlcError, NetworkError, Result};
use swaprail_core::{
    AdapterRegistry, HtlcParams, HtlcState, HtlcStatus, PrivacyLevel, RefundWatchdog, Signer,
    Solver, StandardCoordinator, SwapContext, SwapIntent, WatchdogConfig,
};
use tokio::sync::Mutex;
use uuid::Uuid;

const NOW0: i64 = 1_700_000_000;

/// An in-memory adapter good enough to drive a coordinator through a full
/// swap: deterministic IDs, instant "confirmation", and an injectable
/// number of broadcast failures before success.
struct FakeAdapter {
    chain: Chain,
    htlcs: Mutex<HashMap<String, HtlcStatus>>,
    next_id: AtomicU64,
    broadcast_failures_remaining: AtomicU32,
    broadcast_attempts: AtomicU32,
}

impl FakeAdapter {
    fn new(chain: Chain) -> Self {
        Self {
            chain,
            htlcs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            broadcast_failures_remaining: AtomicU32::new(0),
            broadcast_attempts: AtomicU32::new(0),
        }
    }

    fn with_broadcast_failures(chain: Chain, failures: u32) -> Self {
        let adapter = Self::new(chain);
        adapter
            .broadcast_failures_remaining
            .store(failures, Ordering::SeqCst);
        adapter
    }

    fn broadcast_attempts(&self) -> u32 {
        self.broadcast_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainAdapter for FakeAdapter {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn derive_address(&self, public_key: &[u8]) -> Result<String> {
        Ok(format!("addr-{}", hex::encode(public_key)))
    }

    async fn balance(&self, _address: &str, _asset: Option<&Asset>) -> Result<u64> {
        Ok(1_000_000_000)
    }

    async fn build_transaction(&self, _params: &TransferParams) -> Result<Vec<u8>> {
        Ok(b"transfer".to_vec())
    }

    async fn create_htlc(&self, params: &HtlcParams) -> Result<Vec<u8>> {
        let id = format!("htlc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut htlcs = self.htlcs.lock().await;
        htlcs.insert(
            id.clone(),
            HtlcStatus {
                state: HtlcState::Pending,
                create_tx: None,
                claim_tx: None,
                refund_tx: None,
                amount: params.amount,
                hashlock: params.hashlock,
                expiry: params.expiry,
                receiver_address: params.receiver_address.clone(),
            },
        );
        Ok(id.into_bytes())
    }

    async fn claim_htlc(&self, htlc_id: &str, preimage: &[u8; 32]) -> Result<Vec<u8>> {
        let htlcs = self.htlcs.lock().await;
        let status = htlcs
            .get(htlc_id)
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))?;
        if status.hashlock != swaprail_core::crypto::Secret(*preimage).hashlock() {
            return Err(Error::Htlc(HtlcError::InvalidPreimage));
        }
        Ok(format!("claim:{htlc_id}").into_bytes())
    }

    async fn refund_htlc(&self, htlc_id: &str) -> Result<Vec<u8>> {
        let htlcs = self.htlcs.lock().await;
        let status = htlcs
            .get(htlc_id)
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))?;
        if status.expiry > NOW0 {
            return Err(Error::Htlc(HtlcError::TimelockNotExpired(htlc_id.to_string())));
        }
        Ok(format!("refund:{htlc_id}").into_bytes())
    }

    fn sign_transaction(&self, unsigned: Vec<u8>, _key: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(unsigned)
    }

    async fn broadcast(&self, signed: Vec<u8>) -> Result<String> {
        self.broadcast_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.broadcast_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.broadcast_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Network(NetworkError::Generic(
                "simulated broadcast failure".to_string(),
            )));
        }
        let payload = String::from_utf8_lossy(&signed).to_string();
        let tx_hash = format!("tx-{payload}");

        let mut htlcs = self.htlcs.lock().await;
        if payload.starts_with("htlc-") {
            if let Some(status) = htlcs.get_mut(&payload) {
                status.state = HtlcState::Locked;
                status.create_tx = Some(tx_hash.clone());
            }
        } else if let Some(id) = payload.strip_prefix("claim:") {
            if let Some(status) = htlcs.get_mut(id) {
                status.state = HtlcState::Claimed;
                status.claim_tx = Some(tx_hash.clone());
            }
        } else if let Some(id) = payload.strip_prefix("refund:") {
            if let Some(status) = htlcs.get_mut(id) {
                status.state = HtlcState::Refunded;
                status.refund_tx = Some(tx_hash.clone());
            }
        }
        Ok(tx_hash)
    }

    async fn htlc_status(&self, htlc_id: &str) -> Result<HtlcStatus> {
        let htlcs = self.htlcs.lock().await;
        htlcs
            .get(htlc_id)
            .cloned()
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))
    }

    async fn subscribe_address(&self, _address: &str) -> Result<(EventStream, SubscriptionHandle)> {
        let (tx, _rx) = tokio::sync::oneshot::channel();
        let stream: EventStream = Box::pin(futures::stream::empty::<AddressEvent>());
        Ok((stream, SubscriptionHandle::new(tx)))
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<ObservedTransaction> {
        Ok(ObservedTransaction {
            tx_hash: tx_hash.to_string(),
            confirmations: 10,
            block_height: Some(100),
        })
    }

    async fn block_height(&self) -> Result<u64> {
        Ok(100)
    }

    async fn confirmations(&self, _tx_hash: &str) -> Result<u32> {
        Ok(10)
    }

    async fn estimate_gas(&self, _unsigned: &Vec<u8>) -> Result<u64> {
        Ok(1000)
    }

    async fn wait_for_confirmation(&self, _tx_hash: &str, _confirmations_needed: u32) -> Result<()> {
        Ok(())
    }
}

struct PassthroughSigner;

#[async_trait]
impl Signer for PassthroughSigner {
    async fn sign(&self, _chain: Chain, unsigned: Vec<u8>) -> Result<Vec<u8>> {
        Ok(unsigned)
    }
}

fn make_intent(source_chain: Chain, dest_chain: Chain, privacy: PrivacyLevel) -> SwapIntent {
    let mut user_addresses = HashMap::new();
    user_addresses.insert(source_chain, "user-source".to_string());
    user_addresses.insert(dest_chain, "user-dest".to_string());

    SwapIntent {
        id: Uuid::nil(),
        user_addresses,
        source_chain,
        source_asset: Asset::native(source_chain),
        source_amount: 100_000_000,
        dest_chain,
        dest_asset: Asset::native(dest_chain),
        min_dest_amount: 100_000_000,
        max_slippage: 0.01,
        deadline: NOW0 + 3600,
        privacy_level: privacy,
        status: swaprail_core::intent::IntentStatus::Pending,
        created_at: NOW0,
    }
}

fn make_solver(source_chain: Chain, dest_chain: Chain) -> Solver {
    let mut addresses = HashMap::new();
    addresses.insert(source_chain, "solver-source".to_string());
    addresses.insert(dest_chain, "solver-dest".to_string());

    Solver {
        id: "solver-1".to_string(),
        addresses,
        inventory: HashMap::new(),
        reputation: swaprail_core::intent::SolverReputation {
            completed_swaps: 10,
            failed_swaps: 0,
            average_completion_seconds: 120.0,
        },
        fee_rate: rust_decimal::Decimal::new(25, 4),
    }
}

#[tokio::test]
async fn standard_swap_utxo_to_tendermint_happy_path() {
    let mut registry = AdapterRegistry::new();
    registry.register(FakeAdapter::new(Chain::Utxo));
    registry.register(FakeAdapter::new(Chain::Tendermint));
    registry.initialize_all().await;
    let registry = Arc::new(registry);
    let watchdog = RefundWatchdog::new(registry.clone(), WatchdogConfig::default());

    let coordinator = StandardCoordinator::new(registry, watchdog);
    let intent = make_intent(Chain::Utxo, Chain::Tendermint, PrivacyLevel::Standard);
    let solver = make_solver(Chain::Utxo, Chain::Tendermint);
    let signer: Arc<dyn Signer> = Arc::new(PassthroughSigner);

    let execution = coordinator.execute(&intent, &solver, signer).await.unwrap();

    assert_eq!(execution.state, swaprail_core::StandardState::Completed);
    assert!(execution.source_htlc_id.is_some());
    assert!(execution.dest_htlc_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn privacy_hub_swap_asserts_all_three_completion_witnesses() {
    use swaprail_core::{HubConfig, PrivacyHubCoordinator, PrivacyHubState};

    let mut registry = AdapterRegistry::new();
    registry.register(FakeAdapter::new(Chain::Utxo));
    registry.register(FakeAdapter::new(Chain::Tendermint));
    registry.register(FakeAdapter::new(Chain::ShieldedNote));
    registry.initialize_all().await;
    let registry = Arc::new(registry);
    let watchdog = RefundWatchdog::new(registry.clone(), WatchdogConfig::default());

    let coordinator = PrivacyHubCoordinator::new(registry, watchdog);
    let intent = make_intent(Chain::Utxo, Chain::Tendermint, PrivacyLevel::Maximum);
    let mut solver = make_solver(Chain::Utxo, Chain::Tendermint);
    solver
        .addresses
        .insert(Chain::ShieldedNote, "solver-hub".to_string());
    let signer: Arc<dyn Signer> = Arc::new(PassthroughSigner);

    let mut hub_config = HubConfig::default();
    hub_config.min_mixing_delay_ms = 1;
    hub_config.max_mixing_delay_ms = 2;

    let execution = coordinator
        .execute(&intent, &solver, signer, hub_config)
        .await
        .unwrap();

    assert_eq!(execution.state, PrivacyHubState::Completed);
    assert!(execution.witnesses.all_true());
}

#[tokio::test]
async fn retry_on_broadcast_failure_surfaces_no_error_after_eventual_success() {
    let mut registry = AdapterRegistry::new();
    registry.register(FakeAdapter::with_broadcast_failures(Chain::Utxo, 2));
    registry.register(FakeAdapter::new(Chain::Tendermint));
    registry.initialize_all().await;
    let registry = Arc::new(registry);
    let watchdog = RefundWatchdog::new(registry.clone(), WatchdogConfig::default());

    let coordinator = StandardCoordinator::new(registry, watchdog);
    let intent = make_intent(Chain::Utxo, Chain::Tendermint, PrivacyLevel::Standard);
    let solver = make_solver(Chain::Utxo, Chain::Tendermint);
    let signer: Arc<dyn Signer> = Arc::new(PassthroughSigner);

    let execution = coordinator.execute(&intent, &solver, signer).await.unwrap();
    assert_eq!(execution.state, swaprail_core::StandardState::Completed);

    let source_lock_step = execution
        .audit_log
        .iter()
        .find(|step| step.detail == "source HTLC locked")
        .expect("source lock step recorded");
    assert_eq!(source_lock_step.attempts, 3);
}

#[tokio::test]
async fn watchdog_auto_refunds_a_record_past_its_buffer() {
    let mut registry = AdapterRegistry::new();
    registry.register(FakeAdapter::new(Chain::Utxo));
    registry.initialize_all().await;
    let registry = Arc::new(registry);

    let config = WatchdogConfig {
        scan_interval_seconds: 1,
        refund_buffer_seconds: 0,
        max_concurrent: 3,
    };
    let watchdog = RefundWatchdog::new(registry.clone(), config);

    let adapter = registry.lookup_ready(Chain::Utxo).unwrap();
    let htlc_id = {
        let adapter = adapter.read().await;
        let params = HtlcParams {
            sender_address: "a".to_string(),
            receiver_address: "b".to_string(),
            amount: 1,
            hashlock: swaprail_core::crypto::Secret::generate().hashlock(),
            expiry: NOW0 - 600,
            asset: None,
        };
        // FakeAdapter rejects expiry <= now in real validation; the
        // watchdog path never calls HtlcParams::validate, so this is
        // fine for exercising refund-after-expiry behavior directly.
        let unsigned = adapter.create_htlc(&params).await.unwrap();
        String::from_utf8(unsigned).unwrap()
    };

    let signer: Arc<dyn Signer> = Arc::new(PassthroughSigner);
    watchdog
        .register(Chain::Utxo, htlc_id.clone(), NOW0 - 600, signer)
        .await;

    watchdog.check_now().await;

    let stats = watchdog.stats().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn reregistering_the_same_htlc_id_is_idempotent() {
    let registry = Arc::new(AdapterRegistry::new());
    let watchdog = RefundWatchdog::new(registry, WatchdogConfig::default());
    let signer: Arc<dyn Signer> = Arc::new(PassthroughSigner);

    watchdog
        .register(Chain::Utxo, "htlc-a".to_string(), NOW0 + 100, signer.clone())
        .await;
    watchdog
        .register(Chain::Utxo, "htlc-a".to_string(), NOW0 + 999, signer)
        .await;

    let stats = watchdog.stats().await;
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn swap_context_wires_registry_and_watchdog_together() {
    let mut registry = AdapterRegistry::new();
    registry.register(FakeAdapter::new(Chain::Utxo));
    registry.register(FakeAdapter::new(Chain::Tendermint));
    registry.initialize_all().await;

    let context = SwapContext::new(registry, WatchdogConfig::default());
    let coordinator = context.standard_coordinator();

    let intent = make_intent(Chain::Utxo, Chain::Tendermint, PrivacyLevel::Standard);
    let solver = make_solver(Chain::Utxo, Chain::Tendermint);
    let signer: Arc<dyn Signer> = Arc::new(PassthroughSigner);

    let execution = coordinator.execute(&intent, &solver, signer).await.unwrap();
    assert_eq!(execution.state, swaprail_core::StandardState::Completed);
}

#[tokio::test]
async fn refund_pre_expiry_is_rejected_and_deferred() {
    let mut registry = AdapterRegistry::new();
    registry.register(FakeAdapter::new(Chain::Utxo));
    registry.initialize_all().await;
    let registry = Arc::new(registry);

    let adapter = registry.lookup_ready(Chain::Utxo).unwrap();
    let htlc_id = {
        let adapter = adapter.read().await;
        let params = HtlcParams {
            sender_address: "a".to_string(),
            receiver_address: "b".to_string(),
            amount: 1,
            hashlock: swaprail_core::crypto::Secret::generate().hashlock(),
            expiry: NOW0 + 100,
            asset: None,
        };
        let unsigned = adapter.create_htlc(&params).await.unwrap();
        String::from_utf8(unsigned).unwrap()
    };

    let adapter = adapter.read().await;
    let result = adapter.refund_htlc(&htlc_id).await;
    assert!(matches!(
        result,
        Err(Error::Htlc(HtlcError::TimelockNotExpired(_)))
    ));
}

#[test]
fn timelock_sampler_statistical_property_matches_spec_scenario_three() {
    use swaprail_core::timelock::LegConfig;

    let config = LegConfig {
        min_seconds: 1800.0,
        median_seconds: 5400.0,
        max_seconds: 14400.0,
        sigma: 0.45,
    };
    config.validate().unwrap();

    use swaprail_core::crypto::round_up_to_multiple;

    let mut samples: Vec<f64> = (0..1000)
        .map(|_| round_up_to_multiple(config.sample(), 900.0))
        .collect();
    for sample in &samples {
        assert!((1800.0..=14400.0 + 900.0).contains(sample));
        assert_eq!(*sample as i64 % 900, 0);
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = samples[samples.len() / 2];
    assert!((2700.0..=8100.0).contains(&median));
}
