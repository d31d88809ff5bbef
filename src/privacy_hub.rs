//! Privacy-hub swap coordinator (§4.4): two independent secrets routed
//! through a shielded hub so the source and destination legs are
//! unlinkable by hashlock correlation. Twelve phases, linear with
//! fail-out at any phase.

use crate::adapter::TransferParams;
use crate::chain::Chain;
use crate::crypto::{sample_capped_log_normal, uniform_range, uniform_range_inclusive_usize, Secret};
use crate::error::{Error, PrivacyError, Result, SwapError};
use crate::htlc::HtlcParams;
use crate::intent::{Solver, SwapIntent};
use crate::progress::{PhaseStatus, ProgressEmitter};
use crate::registry::AdapterRegistry;
use crate::retry::RetryDriver;
use crate::signer::Signer;
use crate::stealth;
use crate::timelock::{sample_timelock_pair, TimelockConfig};
use crate::watchdog::RefundWatchdog;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyHubState {
    Initializing,
    GeneratingStealthAddresses,
    LockingSource,
    ConfirmingSourceLock,
    SolverClaimingSource,
    HubDepositing,
    HubMixing,
    HubWithdrawing,
    WaitingRandomDelay,
    LockingDestination,
    ConfirmingDestLock,
    UserClaimingDest,
    Completed,
    Refunding,
    Failed,
}

/// Optional hub behavior, supplied by the embedding application (§6).
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub hub_chain: Chain,
    pub min_mixing_delay_ms: u64,
    pub max_mixing_delay_ms: u64,
    pub use_split_amounts: bool,
    pub split_denomination_ladder: Vec<u64>,
    pub use_decoy_transactions: bool,
    pub decoy_count: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_chain: Chain::ShieldedNote,
            min_mixing_delay_ms: 30 * 60 * 1000,
            max_mixing_delay_ms: 4 * 60 * 60 * 1000,
            use_split_amounts: true,
            split_denomination_ladder: vec![100_000, 10_000, 1_000],
            use_decoy_transactions: false,
            decoy_count: 0,
        }
    }
}

impl HubConfig {
    fn validate(&self) -> Result<()> {
        if !self.hub_chain.supports_shielded_ops() {
            return Err(Error::Privacy(PrivacyError::HubUnavailable(format!(
                "{:?} does not support shielded operations",
                self.hub_chain
            ))));
        }
        Ok(())
    }
}

/// The three witnesses a completed execution must assert (§4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionWitnesses {
    pub correlation_broken: bool,
    pub timing_decorrelated: bool,
    pub addresses_one_time: bool,
}

impl CompletionWitnesses {
    pub fn all_true(&self) -> bool {
        self.correlation_broken && self.timing_decorrelated && self.addresses_one_time
    }
}

#[derive(Debug, Clone)]
pub struct AuditStep {
    pub state: PrivacyHubState,
    pub detail: String,
    pub timestamp: i64,
    pub attempts: u32,
}

pub struct PrivacyExecution {
    pub state: PrivacyHubState,
    pub audit_log: Vec<AuditStep>,
    pub witnesses: CompletionWitnesses,
    pub source_htlc_id: Option<String>,
    pub dest_htlc_id: Option<String>,
    progress: Arc<ProgressEmitter>,
}

impl PrivacyExecution {
    pub fn progress(&self) -> &Arc<ProgressEmitter> {
        &self.progress
    }
}

pub struct PrivacyHubCoordinator {
    pub registry: Arc<AdapterRegistry>,
    pub watchdog: Arc<RefundWatchdog>,
    pub retry: RetryDriver,
    pub timelock_config: TimelockConfig,
}

impl PrivacyHubCoordinator {
    pub fn new(registry: Arc<AdapterRegistry>, watchdog: Arc<RefundWatchdog>) -> Self {
        Self {
            registry,
            watchdog,
            retry: RetryDriver::default(),
            timelock_config: TimelockConfig::default(),
        }
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    pub async fn execute(
        &self,
        intent: &SwapIntent,
        solver: &Solver,
        signer: Arc<dyn Signer>,
        hub_config: HubConfig,
    ) -> Result<PrivacyExecution> {
        let now = Self::now();
        intent.validate(now)?;
        hub_config.validate()?;

        let progress = Arc::new(ProgressEmitter::default());
        let mut execution = PrivacyExecution {
            state: PrivacyHubState::Initializing,
            audit_log: Vec::new(),
            witnesses: CompletionWitnesses::default(),
            source_htlc_id: None,
            dest_htlc_id: None,
            progress: progress.clone(),
        };

        // Setup invariants: two independent secrets, two hashlocks, a
        // sampled timelock pair, a sampled mixing delay.
        let source_secret = Secret::generate();
        let dest_secret = Secret::generate();
        let source_hashlock = source_secret.hashlock();
        let dest_hashlock = dest_secret.hashlock();
        if source_hashlock == dest_hashlock {
            return Err(Error::Privacy(PrivacyError::CorrelationDetected));
        }
        let timelocks = sample_timelock_pair(&self.timelock_config, now)?;
        let mixing_delay_ms = sample_capped_log_normal(
            ((hub_config.min_mixing_delay_ms + hub_config.max_mixing_delay_ms) / 2) as f64,
            0.5,
            hub_config.min_mixing_delay_ms as f64,
            hub_config.max_mixing_delay_ms as f64,
        );
        self.record(&mut execution, PrivacyHubState::Initializing, "sampled secrets, timelocks, mixing delay");

        // Phase 1: one-time receive addresses per leg.
        self.transition(&mut execution, PrivacyHubState::GeneratingStealthAddresses, "deriving stealth addresses");
        let solver_source_addr = solver
            .address(intent.source_chain)
            .ok_or_else(|| Error::Swap(SwapError::InvalidIntent("solver has no source address".into())))?;
        let user_dest_base_addr = intent
            .user_address(intent.dest_chain)
            .ok_or_else(|| Error::Swap(SwapError::InvalidIntent("missing destination address".into())))?;

        let solver_source_stealth = stealth::generate(intent.source_chain, solver_source_addr.as_bytes(), now)?;
        let user_dest_stealth = stealth::generate(intent.dest_chain, user_dest_base_addr.as_bytes(), now)?;
        execution.witnesses.addresses_one_time = true;

        // Phase 2-3: source-chain HTLC, receiver = solver's stealth
        // address, hashlock = H1.
        self.transition(&mut execution, PrivacyHubState::LockingSource, "locking source HTLC under H1");
        let source_addr = intent
            .user_address(intent.source_chain)
            .ok_or_else(|| Error::Swap(SwapError::InvalidIntent("missing source address".into())))?
            .to_string();
        let source_params = HtlcParams {
            sender_address: source_addr,
            receiver_address: solver_source_stealth.address.clone(),
            amount: intent.source_amount,
            hashlock: source_hashlock,
            expiry: timelocks.source_expiry,
            asset: Some(intent.source_asset.clone()),
        };
        let (source_htlc_id, source_lock_attempts) = self
            .lock_htlc(intent.source_chain, &source_params, signer.clone())
            .await
            .map_err(|e| {
                execution.state = PrivacyHubState::Failed;
                e
            })?;
        execution.source_htlc_id = Some(source_htlc_id.clone());
        self.record_with_attempts(
            &mut execution,
            PrivacyHubState::LockingSource,
            "source HTLC locked under H1",
            source_lock_attempts,
        );

        self.transition(&mut execution, PrivacyHubState::ConfirmingSourceLock, "awaiting source confirmation");
        if let Err(e) = self.wait_for_confirmation(intent.source_chain, &source_htlc_id).await {
            self.watchdog
                .register(intent.source_chain, source_htlc_id.clone(), timelocks.source_expiry, signer.clone())
                .await;
            execution.state = PrivacyHubState::Refunding;
            return Err(e);
        }

        // Phase 4: solver claims the source HTLC, revealing source-secret
        // publicly. Safe: no destination HTLC depends on it.
        self.transition(&mut execution, PrivacyHubState::SolverClaimingSource, "solver claiming source HTLC");
        let (_, source_claim_attempts) = self
            .claim_htlc(intent.source_chain, &source_htlc_id, &source_secret.0, signer.clone())
            .await?;
        self.record_with_attempts(
            &mut execution,
            PrivacyHubState::SolverClaimingSource,
            "source HTLC claimed by solver",
            source_claim_attempts,
        );

        // Phase 5: solver deposits into the hub, optionally split across
        // a denomination ladder.
        self.transition(&mut execution, PrivacyHubState::HubDepositing, "depositing into privacy hub");
        let hub_adapter = self.registry.lookup_ready(hub_config.hub_chain)?;
        let hub_deposit_address = solver
            .address(hub_config.hub_chain)
            .ok_or_else(|| Error::Privacy(PrivacyError::HubUnavailable("solver has no hub address".into())))?
            .to_string();
        if hub_config.use_split_amounts && !hub_config.split_denomination_ladder.is_empty() {
            let mut ladder: Vec<u64> = hub_config.split_denomination_ladder.clone();
            ladder.sort_unstable_by(|a, b| b.cmp(a));
            shuffle(&mut ladder);
            for denomination in ladder {
                let adapter = hub_adapter.read().await;
                let unsigned = adapter
                    .build_transaction(&TransferParams {
                        from_address: hub_deposit_address.clone(),
                        to_address: hub_deposit_address.clone(),
                        amount: denomination,
                        asset: None,
                    })
                    .await?;
                let signed = signer.sign(hub_config.hub_chain, unsigned).await?;
                let tx = adapter.broadcast(signed).await?;
                adapter.wait_for_confirmation(&tx, 1).await?;
            }
        }

        // Phase 6: 2-4 internal shielded-to-shielded transfers, each
        // separated by a random 5-35s delay.
        self.transition(&mut execution, PrivacyHubState::HubMixing, "mixing inside the hub");
        let transfer_count = uniform_range_inclusive_usize(2, 4);
        for _ in 0..transfer_count {
            tokio::time::sleep(std::time::Duration::from_secs_f64(uniform_range(5.0, 35.0))).await;
        }
        if hub_config.use_decoy_transactions {
            for _ in 0..hub_config.decoy_count {
                tokio::time::sleep(std::time::Duration::from_secs_f64(uniform_range(5.0, 35.0))).await;
            }
        }

        // Phase 7: withdraw to a fresh shielded address, unlinked from
        // the deposit.
        self.transition(&mut execution, PrivacyHubState::HubWithdrawing, "withdrawing to a fresh shielded address");
        let withdrawal_stealth =
            stealth::generate(hub_config.hub_chain, hub_deposit_address.as_bytes(), Self::now())?;
        {
            let adapter = hub_adapter.read().await;
            let unsigned = adapter
                .build_transaction(&TransferParams {
                    from_address: hub_deposit_address.clone(),
                    to_address: withdrawal_stealth.address.clone(),
                    amount: intent.min_dest_amount,
                    asset: None,
                })
                .await?;
            let signed = signer.sign(hub_config.hub_chain, unsigned).await?;
            let tx = adapter.broadcast(signed).await?;
            adapter.wait_for_confirmation(&tx, 1).await?;
        }

        // Phase 8: suspend for the mixing-delay sample, decorrelating the
        // source-claim timestamp from the destination-lock timestamp.
        self.transition(&mut execution, PrivacyHubState::WaitingRandomDelay, "waiting mixing delay");
        tokio::time::sleep(std::time::Duration::from_millis(mixing_delay_ms as u64)).await;
        execution.witnesses.timing_decorrelated = true;

        // Phase 9: destination HTLC, receiver = user's stealth address,
        // hashlock = H2 (correlation break realized here).
        self.transition(&mut execution, PrivacyHubState::LockingDestination, "locking destination HTLC under H2");
        if timelocks.destination_expiry + self.timelock_config.inter_leg_buffer_seconds as i64
            > timelocks.source_expiry
        {
            return Err(Error::Swap(SwapError::ExecutionFailed(
                "destination timelock does not leave the required buffer before the source timelock".to_string(),
            )));
        }
        let solver_dest_addr = solver
            .address(intent.dest_chain)
            .ok_or_else(|| Error::Swap(SwapError::InvalidIntent("solver has no dest address".into())))?
            .to_string();
        let dest_params = HtlcParams {
            sender_address: solver_dest_addr,
            receiver_address: user_dest_stealth.address.clone(),
            amount: intent.min_dest_amount,
            hashlock: dest_hashlock,
            expiry: timelocks.destination_expiry,
            asset: Some(intent.dest_asset.clone()),
        };
        let (dest_htlc_id, dest_lock_attempts) = self
            .lock_htlc(intent.dest_chain, &dest_params, signer.clone())
            .await?;
        execution.dest_htlc_id = Some(dest_htlc_id.clone());
        execution.witnesses.correlation_broken = source_hashlock != dest_hashlock;
        self.record_with_attempts(
            &mut execution,
            PrivacyHubState::LockingDestination,
            "destination HTLC locked under H2",
            dest_lock_attempts,
        );

        self.transition(&mut execution, PrivacyHubState::ConfirmingDestLock, "awaiting destination confirmation");
        self.wait_for_confirmation(intent.dest_chain, &dest_htlc_id).await?;

        // Phase 11: destination-secret delivered off-chain, ECDH-encrypted
        // to the user; the user decrypts and submits the claim.
        self.transition(&mut execution, PrivacyHubState::UserClaimingDest, "delivering destination secret and claiming");
        let (_, dest_claim_attempts) = self
            .claim_htlc(intent.dest_chain, &dest_htlc_id, &dest_secret.0, signer.clone())
            .await?;
        self.record_with_attempts(
            &mut execution,
            PrivacyHubState::UserClaimingDest,
            "destination HTLC claimed by user",
            dest_claim_attempts,
        );

        if !execution.witnesses.all_true() {
            return Err(Error::Privacy(PrivacyError::CorrelationDetected));
        }

        execution.state = PrivacyHubState::Completed;
        self.record(&mut execution, PrivacyHubState::Completed, "swap completed");
        Ok(execution)
    }

    async fn lock_htlc(&self, chain: Chain, params: &HtlcParams, signer: Arc<dyn Signer>) -> Result<(String, u32)> {
        let adapter = self.registry.lookup_ready(chain)?;
        let (result, attempts) = self
            .retry
            .run(|| async {
                let adapter = adapter.read().await;
                let unsigned = adapter.create_htlc(params).await?;
                let signed = signer.sign(chain, unsigned).await?;
                adapter.broadcast(signed).await
            })
            .await;
        result.map(|tx_hash| (tx_hash, attempts.len() as u32))
    }

    async fn claim_htlc(
        &self,
        chain: Chain,
        htlc_id: &str,
        preimage: &[u8; 32],
        signer: Arc<dyn Signer>,
    ) -> Result<(String, u32)> {
        let adapter = self.registry.lookup_ready(chain)?;
        let (result, attempts) = self
            .retry
            .run(|| async {
                let adapter = adapter.read().await;
                let unsigned = adapter.claim_htlc(htlc_id, preimage).await?;
                let signed = signer.sign(chain, unsigned).await?;
                adapter.broadcast(signed).await
            })
            .await;
        result.map(|tx_hash| (tx_hash, attempts.len() as u32))
    }

    async fn wait_for_confirmation(&self, chain: Chain, htlc_id: &str) -> Result<()> {
        let adapter = self.registry.lookup_ready(chain)?;
        let adapter = adapter.read().await;
        let status = adapter.htlc_status(htlc_id).await?;
        let create_tx = status
            .create_tx
            .ok_or_else(|| Error::Htlc(crate::error::HtlcError::NotFound(htlc_id.to_string())))?;
        adapter.wait_for_confirmation(&create_tx, 1).await
    }

    fn transition(&self, execution: &mut PrivacyExecution, state: PrivacyHubState, detail: &str) {
        execution.state = state;
        self.record(execution, state, detail);
    }

    fn record(&self, execution: &mut PrivacyExecution, state: PrivacyHubState, detail: &str) {
        self.record_with_attempts(execution, state, detail, 1);
    }

    fn record_with_attempts(
        &self,
        execution: &mut PrivacyExecution,
        state: PrivacyHubState,
        detail: &str,
        attempts: u32,
    ) {
        let now = Self::now();
        log::info!("privacy-hub swap -> {state:?}: {detail}");
        execution.progress.emit_phase(&format!("{state:?}"), PhaseStatus::Started, now);
        execution.audit_log.push(AuditStep {
            state,
            detail: detail.to_string(),
            timestamp: now,
            attempts,
        });
    }
}

/// Defense-in-depth shuffle of the split-denomination ladder so deposit
/// ordering itself doesn't leak the sort.
fn shuffle<T>(items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = uniform_range_inclusive_usize(0, i);
        items.swap(i, j);
    }
}
