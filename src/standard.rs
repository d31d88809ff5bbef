//! Standard swap coordinator (§4.3): same-hashlock, five-step atomic
//! swap. The baseline protocol — one secret, shared by both legs.

use crate::chain::Chain;
use crate::crypto::Secret;
use crate::error::{Error, HtlcError, Result, SwapError};
use crate::htlc::HtlcParams;
use crate::intent::{Solver, SwapIntent};
use crate::progress::{PhaseStatus, ProgressEmitter};
use crate::registry::AdapterRegistry;
use crate::retry::RetryDriver;
use crate::signer::Signer;
use crate::watchdog::RefundWatchdog;
use std::sync::Arc;

/// User-side and solver-side timelock offsets from the protocol default
/// (§4.3 step 2): 3600s / 1800s, with a mandatory >= 1800s safety buffer.
const USER_TIMELOCK_OFFSET_SECONDS: i64 = 3600;
const SOLVER_TIMELOCK_OFFSET_SECONDS: i64 = 1800;
const SAFETY_BUFFER_SECONDS: i64 = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardState {
    Initializing,
    LockingSource,
    ConfirmingLock,
    ReleasingDest,
    ConfirmingRelease,
    Completing,
    Completed,
    Refunding,
    Refunded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct AuditStep {
    pub state: StandardState,
    pub detail: String,
    pub timestamp: i64,
    pub attempts: u32,
}

pub struct StandardExecution {
    pub state: StandardState,
    pub audit_log: Vec<AuditStep>,
    pub source_htlc_id: Option<String>,
    pub dest_htlc_id: Option<String>,
    progress: Arc<ProgressEmitter>,
}

impl StandardExecution {
    pub fn progress(&self) -> &Arc<ProgressEmitter> {
        &self.progress
    }
}

pub struct StandardCoordinator {
    pub registry: Arc<AdapterRegistry>,
    pub watchdog: Arc<RefundWatchdog>,
    pub retry: RetryDriver,
}

impl StandardCoordinator {
    pub fn new(registry: Arc<AdapterRegistry>, watchdog: Arc<RefundWatchdog>) -> Self {
        Self {
            registry,
            watchdog,
            retry: RetryDriver::default(),
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
    ) -> Result<StandardExecution> {
        let now = Self::now();
        intent.validate(now)?;

        let progress = Arc::new(ProgressEmitter::default());
        let mut execution = StandardExecution {
            state: StandardState::Initializing,
            audit_log: Vec::new(),
            source_htlc_id: None,
            dest_htlc_id: None,
            progress: progress.clone(),
        };
        self.record(&mut execution, StandardState::Initializing, "validated intent");

        // Step 1-2: single shared secret, two timelocks with the
        // mandatory safety buffer.
        let secret = Secret::generate();
        let hashlock = secret.hashlock();
        let user_timelock = now + USER_TIMELOCK_OFFSET_SECONDS;
        let solver_timelock = now + SOLVER_TIMELOCK_OFFSET_SECONDS;
        if user_timelock - solver_timelock < SAFETY_BUFFER_SECONDS {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "user/solver timelock safety buffer violated".to_string(),
            )));
        }

        let source_addr = intent
            .user_address(intent.source_chain)
            .ok_or_else(|| Error::Swap(SwapError::InvalidIntent("missing source address".into())))?
            .to_string();
        let solver_source_addr = solver
            .address(intent.source_chain)
            .ok_or_else(|| Error::Swap(SwapError::InvalidIntent("solver has no source address".into())))?
            .to_string();

        // Step 3: lock source HTLC, user -> solver.
        self.transition(&mut execution, StandardState::LockingSource, "building source HTLC");
        let source_params = HtlcParams {
            sender_address: source_addr.clone(),
            receiver_address: solver_source_addr.clone(),
            amount: intent.source_amount,
            hashlock,
            expiry: user_timelock,
            asset: Some(intent.source_asset.clone()),
        };
        let (source_htlc_id, source_lock_attempts) = self
            .lock_htlc(intent.source_chain, &source_params, signer.clone())
            .await
            .map_err(|e| {
                execution.state = StandardState::Failed;
                e
            })?;
        execution.source_htlc_id = Some(source_htlc_id.clone());
        self.record_with_attempts(
            &mut execution,
            StandardState::LockingSource,
            "source HTLC locked",
            source_lock_attempts,
        );
        progress.emit_phase_with_tx(
            "LockingSource",
            PhaseStatus::Succeeded,
            source_htlc_id.clone(),
            Self::now(),
        );

        // Step 4: wait for source confirmation, or fail over to Refunding.
        self.transition(&mut execution, StandardState::ConfirmingLock, "awaiting source confirmation");
        if let Err(e) = self
            .wait_for_source_confirmation(intent.source_chain, &source_htlc_id)
            .await
        {
            self.begin_refund(
                &mut execution,
                intent.source_chain,
                source_htlc_id.clone(),
                user_timelock,
                signer.clone(),
            )
            .await;
            return Err(e);
        }

        // Step 5: lock destination HTLC, solver -> user, same hashlock,
        // shorter solver-side timelock.
        self.transition(&mut execution, StandardState::ReleasingDest, "building destination HTLC");
        let dest_addr = intent
            .user_address(intent.dest_chain)
            .ok_or_else(|| Error::Swap(SwapError::InvalidIntent("missing destination address".into())))?
            .to_string();
        let solver_dest_addr = solver
            .address(intent.dest_chain)
            .ok_or_else(|| Error::Swap(SwapError::InvalidIntent("solver has no dest address".into())))?
            .to_string();
        let dest_params = HtlcParams {
            sender_address: solver_dest_addr,
            receiver_address: dest_addr,
            amount: intent.min_dest_amount,
            hashlock,
            expiry: solver_timelock,
            asset: Some(intent.dest_asset.clone()),
        };
        let (dest_htlc_id, dest_lock_attempts) = self
            .lock_htlc(intent.dest_chain, &dest_params, signer.clone())
            .await
            .map_err(|e| {
                execution.state = StandardState::Failed;
                e
            })?;
        execution.dest_htlc_id = Some(dest_htlc_id.clone());
        self.record_with_attempts(
            &mut execution,
            StandardState::ReleasingDest,
            "destination HTLC locked",
            dest_lock_attempts,
        );

        // Step 6: wait for destination confirmation.
        self.transition(
            &mut execution,
            StandardState::ConfirmingRelease,
            "awaiting destination confirmation",
        );
        if let Err(e) = self
            .wait_for_source_confirmation(intent.dest_chain, &dest_htlc_id)
            .await
        {
            self.begin_refund(
                &mut execution,
                intent.source_chain,
                source_htlc_id.clone(),
                user_timelock,
                signer.clone(),
            )
            .await;
            return Err(e);
        }

        // Ordering gate: validate the observed destination HTLC before
        // claiming against it (hashlock, amount, receiver, timelock
        // strictly inside the safety buffer).
        self.validate_destination_htlc(
            intent.dest_chain,
            &dest_htlc_id,
            hashlock,
            intent.min_dest_amount,
            &dest_params.receiver_address,
            user_timelock,
        )
        .await?;

        // Step 7: claim destination HTLC, revealing the secret.
        self.transition(&mut execution, StandardState::Completing, "claiming destination HTLC");
        let dest_adapter = self.registry.lookup_ready(intent.dest_chain)?;
        let (result, attempts) = self
            .retry
            .run(|| async {
                let adapter = dest_adapter.read().await;
                let unsigned = adapter.claim_htlc(&dest_htlc_id, &secret.0).await?;
                let signed = signer.sign(intent.dest_chain, unsigned).await?;
                adapter.broadcast(signed).await
            })
            .await;
        let claim_tx = result.map_err(|e| {
            execution.state = StandardState::Failed;
            e
        })?;
        self.record_with_attempts(
            &mut execution,
            StandardState::Completing,
            "destination HTLC claimed",
            attempts.len() as u32,
        );
        progress.emit_phase_with_tx("Completing", PhaseStatus::Succeeded, claim_tx, Self::now());

        execution.state = StandardState::Completed;
        self.record(&mut execution, StandardState::Completed, "swap completed");
        Ok(execution)
    }

    async fn lock_htlc(
        &self,
        chain: Chain,
        params: &HtlcParams,
        signer: Arc<dyn Signer>,
    ) -> Result<(String, u32)> {
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

    async fn wait_for_source_confirmation(&self, chain: Chain, htlc_id: &str) -> Result<()> {
        let adapter = self.registry.lookup_ready(chain)?;
        let adapter = adapter.read().await;
        let status = adapter.htlc_status(htlc_id).await?;
        let create_tx = status
            .create_tx
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))?;
        adapter.wait_for_confirmation(&create_tx, 1).await
    }

    async fn validate_destination_htlc(
        &self,
        chain: Chain,
        htlc_id: &str,
        expected_hashlock: crate::crypto::Hashlock,
        expected_amount: u64,
        expected_receiver: &str,
        user_timelock: i64,
    ) -> Result<()> {
        let adapter = self.registry.lookup_ready(chain)?;
        let adapter = adapter.read().await;
        let status = adapter.htlc_status(htlc_id).await?;
        if status.hashlock != expected_hashlock {
            return Err(Error::Swap(SwapError::ExecutionFailed(
                "destination HTLC hashlock mismatch".to_string(),
            )));
        }
        if status.amount < expected_amount {
            return Err(Error::Swap(SwapError::ExecutionFailed(
                "destination HTLC amount is below the quoted minimum".to_string(),
            )));
        }
        if status.receiver_address != expected_receiver {
            return Err(Error::Swap(SwapError::ExecutionFailed(
                "destination HTLC receiver does not match the user's address".to_string(),
            )));
        }
        if status.expiry >= user_timelock - SAFETY_BUFFER_SECONDS {
            return Err(Error::Swap(SwapError::ExecutionFailed(
                "destination timelock does not leave the required safety buffer".to_string(),
            )));
        }
        Ok(())
    }

    async fn begin_refund(
        &self,
        execution: &mut StandardExecution,
        chain: Chain,
        htlc_id: String,
        refund_after: i64,
        signer: Arc<dyn Signer>,
    ) {
        self.transition(execution, StandardState::Refunding, "registering refund with watchdog");
        self.watchdog.register(chain, htlc_id, refund_after, signer).await;
    }

    fn transition(&self, execution: &mut StandardExecution, state: StandardState, detail: &str) {
        execution.state = state;
        self.record(execution, state, detail);
    }

    fn record(&self, execution: &mut StandardExecution, state: StandardState, detail: &str) {
        self.record_with_attempts(execution, state, detail, 1);
    }

    fn record_with_attempts(
        &self,
        execution: &mut StandardExecution,
        state: StandardState,
        detail: &str,
        attempts: u32,
    ) {
        let now = Self::now();
        log::info!("standard swap -> {state:?}: {detail}");
        execution.progress.emit_phase(&format!("{state:?}"), PhaseStatus::Started, now);
        execution.audit_log.push(AuditStep {
            state,
            detail: detail.to_string(),
            timestamp: now,
            attempts,
        });
    }
}
