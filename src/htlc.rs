//! HTLC parameters and observed status (§3 data model).

use crate::crypto::Hashlock;
use serde::{Deserialize, Serialize};

/// Which lifecycle transition a broadcast transaction represents, so an
/// adapter's `broadcast` can update the local ledger without having to
/// reverse-engineer it from wire-format payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcOp {
    Create,
    Claim,
    Refund,
}

/// Inputs that define a hash time-locked contract lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcParams {
    pub sender_address: String,
    pub receiver_address: String,
    pub amount: u64,
    pub hashlock: Hashlock,
    /// Absolute expiry, UNIX seconds.
    pub expiry: i64,
    pub asset: Option<crate::chain::Asset>,
}

impl HtlcParams {
    /// Validate the invariants from §3: amount > 0; hashlock is 32 bytes
    /// (guaranteed by the [`Hashlock`] type); expiry strictly in the
    /// future relative to `now`.
    pub fn validate(&self, now: i64) -> crate::error::Result<()> {
        if self.amount == 0 {
            return Err(crate::error::Error::Swap(
                crate::error::SwapError::InvalidIntent("HTLC amount must be > 0".to_string()),
            ));
        }
        if self.expiry <= now {
            return Err(crate::error::Error::Swap(
                crate::error::SwapError::InvalidIntent(
                    "HTLC expiry must be strictly in the future".to_string(),
                ),
            ));
        }
        Ok(())
    }
}

/// Observed lifecycle state of an HTLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcState {
    Pending,
    Locked,
    Claimed,
    Refunded,
    Expired,
}

/// Full observed status of an HTLC, as returned by
/// [`crate::adapter::ChainAdapter::htlc_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcStatus {
    pub state: HtlcState,
    pub create_tx: Option<String>,
    pub claim_tx: Option<String>,
    pub refund_tx: Option<String>,
    pub amount: u64,
    pub hashlock: Hashlock,
    pub expiry: i64,
    pub receiver_address: String,
}

impl HtlcStatus {
    /// Recompute `state` from `now` when the chain itself does not push
    /// expiry transitions (most adapters observe Claimed/Refunded
    /// directly from a spend; Expired is a wall-clock-derived state when
    /// neither a claim nor refund has been observed).
    pub fn refresh_expiry(&mut self, now: i64) {
        if matches!(self.state, HtlcState::Locked | HtlcState::Pending) && self.expiry <= now {
            self.state = HtlcState::Expired;
        }
    }
}
