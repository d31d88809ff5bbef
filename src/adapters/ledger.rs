//! Local HTLC bookkeeping shared by every adapter.
//!
//! Actual node RPC transport is an external collaborator the core only
//! specifies at its contract boundary (§1), so each adapter keeps a
//! small local cache of the HTLCs it has built, indexed by the
//! chain-native identifier it mints, and answers `htlc_status` from that
//! cache rather than re-deriving state a live node would otherwise hold.

use crate::crypto::Hashlock;
use crate::htlc::{HtlcState, HtlcStatus};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct HtlcLedger {
    entries: Mutex<HashMap<String, HtlcStatus>>,
}

impl HtlcLedger {
    pub fn insert(
        &self,
        htlc_id: String,
        amount: u64,
        hashlock: Hashlock,
        expiry: i64,
        receiver_address: String,
    ) {
        self.entries.lock().unwrap().insert(
            htlc_id.clone(),
            HtlcStatus {
                state: HtlcState::Pending,
                create_tx: None,
                claim_tx: None,
                refund_tx: None,
                amount,
                hashlock,
                expiry,
                receiver_address,
            },
        );
    }

    pub fn mark_created(&self, htlc_id: &str, create_tx: String) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(htlc_id) {
            entry.state = HtlcState::Locked;
            entry.create_tx = Some(create_tx);
        }
    }

    pub fn mark_claimed(&self, htlc_id: &str, claim_tx: String) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(htlc_id) {
            entry.state = HtlcState::Claimed;
            entry.claim_tx = Some(claim_tx);
        }
    }

    pub fn mark_refunded(&self, htlc_id: &str, refund_tx: String) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(htlc_id) {
            entry.state = HtlcState::Refunded;
            entry.refund_tx = Some(refund_tx);
        }
    }

    pub fn get(&self, htlc_id: &str, now: i64) -> Option<HtlcStatus> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(htlc_id)?;
        entry.refresh_expiry(now);
        Some(entry.clone())
    }
}
