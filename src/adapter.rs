//! [`ChainAdapter`]: the closed capability contract every chain
//! implementation must satisfy (§4.1). Coordinators, the registry, and
//! the watchdog all drive swaps purely through this trait; none of them
//! ever match on [`crate::chain::Chain`] to special-case behavior.

use crate::chain::{Asset, Chain};
use crate::error::Result;
use crate::htlc::{HtlcParams, HtlcStatus};
use async_trait::async_trait;
use std::pin::Pin;

/// An unsigned transaction, opaque outside the adapter that built it. Each
/// adapter defines its own concrete representation internally and only
/// ever hands this token back to its own `sign_transaction`/`broadcast`.
pub type UnsignedTransaction = Vec<u8>;

/// A signed transaction, ready to broadcast. Opaque for the same reason.
pub type SignedTransaction = Vec<u8>;

/// Key material used to sign. Adapters interpret this however their
/// chain's signature regime requires (ECDSA, EdDSA, Schnorr, ...); the
/// core never inspects it.
pub type KeyMaterial = Vec<u8>;

/// A boxed stream of address-activity events, as produced by
/// `subscribe_address`. Dropping the handle returned alongside it cancels
/// the subscription (§6 concurrency model: consumer-driven cancellation).
pub type EventStream = Pin<Box<dyn futures::Stream<Item = AddressEvent> + Send>>;

/// A single observed event on a subscribed address.
#[derive(Debug, Clone)]
pub struct AddressEvent {
    pub tx_hash: String,
    pub amount: u64,
    pub confirmations: u32,
}

/// A cancellation handle for an active subscription. Dropping it is the
/// only way to stop the underlying poll/stream task; there is no
/// `unsubscribe` method because cancellation is expressed as ownership.
pub struct SubscriptionHandle {
    _cancel: tokio::sync::oneshot::Sender<()>,
}

impl SubscriptionHandle {
    pub fn new(cancel: tokio::sync::oneshot::Sender<()>) -> Self {
        Self { _cancel: cancel }
    }
}

/// A transaction as observed on-chain.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ObservedTransaction {
    pub tx_hash: String,
    pub confirmations: u32,
    pub block_height: Option<u64>,
}

/// Parameters for building a plain value-transfer transaction (used by
/// the privacy hub's split-denomination deposits and internal shielded
/// transfers, and by watchdog refunds).
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub from_address: String,
    pub to_address: String,
    pub amount: u64,
    pub asset: Option<Asset>,
}

/// The capability set every chain implementation exposes. Closed: the
/// core dispatches only through this trait, never by downcasting to a
/// concrete adapter type.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    /// Perform any connection setup (RPC client, endpoint health check).
    /// Must be called, and must succeed, before any other method.
    async fn initialize(&mut self) -> Result<()>;

    /// Derive this chain's address encoding from raw public key bytes.
    fn derive_address(&self, public_key: &[u8]) -> Result<String>;

    /// Query the balance of `address`, optionally for a specific asset
    /// (native asset when `None`).
    async fn balance(&self, address: &str, asset: Option<&Asset>) -> Result<u64>;

    /// Build an unsigned plain transfer. Pure assembly from endpoint
    /// state; the concrete representation (UTXO selection, nonce + gas,
    /// slot + fee, account-id + note-script, ...) is internal to each
    /// adapter.
    async fn build_transaction(&self, params: &TransferParams) -> Result<UnsignedTransaction>;

    /// Build an unsigned HTLC-creation transaction. The adapter chooses
    /// the realization (P2SH script, contract call, note script, zkApp
    /// method); callers never see the form.
    async fn create_htlc(&self, params: &HtlcParams) -> Result<UnsignedTransaction>;

    /// Build an unsigned HTLC claim, revealing `preimage`.
    async fn claim_htlc(&self, htlc_id: &str, preimage: &[u8; 32]) -> Result<UnsignedTransaction>;

    /// Build an unsigned HTLC refund. Fails with
    /// [`crate::error::HtlcError::TimelockNotExpired`] if the chain
    /// enforces the timelock and it has not yet passed.
    async fn refund_htlc(&self, htlc_id: &str) -> Result<UnsignedTransaction>;

    /// Sign an unsigned transaction with `key`.
    fn sign_transaction(
        &self,
        unsigned: UnsignedTransaction,
        key: &KeyMaterial,
    ) -> Result<SignedTransaction>;

    /// Submit a signed transaction, returning its chain-native hash/ID.
    async fn broadcast(&self, signed: SignedTransaction) -> Result<String>;

    /// Look up the current status of an HTLC by its chain-native
    /// identifier (contract address, UTXO outpoint, account ID, ...).
    async fn htlc_status(&self, htlc_id: &str) -> Result<HtlcStatus>;

    /// Subscribe to activity on `address`. The returned stream yields
    /// events until the paired [`SubscriptionHandle`] is dropped.
    async fn subscribe_address(&self, address: &str) -> Result<(EventStream, SubscriptionHandle)>;

    /// Fetch a transaction by hash.
    async fn get_transaction(&self, tx_hash: &str) -> Result<ObservedTransaction>;

    /// Current block height (or slot number, for slot-based chains).
    async fn block_height(&self) -> Result<u64>;

    /// Confirmations for a given transaction hash.
    async fn confirmations(&self, tx_hash: &str) -> Result<u32>;

    /// Whether `tx_hash` has reached this chain's finality threshold
    /// (§3: `confirmations >= finality_confirmations()`).
    async fn is_finalized(&self, tx_hash: &str) -> Result<bool> {
        Ok(self.confirmations(tx_hash).await? >= self.chain().finality_confirmations())
    }

    /// Estimate of this chain's current block/slot time, in milliseconds.
    /// Adapters for `SlotNumber`/`BlockHeight` chains derive this from a
    /// live measurement over the last 100 blocks rather than the nominal
    /// constant, since slot/block production can drift under load.
    async fn block_time_ms(&self) -> Result<u64> {
        Ok(self.chain().nominal_block_time().as_millis() as u64)
    }

    /// Estimate the native-asset fee/gas cost of broadcasting `unsigned`.
    async fn estimate_gas(&self, unsigned: &UnsignedTransaction) -> Result<u64>;

    /// Poll until `tx_hash` reaches `confirmations_needed`, or return a
    /// [`crate::error::TransactionError::ConfirmationTimeout`] after the
    /// adapter's own timeout budget.
    async fn wait_for_confirmation(&self, tx_hash: &str, confirmations_needed: u32) -> Result<()>;
}
