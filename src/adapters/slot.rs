//! Slot-based chain adapter: HTLC realized as a program account, amounts
//! carried as instruction payloads, timelocks expressed in slot numbers
//! rather than wall-clock seconds. Block/slot duration is measured from
//! the last 100 slots rather than assumed (§4.1 timelock bridging).

use crate::adapter::{
    AddressEvent, ChainAdapter, EventStream, ObservedTransaction, SubscriptionHandle,
    TransferParams,
};
use crate::adapters::ledger::HtlcLedger;
use crate::adapters::rpc::RpcTransport;
use crate::chain::{Asset, Chain};
use crate::crypto::sha256;
use crate::error::{Error, HtlcError, Result, TransactionError};
use crate::htlc::{HtlcOp, HtlcParams, HtlcStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnsignedSlotTx {
    program_id: String,
    accounts: Vec<String>,
    instruction_data: String,
    recent_slot: u64,
    htlc_id: Option<String>,
    op: Option<HtlcOp>,
}

pub struct SlotChainAdapter {
    transport: RpcTransport,
    htlc_program_id: String,
    ledger: HtlcLedger,
    initialized: bool,
}

impl SlotChainAdapter {
    pub fn new(endpoint: impl Into<String>, htlc_program_id: impl Into<String>) -> Self {
        Self {
            transport: RpcTransport::new(endpoint),
            htlc_program_id: htlc_program_id.into(),
            ledger: HtlcLedger::default(),
            initialized: false,
        }
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Adapter(crate::error::AdapterError::NotInitialized(
                Chain::SlotChain,
            )))
        }
    }

    /// Measured average slot duration over the last 100 slots, rather than
    /// the nominal constant (§4.1).
    async fn measured_slot_duration_ms(&self) -> Result<u64> {
        #[derive(Deserialize)]
        struct SlotTiming {
            slot_start: u64,
            slot_end: u64,
            start_unix_ms: u64,
            end_unix_ms: u64,
        }
        let timing: SlotTiming = self
            .transport
            .get_json("/slot/timing?window=100")
            .await?;
        let slots = timing.slot_end.saturating_sub(timing.slot_start).max(1);
        let elapsed = timing.end_unix_ms.saturating_sub(timing.start_unix_ms);
        Ok((elapsed / slots).max(1))
    }

    fn swap_id(hashlock: &crate::crypto::Hashlock, sender: &str) -> String {
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&hashlock.0);
        preimage.extend_from_slice(sender.as_bytes());
        hex::encode(sha256(&preimage))
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

#[async_trait]
impl ChainAdapter for SlotChainAdapter {
    fn chain(&self) -> Chain {
        Chain::SlotChain
    }

    async fn initialize(&mut self) -> Result<()> {
        let _ = self.measured_slot_duration_ms().await.map_err(|e| {
            Error::Adapter(crate::error::AdapterError::InitFailed {
                chain: Chain::SlotChain,
                reason: e.to_string(),
            })
        })?;
        self.initialized = true;
        Ok(())
    }

    fn derive_address(&self, public_key: &[u8]) -> Result<String> {
        Ok(bs58_like_encode(&sha256(public_key)))
    }

    async fn balance(&self, address: &str, asset: Option<&Asset>) -> Result<u64> {
        self.require_initialized()?;
        match asset.and_then(|a| a.contract_id.as_deref()) {
            Some(mint) => {
                self.transport
                    .get_json(&format!("/account/{address}/tokenBalance?mint={mint}"))
                    .await
            }
            None => self.transport.get_json(&format!("/account/{address}/balance")).await,
        }
    }

    async fn build_transaction(&self, params: &TransferParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        let unsigned = UnsignedSlotTx {
            program_id: "system".to_string(),
            accounts: vec![params.from_address.clone(), params.to_address.clone()],
            instruction_data: hex::encode(params.amount.to_le_bytes()),
            recent_slot: self.block_height().await?,
            htlc_id: None,
            op: None,
        };
        serde_json::to_vec(&unsigned)
            .map_err(|e| Error::Transaction(TransactionError::BuildFailed(e.to_string())))
    }

    async fn create_htlc(&self, params: &HtlcParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        params.validate(Self::now())?;

        let slot_ms = self.measured_slot_duration_ms().await?;
        let seconds_remaining = (params.expiry - Self::now()).max(0) as u64;
        let expiry_slot = self.block_height().await? + (seconds_remaining * 1000 / slot_ms.max(1));

        let htlc_id = Self::swap_id(&params.hashlock, &params.sender_address);
        self.ledger.insert(
            htlc_id.clone(),
            params.amount,
            params.hashlock,
            params.expiry,
            params.receiver_address.clone(),
        );

        let mut data = Vec::new();
        data.extend_from_slice(&params.hashlock.0);
        data.extend_from_slice(&expiry_slot.to_le_bytes());
        data.extend_from_slice(&params.amount.to_le_bytes());

        let unsigned = UnsignedSlotTx {
            program_id: self.htlc_program_id.clone(),
            accounts: vec![
                params.sender_address.clone(),
                params.receiver_address.clone(),
                htlc_id.clone(),
            ],
            instruction_data: hex::encode(data),
            recent_slot: self.block_height().await?,
            htlc_id: Some(htlc_id),
            op: Some(HtlcOp::Create),
        };
        serde_json::to_vec(&unsigned)
            .map_err(|e| Error::Htlc(HtlcError::CreateFailed(e.to_string())))
    }

    async fn claim_htlc(&self, htlc_id: &str, preimage: &[u8; 32]) -> Result<Vec<u8>> {
        self.require_initialized()?;
        let status = self
            .ledger
            .get(htlc_id, Self::now())
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))?;
        if status.hashlock.0 != sha256(preimage) {
            return Err(Error::Htlc(HtlcError::InvalidPreimage));
        }

        let unsigned = UnsignedSlotTx {
            program_id: self.htlc_program_id.clone(),
            accounts: vec![htlc_id.to_string()],
            instruction_data: hex::encode(preimage),
            recent_slot: self.block_height().await?,
            htlc_id: Some(htlc_id.to_string()),
            op: Some(HtlcOp::Claim),
        };
        serde_json::to_vec(&unsigned)
            .map_err(|e| Error::Htlc(HtlcError::ClaimFailed(e.to_string())))
    }

    async fn refund_htlc(&self, htlc_id: &str) -> Result<Vec<u8>> {
        self.require_initialized()?;
        let status = self
            .ledger
            .get(htlc_id, Self::now())
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))?;
        if status.expiry > Self::now() {
            return Err(Error::Htlc(HtlcError::TimelockNotExpired(htlc_id.to_string())));
        }

        let unsigned = UnsignedSlotTx {
            program_id: self.htlc_program_id.clone(),
            accounts: vec![htlc_id.to_string()],
            instruction_data: String::new(),
            recent_slot: self.block_height().await?,
            htlc_id: Some(htlc_id.to_string()),
            op: Some(HtlcOp::Refund),
        };
        serde_json::to_vec(&unsigned)
            .map_err(|e| Error::Htlc(HtlcError::RefundFailed(e.to_string())))
    }

    fn sign_transaction(&self, unsigned: Vec<u8>, _key: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(unsigned)
    }

    async fn broadcast(&self, signed: Vec<u8>) -> Result<String> {
        self.require_initialized()?;
        #[derive(Serialize)]
        struct Req {
            transaction_hex: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            signature: String,
        }
        let resp: Resp = self
            .transport
            .post_json(
                "/tx/sendTransaction",
                &Req {
                    transaction_hex: hex::encode(&signed),
                },
            )
            .await
            .map_err(|_| {
                Error::Transaction(TransactionError::BroadcastFailed(
                    "sendTransaction endpoint unreachable".to_string(),
                ))
            })?;

        if let Ok(unsigned) = serde_json::from_slice::<UnsignedSlotTx>(&signed) {
            if let Some(htlc_id) = unsigned.htlc_id {
                match unsigned.op {
                    Some(HtlcOp::Create) => self.ledger.mark_created(&htlc_id, resp.signature.clone()),
                    Some(HtlcOp::Claim) => self.ledger.mark_claimed(&htlc_id, resp.signature.clone()),
                    Some(HtlcOp::Refund) => self.ledger.mark_refunded(&htlc_id, resp.signature.clone()),
                    None => {}
                }
            }
        }
        Ok(resp.signature)
    }

    async fn htlc_status(&self, htlc_id: &str) -> Result<HtlcStatus> {
        self.ledger
            .get(htlc_id, Self::now())
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))
    }

    async fn subscribe_address(&self, _address: &str) -> Result<(EventStream, SubscriptionHandle)> {
        let (tx, _rx) = tokio::sync::oneshot::channel();
        let stream: EventStream = Box::pin(futures::stream::empty::<AddressEvent>());
        Ok((stream, SubscriptionHandle::new(tx)))
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<ObservedTransaction> {
        self.transport.get_json(&format!("/tx/{tx_hash}")).await
    }

    async fn block_height(&self) -> Result<u64> {
        #[derive(Deserialize)]
        struct Slot {
            slot: u64,
        }
        Ok(self.transport.get_json::<Slot>("/slot/current").await?.slot)
    }

    async fn confirmations(&self, tx_hash: &str) -> Result<u32> {
        Ok(self.get_transaction(tx_hash).await?.confirmations)
    }

    async fn block_time_ms(&self) -> Result<u64> {
        self.measured_slot_duration_ms().await
    }

    async fn estimate_gas(&self, _unsigned: &Vec<u8>) -> Result<u64> {
        Ok(5_000)
    }

    async fn wait_for_confirmation(&self, tx_hash: &str, confirmations_needed: u32) -> Result<()> {
        for _ in 0..64 {
            if self.confirmations(tx_hash).await? >= confirmations_needed {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        }
        Err(Error::Transaction(TransactionError::ConfirmationTimeout {
            tx_hash: tx_hash.to_string(),
        }))
    }
}

/// Lightweight stand-in for base58 address encoding (real base58 pulls in
/// an extra dependency the rest of the adapter has no other use for).
fn bs58_like_encode(bytes: &[u8; 32]) -> String {
    hex::encode(bytes)
}
