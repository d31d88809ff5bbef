//! Shielded-note chain adapter: HTLC realized as a note script, checked
//! on-chain against a circuit-friendly native hash rather than SHA-256
//! directly. This is the privacy hub's only eligible home chain
//! ([`Chain::supports_shielded_ops`]).

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
struct UnsignedNoteTx {
    input_notes: Vec<String>,
    output_commitments: Vec<String>,
    note_script: Option<String>,
    htlc_id: Option<String>,
    op: Option<HtlcOp>,
}

pub struct ShieldedNoteAdapter {
    transport: RpcTransport,
    ledger: HtlcLedger,
    initialized: bool,
}

impl ShieldedNoteAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            transport: RpcTransport::new(endpoint),
            ledger: HtlcLedger::default(),
            initialized: false,
        }
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Adapter(crate::error::AdapterError::NotInitialized(
                Chain::ShieldedNote,
            )))
        }
    }

    /// One-to-one translation of the core's SHA-256 hashlock image into
    /// this chain's circuit-friendly native hash input. The native hash
    /// itself is evaluated on-chain by the note's verifying circuit; this
    /// adapter only documents and performs the binding.
    fn native_hash_binding(hashlock: &crate::crypto::Hashlock) -> [u8; 32] {
        sha256(&[b"native-hash-binding/v1".as_slice(), &hashlock.0].concat())
    }

    fn note_commitment(hashlock: &crate::crypto::Hashlock, amount: u64, receiver: &str) -> String {
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&Self::native_hash_binding(hashlock));
        preimage.extend_from_slice(&amount.to_le_bytes());
        preimage.extend_from_slice(receiver.as_bytes());
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
impl ChainAdapter for ShieldedNoteAdapter {
    fn chain(&self) -> Chain {
        Chain::ShieldedNote
    }

    async fn initialize(&mut self) -> Result<()> {
        let _: serde_json::Value = self
            .transport
            .get_json("/note/sync-status")
            .await
            .map_err(|e| {
                Error::Adapter(crate::error::AdapterError::InitFailed {
                    chain: Chain::ShieldedNote,
                    reason: e.to_string(),
                })
            })?;
        self.initialized = true;
        Ok(())
    }

    fn derive_address(&self, public_key: &[u8]) -> Result<String> {
        Ok(format!("note1{}", hex::encode(sha256(public_key))))
    }

    async fn balance(&self, address: &str, asset: Option<&Asset>) -> Result<u64> {
        self.require_initialized()?;
        let denom = asset.map(|a| a.symbol.as_str()).unwrap_or("native");
        self.transport
            .get_json(&format!("/note/{address}/balance?denom={denom}"))
            .await
    }

    async fn build_transaction(&self, params: &TransferParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        let commitment = {
            let dummy = crate::crypto::Hashlock([0u8; 32]);
            Self::note_commitment(&dummy, params.amount, &params.to_address)
        };
        let unsigned = UnsignedNoteTx {
            input_notes: vec![params.from_address.clone()],
            output_commitments: vec![commitment],
            note_script: None,
            htlc_id: None,
            op: None,
        };
        serde_json::to_vec(&unsigned)
            .map_err(|e| Error::Transaction(TransactionError::BuildFailed(e.to_string())))
    }

    async fn create_htlc(&self, params: &HtlcParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        params.validate(Self::now())?;

        let commitment = Self::note_commitment(&params.hashlock, params.amount, &params.receiver_address);
        self.ledger.insert(
            commitment.clone(),
            params.amount,
            params.hashlock,
            params.expiry,
            params.receiver_address.clone(),
        );

        let unsigned = UnsignedNoteTx {
            input_notes: vec![params.sender_address.clone()],
            output_commitments: vec![commitment.clone()],
            note_script: Some(hex::encode(Self::native_hash_binding(&params.hashlock))),
            htlc_id: Some(commitment),
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

        let unsigned = UnsignedNoteTx {
            input_notes: vec![htlc_id.to_string()],
            output_commitments: Vec::new(),
            note_script: Some(hex::encode(preimage)),
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

        let unsigned = UnsignedNoteTx {
            input_notes: vec![htlc_id.to_string()],
            output_commitments: Vec::new(),
            note_script: None,
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
            note_tx_hex: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            tx_id: String,
        }
        let resp: Resp = self
            .transport
            .post_json(
                "/note/submit",
                &Req {
                    note_tx_hex: hex::encode(&signed),
                },
            )
            .await
            .map_err(|_| {
                Error::Transaction(TransactionError::BroadcastFailed(
                    "note submission endpoint unreachable".to_string(),
                ))
            })?;

        if let Ok(unsigned) = serde_json::from_slice::<UnsignedNoteTx>(&signed) {
            if let Some(htlc_id) = unsigned.htlc_id {
                match unsigned.op {
                    Some(HtlcOp::Create) => self.ledger.mark_created(&htlc_id, resp.tx_id.clone()),
                    Some(HtlcOp::Claim) => self.ledger.mark_claimed(&htlc_id, resp.tx_id.clone()),
                    Some(HtlcOp::Refund) => self.ledger.mark_refunded(&htlc_id, resp.tx_id.clone()),
                    None => {}
                }
            }
        }
        Ok(resp.tx_id)
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
        self.transport.get_json(&format!("/note/tx/{tx_hash}")).await
    }

    async fn block_height(&self) -> Result<u64> {
        #[derive(Deserialize)]
        struct Tip {
            height: u64,
        }
        Ok(self.transport.get_json::<Tip>("/note/tip").await?.height)
    }

    async fn confirmations(&self, tx_hash: &str) -> Result<u32> {
        Ok(self.get_transaction(tx_hash).await?.confirmations)
    }

    async fn estimate_gas(&self, _unsigned: &Vec<u8>) -> Result<u64> {
        Ok(10_000)
    }

    async fn wait_for_confirmation(&self, tx_hash: &str, confirmations_needed: u32) -> Result<()> {
        for _ in 0..20 {
            if self.confirmations(tx_hash).await? >= confirmations_needed {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_secs(75)).await;
        }
        Err(Error::Transaction(TransactionError::ConfirmationTimeout {
            tx_hash: tx_hash.to_string(),
        }))
    }
}
