//! zkApp chain adapter: HTLC realized as a zkApp method invocation over a
//! GraphQL endpoint, checked on-chain against a circuit-friendly native
//! hash. Timelocks are expressed in block height, not wall-clock seconds.

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
struct UnsignedZkAppTx {
    zkapp_address: String,
    method: String,
    args: serde_json::Value,
    htlc_id: Option<String>,
    op: Option<HtlcOp>,
}

pub struct ZkAppAdapter {
    transport: RpcTransport,
    zkapp_address: String,
    ledger: HtlcLedger,
    initialized: bool,
}

impl ZkAppAdapter {
    pub fn new(endpoint: impl Into<String>, zkapp_address: impl Into<String>) -> Self {
        Self {
            transport: RpcTransport::new(endpoint),
            zkapp_address: zkapp_address.into(),
            ledger: HtlcLedger::default(),
            initialized: false,
        }
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Adapter(crate::error::AdapterError::NotInitialized(
                Chain::ZkApp,
            )))
        }
    }

    async fn graphql_query(&self, query: &str) -> Result<serde_json::Value> {
        #[derive(Serialize)]
        struct Body<'a> {
            query: &'a str,
        }
        #[derive(Deserialize)]
        struct Envelope {
            data: serde_json::Value,
        }
        let envelope: Envelope = self.transport.post_json("/graphql", &Body { query }).await?;
        Ok(envelope.data)
    }

    fn native_hash_binding(hashlock: &crate::crypto::Hashlock) -> [u8; 32] {
        sha256(&[b"zkapp-native-hash-binding/v1".as_slice(), &hashlock.0].concat())
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
impl ChainAdapter for ZkAppAdapter {
    fn chain(&self) -> Chain {
        Chain::ZkApp
    }

    async fn initialize(&mut self) -> Result<()> {
        self.graphql_query("{ syncStatus }").await.map_err(|e| {
            Error::Adapter(crate::error::AdapterError::InitFailed {
                chain: Chain::ZkApp,
                reason: e.to_string(),
            })
        })?;
        self.initialized = true;
        Ok(())
    }

    fn derive_address(&self, public_key: &[u8]) -> Result<String> {
        Ok(format!("B62{}", hex::encode(&sha256(public_key)[..20])))
    }

    async fn balance(&self, address: &str, asset: Option<&Asset>) -> Result<u64> {
        self.require_initialized()?;
        let token = asset.and_then(|a| a.contract_id.as_deref()).unwrap_or("MINA");
        let data = self
            .graphql_query(&format!(
                "{{ account(publicKey: \"{address}\", token: \"{token}\") {{ balance {{ total }} }} }}"
            ))
            .await?;
        data["account"]["balance"]["total"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Other("malformed balance response".to_string()))
    }

    async fn build_transaction(&self, params: &TransferParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        let unsigned = UnsignedZkAppTx {
            zkapp_address: params.to_address.clone(),
            method: "transfer".to_string(),
            args: serde_json::json!({ "from": params.from_address, "amount": params.amount }),
            htlc_id: None,
            op: None,
        };
        serde_json::to_vec(&unsigned)
            .map_err(|e| Error::Transaction(TransactionError::BuildFailed(e.to_string())))
    }

    async fn create_htlc(&self, params: &HtlcParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        params.validate(Self::now())?;

        let htlc_id = Self::swap_id(&params.hashlock, &params.sender_address);
        self.ledger.insert(
            htlc_id.clone(),
            params.amount,
            params.hashlock,
            params.expiry,
            params.receiver_address.clone(),
        );

        let seconds_remaining = (params.expiry - Self::now()).max(0) as u64;
        let block_time_ms = self.block_time_ms().await?;
        let expiry_height = self.block_height().await? + (seconds_remaining * 1000 / block_time_ms.max(1));

        let unsigned = UnsignedZkAppTx {
            zkapp_address: self.zkapp_address.clone(),
            method: "newSwap".to_string(),
            args: serde_json::json!({
                "id": htlc_id,
                "receiver": params.receiver_address,
                "nativeHashBinding": hex::encode(Self::native_hash_binding(&params.hashlock)),
                "expiryHeight": expiry_height,
                "amount": params.amount,
            }),
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

        let unsigned = UnsignedZkAppTx {
            zkapp_address: self.zkapp_address.clone(),
            method: "withdraw".to_string(),
            args: serde_json::json!({ "id": htlc_id, "preimage": hex::encode(preimage) }),
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

        let unsigned = UnsignedZkAppTx {
            zkapp_address: self.zkapp_address.clone(),
            method: "refund".to_string(),
            args: serde_json::json!({ "id": htlc_id }),
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
        let data = self
            .graphql_query(&format!(
                "mutation {{ sendZkappTransaction(input: \"{}\") {{ hash }} }}",
                hex::encode(&signed)
            ))
            .await
            .map_err(|_| {
                Error::Transaction(TransactionError::BroadcastFailed(
                    "sendZkappTransaction failed".to_string(),
                ))
            })?;
        let tx_hash = data["sendZkappTransaction"]["hash"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::Other("malformed broadcast response".to_string()))?;

        if let Ok(unsigned) = serde_json::from_slice::<UnsignedZkAppTx>(&signed) {
            if let Some(htlc_id) = unsigned.htlc_id {
                match unsigned.op {
                    Some(HtlcOp::Create) => self.ledger.mark_created(&htlc_id, tx_hash.clone()),
                    Some(HtlcOp::Claim) => self.ledger.mark_claimed(&htlc_id, tx_hash.clone()),
                    Some(HtlcOp::Refund) => self.ledger.mark_refunded(&htlc_id, tx_hash.clone()),
                    None => {}
                }
            }
        }
        Ok(tx_hash)
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
        let data = self
            .graphql_query(&format!("{{ transaction(hash: \"{tx_hash}\") {{ confirmations blockHeight }} }}"))
            .await?;
        Ok(ObservedTransaction {
            tx_hash: tx_hash.to_string(),
            confirmations: data["transaction"]["confirmations"].as_u64().unwrap_or(0) as u32,
            block_height: data["transaction"]["blockHeight"].as_u64(),
        })
    }

    async fn block_height(&self) -> Result<u64> {
        let data = self.graphql_query("{ bestChain(maxLength: 1) { blockHeight } }").await?;
        data["bestChain"][0]["blockHeight"]
            .as_u64()
            .ok_or_else(|| Error::Other("malformed block height response".to_string()))
    }

    async fn confirmations(&self, tx_hash: &str) -> Result<u32> {
        Ok(self.get_transaction(tx_hash).await?.confirmations)
    }

    async fn estimate_gas(&self, _unsigned: &Vec<u8>) -> Result<u64> {
        Ok(1)
    }

    async fn wait_for_confirmation(&self, tx_hash: &str, confirmations_needed: u32) -> Result<()> {
        for _ in 0..20 {
            if self.confirmations(tx_hash).await? >= confirmations_needed {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_secs(180)).await;
        }
        Err(Error::Transaction(TransactionError::ConfirmationTimeout {
            tx_hash: tx_hash.to_string(),
        }))
    }
}
