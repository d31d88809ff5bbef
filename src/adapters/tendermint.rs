//! Tendermint/CosmWasm-style adapter: HTLC realized as `new_swap`/
//! `withdraw`/`refund` execute messages against a CosmWasm contract,
//! submitted over the chain's REST endpoint.

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
struct UnsignedCosmosTx {
    contract: String,
    sender: String,
    funds: u64,
    execute_msg: serde_json::Value,
    account_sequence: u64,
    htlc_id: Option<String>,
    op: Option<HtlcOp>,
}

pub struct TendermintAdapter {
    transport: RpcTransport,
    htlc_contract: String,
    ledger: HtlcLedger,
    initialized: bool,
}

impl TendermintAdapter {
    pub fn new(endpoint: impl Into<String>, htlc_contract: impl Into<String>) -> Self {
        Self {
            transport: RpcTransport::new(endpoint),
            htlc_contract: htlc_contract.into(),
            ledger: HtlcLedger::default(),
            initialized: false,
        }
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Adapter(crate::error::AdapterError::NotInitialized(
                Chain::Tendermint,
            )))
        }
    }

    async fn account_sequence(&self, address: &str) -> Result<u64> {
        #[derive(Deserialize)]
        struct Acct {
            sequence: u64,
        }
        let acct: Acct = self
            .transport
            .get_json(&format!("/cosmos/auth/v1/account/{address}"))
            .await?;
        Ok(acct.sequence)
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
impl ChainAdapter for TendermintAdapter {
    fn chain(&self) -> Chain {
        Chain::Tendermint
    }

    async fn initialize(&mut self) -> Result<()> {
        let _: serde_json::Value = self
            .transport
            .get_json("/cosmos/base/node/v1/status")
            .await
            .map_err(|e| {
                Error::Adapter(crate::error::AdapterError::InitFailed {
                    chain: Chain::Tendermint,
                    reason: e.to_string(),
                })
            })?;
        self.initialized = true;
        Ok(())
    }

    fn derive_address(&self, public_key: &[u8]) -> Result<String> {
        let hash = sha256(public_key);
        Ok(format!("cosmos1{}", hex::encode(&hash[..20])))
    }

    async fn balance(&self, address: &str, asset: Option<&Asset>) -> Result<u64> {
        self.require_initialized()?;
        let denom = asset
            .and_then(|a| a.contract_id.as_deref())
            .unwrap_or("native");
        self.transport
            .get_json(&format!("/cosmos/bank/v1/balances/{address}/{denom}"))
            .await
    }

    async fn build_transaction(&self, params: &TransferParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        let unsigned = UnsignedCosmosTx {
            contract: params.to_address.clone(),
            sender: params.from_address.clone(),
            funds: params.amount,
            execute_msg: serde_json::json!({ "transfer": { "to": params.to_address, "amount": params.amount } }),
            account_sequence: self.account_sequence(&params.from_address).await?,
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

        let unsigned = UnsignedCosmosTx {
            contract: self.htlc_contract.clone(),
            sender: params.sender_address.clone(),
            funds: params.amount,
            execute_msg: serde_json::json!({ "new_swap": {
                "id": htlc_id,
                "receiver": params.receiver_address,
                "hashlock": params.hashlock.to_hex(),
                "expiry": params.expiry,
            }}),
            account_sequence: self.account_sequence(&params.sender_address).await?,
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

        let unsigned = UnsignedCosmosTx {
            contract: self.htlc_contract.clone(),
            sender: String::new(),
            funds: 0,
            execute_msg: serde_json::json!({ "withdraw": { "id": htlc_id, "preimage": hex::encode(preimage) }}),
            account_sequence: 0,
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

        let unsigned = UnsignedCosmosTx {
            contract: self.htlc_contract.clone(),
            sender: String::new(),
            funds: 0,
            execute_msg: serde_json::json!({ "refund": { "id": htlc_id }}),
            account_sequence: 0,
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
            tx_bytes_hex: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            txhash: String,
        }
        let resp: Resp = self
            .transport
            .post_json(
                "/cosmos/tx/v1/broadcast",
                &Req {
                    tx_bytes_hex: hex::encode(&signed),
                },
            )
            .await
            .map_err(|_| {
                Error::Transaction(TransactionError::BroadcastFailed(
                    "broadcast endpoint unreachable".to_string(),
                ))
            })?;

        if let Ok(unsigned) = serde_json::from_slice::<UnsignedCosmosTx>(&signed) {
            if let Some(htlc_id) = unsigned.htlc_id {
                match unsigned.op {
                    Some(HtlcOp::Create) => self.ledger.mark_created(&htlc_id, resp.txhash.clone()),
                    Some(HtlcOp::Claim) => self.ledger.mark_claimed(&htlc_id, resp.txhash.clone()),
                    Some(HtlcOp::Refund) => self.ledger.mark_refunded(&htlc_id, resp.txhash.clone()),
                    None => {}
                }
            }
        }
        Ok(resp.txhash)
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
        self.transport
            .get_json(&format!("/cosmos/tx/v1/{tx_hash}"))
            .await
    }

    async fn block_height(&self) -> Result<u64> {
        #[derive(Deserialize)]
        struct Status {
            latest_block_height: u64,
        }
        Ok(self
            .transport
            .get_json::<Status>("/cosmos/base/node/v1/status")
            .await?
            .latest_block_height)
    }

    async fn confirmations(&self, tx_hash: &str) -> Result<u32> {
        Ok(self.get_transaction(tx_hash).await?.confirmations)
    }

    async fn estimate_gas(&self, _unsigned: &Vec<u8>) -> Result<u64> {
        Ok(200_000)
    }

    async fn wait_for_confirmation(&self, tx_hash: &str, confirmations_needed: u32) -> Result<()> {
        for _ in 0..20 {
            if self.confirmations(tx_hash).await? >= confirmations_needed {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_secs(6)).await;
        }
        Err(Error::Transaction(TransactionError::ConfirmationTimeout {
            tx_hash: tx_hash.to_string(),
        }))
    }
}
