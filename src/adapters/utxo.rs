//! UTXO chain adapter: HTLC realized as a P2WSH-wrapped miniscript policy
//! `or(and(pk(receiver), sha256(H)), and(pk(sender), older(T)))`, following
//! the script-and-sign shape of a Bitcoin-style VHTLC.

use crate::adapter::{
    AddressEvent, ChainAdapter, EventStream, ObservedTransaction, SubscriptionHandle,
    TransferParams,
};
use crate::adapters::ledger::HtlcLedger;
use crate::adapters::rpc::RpcTransport;
use crate::chain::{Asset, Chain};
use crate::error::{Error, HtlcError, Result, TransactionError};
use crate::htlc::{HtlcOp, HtlcParams, HtlcStatus};
use async_trait::async_trait;
use bitcoin::secp256k1::{PublicKey as SecpPublicKey, Secp256k1};
use miniscript::{Descriptor, DescriptorPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnsignedUtxoTx {
    inputs: Vec<(String, u32)>,
    outputs: Vec<(String, u64)>,
    witness_script_hex: Option<String>,
    htlc_id: Option<String>,
    op: Option<HtlcOp>,
}

struct HtlcScript {
    descriptor: String,
    receiver_address: String,
    sender_address: String,
    relative_timelock_blocks: u32,
}

pub struct UtxoAdapter {
    transport: RpcTransport,
    ledger: HtlcLedger,
    scripts: Mutex<HashMap<String, HtlcScript>>,
    /// Public keys behind each address this adapter has been told about.
    /// `pk()` positions in the HTLC descriptor need a real public key, not
    /// the address derived from it, so callers must register the keys for
    /// any address they intend to use as an HTLC party before locking.
    pubkeys: Mutex<HashMap<String, SecpPublicKey>>,
    initialized: bool,
}

impl UtxoAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            transport: RpcTransport::new(endpoint),
            ledger: HtlcLedger::default(),
            scripts: Mutex::new(HashMap::new()),
            pubkeys: Mutex::new(HashMap::new()),
            initialized: false,
        }
    }

    /// Record the public key behind `address` so it can be spliced into a
    /// `pk()` descriptor position the next time `address` takes part in an
    /// HTLC. Must be called before [`ChainAdapter::create_htlc`] for any
    /// address that will act as sender or receiver on this chain.
    pub fn register_pubkey(&self, address: impl Into<String>, public_key: &[u8]) -> Result<()> {
        let pk = SecpPublicKey::from_slice(public_key)
            .map_err(|e| Error::Other(format!("invalid public key: {e}")))?;
        self.pubkeys.lock().unwrap().insert(address.into(), pk);
        Ok(())
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::Adapter(crate::error::AdapterError::NotInitialized(
                Chain::Utxo,
            )))
        }
    }

    fn lookup_pubkey(&self, address: &str) -> Result<SecpPublicKey> {
        self.pubkeys.lock().unwrap().get(address).copied().ok_or_else(|| {
            Error::Htlc(HtlcError::CreateFailed(format!(
                "no public key registered for address {address}"
            )))
        })
    }

    fn build_htlc_descriptor(
        hashlock: &crate::crypto::Hashlock,
        receiver_pubkey: &SecpPublicKey,
        sender_pubkey: &SecpPublicKey,
        relative_timelock_blocks: u32,
    ) -> Result<Descriptor<DescriptorPublicKey>> {
        let descriptor_str = format!(
            "wsh(or_d(and_v(v:pk({}),sha256({})),and_v(v:pk({}),older({relative_timelock_blocks}))))",
            hex::encode(receiver_pubkey.serialize()),
            hashlock.to_hex(),
            hex::encode(sender_pubkey.serialize()),
        );
        Descriptor::from_str(&descriptor_str)
            .map_err(|e| Error::Htlc(HtlcError::CreateFailed(format!("invalid HTLC descriptor: {e}"))))
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

#[async_trait]
impl ChainAdapter for UtxoAdapter {
    fn chain(&self) -> Chain {
        Chain::Utxo
    }

    async fn initialize(&mut self) -> Result<()> {
        let _: serde_json::Value = self
            .transport
            .get_json("/health")
            .await
            .map_err(|e| Error::Adapter(crate::error::AdapterError::InitFailed {
                chain: Chain::Utxo,
                reason: e.to_string(),
            }))?;
        self.initialized = true;
        Ok(())
    }

    fn derive_address(&self, public_key: &[u8]) -> Result<String> {
        let secp = Secp256k1::verification_only();
        let pk = SecpPublicKey::from_slice(public_key)
            .map_err(|e| Error::Other(format!("invalid public key: {e}")))?;
        let compressed = bitcoin::CompressedPublicKey(pk);
        let _ = secp;
        let address = bitcoin::Address::p2wpkh(&compressed, bitcoin::Network::Bitcoin);
        Ok(address.to_string())
    }

    async fn balance(&self, address: &str, asset: Option<&Asset>) -> Result<u64> {
        self.require_initialized()?;
        let path = match asset {
            Some(a) => format!("/address/{address}/balance?asset={}", a.symbol),
            None => format!("/address/{address}/balance"),
        };
        self.transport.get_json(&path).await
    }

    async fn build_transaction(&self, params: &TransferParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        #[derive(Deserialize)]
        struct Utxo {
            txid: String,
            vout: u32,
            value: u64,
        }
        let utxos: Vec<Utxo> = self
            .transport
            .get_json(&format!("/address/{}/utxos", params.from_address))
            .await?;

        let mut selected = Vec::new();
        let mut total = 0u64;
        for u in utxos {
            selected.push((u.txid, u.vout));
            total += u.value;
            if total >= params.amount {
                break;
            }
        }
        if total < params.amount {
            return Err(Error::Transaction(TransactionError::InsufficientBalance {
                available: total,
                required: params.amount,
            }));
        }

        let mut outputs = vec![(params.to_address.clone(), params.amount)];
        if total > params.amount {
            outputs.push((params.from_address.clone(), total - params.amount));
        }

        let unsigned = UnsignedUtxoTx {
            inputs: selected,
            outputs,
            witness_script_hex: None,
            htlc_id: None,
            op: None,
        };
        serde_json::to_vec(&unsigned)
            .map_err(|e| Error::Transaction(TransactionError::BuildFailed(e.to_string())))
    }

    async fn create_htlc(&self, params: &HtlcParams) -> Result<Vec<u8>> {
        self.require_initialized()?;
        params.validate(Self::now())?;

        let receiver_pubkey = self.lookup_pubkey(&params.receiver_address)?;
        let sender_pubkey = self.lookup_pubkey(&params.sender_address)?;

        let blocks_remaining =
            ((params.expiry - Self::now()).max(0) as f64 / Chain::Utxo.nominal_block_time().as_secs_f64())
                .ceil() as u32;

        let descriptor = Self::build_htlc_descriptor(
            &params.hashlock,
            &receiver_pubkey,
            &sender_pubkey,
            blocks_remaining,
        )?;
        let htlc_address = descriptor
            .at_derivation_index(0)
            .map_err(|e| Error::Htlc(HtlcError::CreateFailed(format!("address derivation failed: {e}"))))?
            .address(bitcoin::Network::Bitcoin)
            .map_err(|e| {
                Error::Htlc(HtlcError::CreateFailed(format!("address derivation failed: {e}")))
            })?;
        let htlc_id = htlc_address.to_string();

        self.scripts.lock().unwrap().insert(
            htlc_id.clone(),
            HtlcScript {
                descriptor: descriptor.to_string(),
                receiver_address: params.receiver_address.clone(),
                sender_address: params.sender_address.clone(),
                relative_timelock_blocks: blocks_remaining,
            },
        );
        self.ledger.insert(
            htlc_id.clone(),
            params.amount,
            params.hashlock,
            params.expiry,
            params.receiver_address.clone(),
        );

        let unsigned = UnsignedUtxoTx {
            inputs: Vec::new(),
            outputs: vec![(htlc_id.clone(), params.amount)],
            witness_script_hex: Some(hex::encode(descriptor.to_string())),
            htlc_id: Some(htlc_id),
            op: Some(HtlcOp::Create),
        };
        serde_json::to_vec(&unsigned)
            .map_err(|e| Error::Htlc(HtlcError::CreateFailed(e.to_string())))
    }

    async fn claim_htlc(&self, htlc_id: &str, preimage: &[u8; 32]) -> Result<Vec<u8>> {
        self.require_initialized()?;
        let scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get(htlc_id)
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))?;

        let unsigned = UnsignedUtxoTx {
            inputs: vec![(htlc_id.to_string(), 0)],
            outputs: vec![(script.receiver_address.clone(), 0)],
            witness_script_hex: Some(hex::encode(format!(
                "{}:{}",
                script.descriptor,
                hex::encode(preimage)
            ))),
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

        let scripts = self.scripts.lock().unwrap();
        let script = scripts
            .get(htlc_id)
            .ok_or_else(|| Error::Htlc(HtlcError::NotFound(htlc_id.to_string())))?;

        let unsigned = UnsignedUtxoTx {
            inputs: vec![(htlc_id.to_string(), 0)],
            outputs: vec![(script.sender_address.clone(), 0)],
            witness_script_hex: Some(hex::encode(&script.descriptor)),
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
        struct BroadcastReq {
            raw_tx_hex: String,
        }
        #[derive(Deserialize)]
        struct BroadcastResp {
            txid: String,
        }
        let resp: BroadcastResp = self
            .transport
            .post_json(
                "/tx/broadcast",
                &BroadcastReq {
                    raw_tx_hex: hex::encode(&signed),
                },
            )
            .await
            .map_err(|_| Error::Transaction(TransactionError::BroadcastFailed(
                "broadcast endpoint unreachable".to_string(),
            )))?;

        if let Ok(unsigned) = serde_json::from_slice::<UnsignedUtxoTx>(&signed) {
            if let Some(htlc_id) = unsigned.htlc_id {
                match unsigned.op {
                    Some(HtlcOp::Create) => self.ledger.mark_created(&htlc_id, resp.txid.clone()),
                    Some(HtlcOp::Claim) => self.ledger.mark_claimed(&htlc_id, resp.txid.clone()),
                    Some(HtlcOp::Refund) => self.ledger.mark_refunded(&htlc_id, resp.txid.clone()),
                    None => {}
                }
            }
        }
        Ok(resp.txid)
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
        struct Tip {
            height: u64,
        }
        let tip: Tip = self.transport.get_json("/chain/tip").await?;
        Ok(tip.height)
    }

    async fn confirmations(&self, tx_hash: &str) -> Result<u32> {
        Ok(self.get_transaction(tx_hash).await?.confirmations)
    }

    async fn estimate_gas(&self, unsigned: &Vec<u8>) -> Result<u64> {
        Ok((unsigned.len() as u64 / 4).max(1) * 2)
    }

    async fn wait_for_confirmation(&self, tx_hash: &str, confirmations_needed: u32) -> Result<()> {
        for _ in 0..30 {
            if self.confirmations(tx_hash).await? >= confirmations_needed {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_secs(20)).await;
        }
        Err(Error::Transaction(TransactionError::ConfirmationTimeout {
            tx_hash: tx_hash.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;

    fn test_pubkey(byte: u8) -> SecpPublicKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
        SecpPublicKey::from_secret_key(&secp, &secret)
    }

    #[test]
    fn build_htlc_descriptor_parses_with_real_pubkeys() {
        let hashlock = crate::crypto::Hashlock([7u8; 32]);
        let receiver = test_pubkey(1);
        let sender = test_pubkey(2);

        let descriptor = UtxoAdapter::build_htlc_descriptor(&hashlock, &receiver, &sender, 144).unwrap();
        let address = descriptor
            .at_derivation_index(0)
            .unwrap()
            .address(bitcoin::Network::Bitcoin)
            .unwrap();
        assert!(address.to_string().starts_with("bc1"));
    }

    #[tokio::test]
    async fn create_htlc_requires_registered_pubkeys() {
        let mut adapter = UtxoAdapter::new("http://127.0.0.1:1");
        adapter.initialized = true;
        let params = HtlcParams {
            sender_address: "sender".to_string(),
            receiver_address: "receiver".to_string(),
            amount: 1000,
            hashlock: crate::crypto::Hashlock([9u8; 32]),
            expiry: UtxoAdapter::now() + 3600,
            asset: None,
        };
        let err = adapter.create_htlc(&params).await.unwrap_err();
        assert!(matches!(err, Error::Htlc(HtlcError::CreateFailed(_))));
    }

    #[tokio::test]
    async fn create_htlc_builds_a_descriptor_once_pubkeys_are_registered() {
        let mut adapter = UtxoAdapter::new("http://127.0.0.1:1");
        adapter.initialized = true;
        adapter
            .register_pubkey("receiver", &test_pubkey(1).serialize())
            .unwrap();
        adapter.register_pubkey("sender", &test_pubkey(2).serialize()).unwrap();

        let params = HtlcParams {
            sender_address: "sender".to_string(),
            receiver_address: "receiver".to_string(),
            amount: 1000,
            hashlock: crate::crypto::Hashlock([9u8; 32]),
            expiry: UtxoAdapter::now() + 3600,
            asset: None,
        };
        let unsigned = adapter.create_htlc(&params).await.unwrap();
        let tx: UnsignedUtxoTx = serde_json::from_slice(&unsigned).unwrap();
        assert_eq!(tx.op, Some(HtlcOp::Create));
        assert!(tx.htlc_id.is_some());
        assert_eq!(adapter.scripts.lock().unwrap().len(), 1);
    }
}
