//! One-time stealth-address generator (§4.6): produces a receive address
//! tied to a recipient without revealing their base address on-chain.
//! Stateless — every call is independent.

use crate::chain::Chain;
use crate::crypto::sha256;
use crate::error::{Error, PrivacyError, Result};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;

/// A one-time address and the key material needed to decrypt the
/// off-chain secret delivered to it later (phase 11).
pub struct StealthAddress {
    pub chain: Chain,
    pub address: String,
    pub viewing_key: [u8; 32],
    pub spending_key_hash: [u8; 32],
    pub ephemeral_public_key: Vec<u8>,
    pub created_at: i64,
    /// Retained by the producing party only, for the lifetime of the
    /// active swap; never serialized alongside the rest of the record.
    ephemeral_private_key: SecretKey,
}

impl StealthAddress {
    pub fn ephemeral_private_key_bytes(&self) -> [u8; 32] {
        self.ephemeral_private_key.secret_bytes()
    }
}

/// Generate a one-time stealth address for `recipient_base_address` on
/// `chain`, tagged with domain-separated hashing. Works for any chain a
/// swap leg can run on, transparent or shielded — restricting *which*
/// chain may act as the privacy hub is [`crate::privacy_hub::HubConfig::validate`]'s
/// job, not this function's.
pub fn generate(chain: Chain, recipient_base_address: &[u8], now: i64) -> Result<StealthAddress> {
    let secp = Secp256k1::new();
    let mut key_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut key_bytes);
    let ephemeral_private_key = SecretKey::from_slice(&key_bytes)
        .map_err(|e| Error::Privacy(PrivacyError::StealthAddressGenerationFailed(e.to_string())))?;
    let ephemeral_public_key = ephemeral_private_key.public_key(&secp);

    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);

    let mut shared_input = Vec::new();
    shared_input.extend_from_slice(&ephemeral_private_key.secret_bytes());
    shared_input.extend_from_slice(recipient_base_address);
    shared_input.extend_from_slice(&salt);

    let viewing_key = tagged_hash("stealth/viewing-key/v1", &shared_input);
    let spending_key_hash = tagged_hash("stealth/spending-key/v1", &shared_input);

    let address = format_address(chain, &spending_key_hash);

    Ok(StealthAddress {
        chain,
        address,
        viewing_key,
        spending_key_hash,
        ephemeral_public_key: ephemeral_public_key.serialize().to_vec(),
        created_at: now,
        ephemeral_private_key,
    })
}

fn tagged_hash(tag: &str, data: &[u8]) -> [u8; 32] {
    let tag_hash = sha256(tag.as_bytes());
    let mut input = Vec::with_capacity(64 + data.len());
    input.extend_from_slice(&tag_hash);
    input.extend_from_slice(&tag_hash);
    input.extend_from_slice(data);
    sha256(&input)
}

/// Chain-specific prefix/length conventions for a one-time address.
fn format_address(chain: Chain, digest: &[u8; 32]) -> String {
    match chain {
        Chain::ShieldedNote => format!("note1{}", hex::encode(digest)),
        Chain::Utxo => format!("bc1{}", hex::encode(&digest[..20])),
        Chain::Evm => format!("0x{}", hex::encode(&digest[12..])),
        Chain::Tendermint => format!("cosmos1{}", hex::encode(&digest[..20])),
        Chain::SlotChain => hex::encode(digest),
        Chain::ZkApp => format!("B62{}", hex::encode(&digest[..20])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_for_transparent_chains_too() {
        let record = generate(Chain::Evm, b"recipient", 1_700_000_000).unwrap();
        assert!(record.address.starts_with("0x"));
    }

    #[test]
    fn two_invocations_for_the_same_recipient_yield_different_addresses() {
        let a = generate(Chain::ShieldedNote, b"recipient", 1_700_000_000).unwrap();
        let b = generate(Chain::ShieldedNote, b"recipient", 1_700_000_000).unwrap();
        assert_ne!(a.address, b.address);
        assert_ne!(a.viewing_key, b.viewing_key);
    }

    #[test]
    fn address_carries_the_chain_specific_prefix() {
        let record = generate(Chain::ShieldedNote, b"recipient", 1_700_000_000).unwrap();
        assert!(record.address.starts_with("note1"));
    }
}
