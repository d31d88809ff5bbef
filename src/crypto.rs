//! Crypto utilities: CSPRNG sampling, SHA-256 hashing, the capped
//! log-normal distribution used by the timelock generator, and the
//! ECDH/AEAD primitives used to deliver the destination secret off-chain
//! in privacy-hub phase 11.

use crate::error::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A 32-byte secret (preimage or mixing seed). Zeroized on drop so that a
/// coordinator's in-memory secrets never outlive the execution.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(pub [u8; 32]);

impl Secret {
    /// Sample a fresh secret from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The SHA-256 image of this secret, used as an HTLC hashlock.
    pub fn hashlock(&self) -> Hashlock {
        Hashlock(sha256(&self.0))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// A distinct, opaque 32-byte hashlock value (the SHA-256 image of a
/// secret). Implicit hex conversion happens only at serialization
/// boundaries, never inline in coordinator logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hashlock(#[serde(with = "hex_bytes32")] pub [u8; 32]);

impl Hashlock {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::Other(format!("invalid hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Other("hashlock must be 32 bytes".to_string()))?;
        Ok(Self(arr))
    }
}

/// SHA-256 over arbitrary bytes, the core's lingua-franca hash function.
/// Chains whose native hash differs translate this 32-byte image as a
/// field-element input to their own hash; that translation lives in the
/// chain's adapter, never here.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Draw a uniform float in `[0, 1)` from the CSPRNG, re-sampling on the
/// (astronomically unlikely) exact-zero case to avoid a log singularity
/// in the Box-Muller transform.
pub fn uniform_unit_interval() -> f64 {
    loop {
        let v = (OsRng.next_u64() as f64) / (u64::MAX as f64 + 1.0);
        if v > 0.0 {
            return v;
        }
    }
}

/// Capped log-normal sampler: CSPRNG-seeded Box-Muller transform, clamped
/// to `[min, max]`. This is the core's privacy-preserving timelock and
/// mixing-delay distribution (spec-mandated, not a library normal
/// sampler, so that the exact transform is auditable).
pub fn sample_capped_log_normal(median: f64, sigma: f64, min: f64, max: f64) -> f64 {
    let u1 = uniform_unit_interval();
    let u2 = uniform_unit_interval();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    let raw = (median.ln() + sigma * z).exp();
    raw.clamp(min, max)
}

/// Draw a uniform float in `[min, max)` from the CSPRNG.
pub fn uniform_range(min: f64, max: f64) -> f64 {
    min + uniform_unit_interval() * (max - min)
}

/// Draw a uniform integer in `[min, max]` (inclusive) from the CSPRNG.
pub fn uniform_range_inclusive_usize(min: usize, max: usize) -> usize {
    if min >= max {
        return min;
    }
    min + (uniform_unit_interval() * (max - min + 1) as f64) as usize
}

/// Round `value` up to the next multiple of `granularity`.
pub fn round_up_to_multiple(value: f64, granularity: f64) -> f64 {
    (value / granularity).ceil() * granularity
}

/// An ephemeral X25519 keypair used both for stealth-address derivation
/// and for the phase-11 ECDH secret delivery.
pub struct EphemeralKeypair {
    pub secret: x25519_dalek::EphemeralSecret,
    pub public: x25519_dalek::PublicKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }
}

/// Derive a ChaCha20-Poly1305 key from an X25519 shared secret via HKDF,
/// domain-separated by `info`, and used to bind the key to the
/// recipient's long-term identity (the phase-11 delivery channel).
fn derive_aead_key(shared_secret: &x25519_dalek::SharedSecret, info: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(info, &mut key)
        .expect("32 bytes is a valid HKDF output length");
    key
}

/// Encrypt `plaintext` (the destination secret) under a key derived from
/// `secret.diffie_hellman(their_identity_public)`, domain-separated by
/// the recipient's user identifier so the ciphertext is bound to them.
pub fn ecdh_encrypt(
    secret: x25519_dalek::EphemeralSecret,
    their_identity_public: &x25519_dalek::PublicKey,
    recipient_user_id: &[u8],
    plaintext: &[u8; 32],
) -> Result<(Vec<u8>, [u8; 12])> {
    let shared = secret.diffie_hellman(their_identity_public);
    let key = derive_aead_key(&shared, recipient_user_id);
    let cipher = ChaCha20Poly1305::new((&key).into());

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|e| Error::Other(format!("AEAD encryption failed: {e}")))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypt a phase-11 secret delivery payload.
pub fn ecdh_decrypt(
    identity_secret: &x25519_dalek::StaticSecret,
    ephemeral_public: &x25519_dalek::PublicKey,
    recipient_user_id: &[u8],
    ciphertext: &[u8],
    nonce: &[u8; 12],
) -> Result<[u8; 32]> {
    let shared = identity_secret.diffie_hellman(ephemeral_public);
    let key = derive_aead_key(&shared, recipient_user_id);
    let cipher = ChaCha20Poly1305::new((&key).into());
    let nonce = Nonce::from_slice(nonce);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| Error::Other(format!("AEAD decryption failed: {e}")))?;

    plaintext
        .try_into()
        .map_err(|_| Error::Other("decrypted secret is not 32 bytes".to_string()))
}

/// Serde module for serializing `[u8; 32]` as hex strings.
pub(crate) mod hex_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hashlock_round_trips_through_sha256() {
        let secret = Secret::generate();
        let hashlock = secret.hashlock();
        assert_eq!(hashlock.0, sha256(&secret.0));
    }

    #[test]
    fn log_normal_samples_stay_within_bounds() {
        for _ in 0..1000 {
            let sample = sample_capped_log_normal(5400.0, 0.45, 1800.0, 14400.0);
            assert!((1800.0..=14400.0).contains(&sample));
        }
    }

    #[test]
    fn log_normal_empirical_median_is_close_to_configured_median() {
        let mut samples: Vec<f64> = (0..1000)
            .map(|_| sample_capped_log_normal(5400.0, 0.45, 1800.0, 14400.0))
            .collect();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = samples[samples.len() / 2];
        assert!((median - 5400.0).abs() < 5400.0 * 0.5);
    }

    #[test]
    fn round_up_to_multiple_rounds_up() {
        assert_eq!(round_up_to_multiple(1801.0, 900.0), 2700.0);
        assert_eq!(round_up_to_multiple(1800.0, 900.0), 1800.0);
        assert_eq!(round_up_to_multiple(0.0, 900.0), 0.0);
    }

    #[test]
    fn ecdh_round_trip_recovers_the_secret() {
        let identity_secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let identity_public = x25519_dalek::PublicKey::from(&identity_secret);

        let ephemeral = EphemeralKeypair::generate();
        let ephemeral_public = ephemeral.public;

        let plaintext = Secret::generate();
        let user_id = b"user-42";

        let (ciphertext, nonce) =
            ecdh_encrypt(ephemeral.secret, &identity_public, user_id, &plaintext.0).unwrap();

        let recovered =
            ecdh_decrypt(&identity_secret, &ephemeral_public, user_id, &ciphertext, &nonce)
                .unwrap();

        assert_eq!(recovered, plaintext.0);
    }
}
