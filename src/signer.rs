//! The signer contract (§6): the single privilege boundary between the
//! core and raw key material. The core calls `sign`; it never sees or
//! stores the key itself.

use crate::adapter::{SignedTransaction, UnsignedTransaction};
use crate::chain::Chain;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, chain: Chain, unsigned: UnsignedTransaction) -> Result<SignedTransaction>;
}
