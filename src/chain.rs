//! [`Chain`]: the closed enumeration of supported networks, and the
//! static properties the coordinators query instead of hard-coding chain
//! identity (§3 data model, §9 "no hidden plugin loading").

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed enumeration of the six supported networks. One UTXO chain, five
/// account-model chains with distinct signature and VM regimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    /// UTXO chain; HTLC realized as a P2SH-wrapped taproot/witness script.
    Utxo,
    /// EVM-style smart-contract chain; HTLC realized as a deployed
    /// contract with `new_swap`/`withdraw`/`refund` methods.
    Evm,
    /// Cosmos/CosmWasm chain; HTLC realized as `new_swap`/`withdraw`/
    /// `refund` execute messages over a REST endpoint.
    Tendermint,
    /// Slot-based chain; HTLC realized as a program account, timelock
    /// expressed in slot numbers rather than wall-clock seconds.
    SlotChain,
    /// Shielded note chain (the privacy hub's default home); HTLC
    /// realized as a note script using a circuit-friendly native hash.
    ShieldedNote,
    /// zkApp chain with a GraphQL endpoint; HTLC realized as a zkApp
    /// method using a circuit-friendly native hash.
    ZkApp,
}

impl Chain {
    /// All six supported chains, in a stable order.
    pub const ALL: [Chain; 6] = [
        Chain::Utxo,
        Chain::Evm,
        Chain::Tendermint,
        Chain::SlotChain,
        Chain::ShieldedNote,
        Chain::ZkApp,
    ];

    /// Native currency symbol.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Utxo => "UTXO",
            Chain::Evm => "EVM",
            Chain::Tendermint => "ATOM-LIKE",
            Chain::SlotChain => "SLOT",
            Chain::ShieldedNote => "SHIELD",
            Chain::ZkApp => "ZKAPP",
        }
    }

    /// Nominal block (or slot) time.
    pub fn nominal_block_time(&self) -> Duration {
        match self {
            Chain::Utxo => Duration::from_secs(600),
            Chain::Evm => Duration::from_secs(12),
            Chain::Tendermint => Duration::from_secs(6),
            Chain::SlotChain => Duration::from_millis(400),
            Chain::ShieldedNote => Duration::from_secs(75),
            Chain::ZkApp => Duration::from_secs(180),
        }
    }

    /// Minimum confirmations for "final".
    pub fn finality_confirmations(&self) -> u32 {
        match self {
            Chain::Utxo => 6,
            Chain::Evm => 12,
            Chain::Tendermint => 1,
            Chain::SlotChain => 32,
            Chain::ShieldedNote => 3,
            Chain::ZkApp => 1,
        }
    }

    /// The unit in which this chain's timelocks are natively expressed.
    pub fn timelock_unit(&self) -> TimelockUnit {
        match self {
            Chain::Utxo => TimelockUnit::WallClockSeconds,
            Chain::Evm => TimelockUnit::WallClockSeconds,
            Chain::Tendermint => TimelockUnit::WallClockSeconds,
            Chain::SlotChain => TimelockUnit::SlotNumber,
            Chain::ShieldedNote => TimelockUnit::WallClockSeconds,
            Chain::ZkApp => TimelockUnit::BlockHeight,
        }
    }

    /// Whether this chain supports shielded (hub-eligible) operations.
    /// The privacy coordinator refuses to select an unsupported hub
    /// chain rather than silently falling back to a transparent one.
    pub fn supports_shielded_ops(&self) -> bool {
        matches!(self, Chain::ShieldedNote)
    }
}

/// The unit in which a chain's timelocks are natively expressed. All
/// [`crate::htlc::HtlcParams`] expiries are wall-clock UNIX seconds;
/// adapters for `SlotNumber`/`BlockHeight` chains translate using a live
/// estimate of the chain's block/slot duration (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelockUnit {
    WallClockSeconds,
    BlockHeight,
    SlotNumber,
}

/// (symbol, decimals, chain, optional contract identifier). Immutable
/// value object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub decimals: u8,
    pub chain: Chain,
    /// Contract/denom identifier for non-native assets (ERC-20 address,
    /// CW20 contract, token-program mint, etc.).
    pub contract_id: Option<String>,
}

impl Asset {
    pub fn native(chain: Chain) -> Self {
        Self {
            symbol: chain.native_symbol().to_string(),
            decimals: 8,
            chain,
            contract_id: None,
        }
    }
}
