//! [`SwapIntent`] and [`Solver`]: the user-expressed desire and the
//! counterparty record the embedding application supplies (§3).

use crate::chain::{Asset, Chain};
use crate::error::{Error, Result, SwapError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Desired privacy level, selecting which coordinator drives the swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivacyLevel {
    Standard,
    Maximum,
}

/// Status of a swap intent as tracked by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    Pending,
    Matched,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// User-expressed desire to swap value across chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapIntent {
    pub id: Uuid,
    /// The user's address on each chain they might touch.
    pub user_addresses: HashMap<Chain, String>,
    pub source_chain: Chain,
    pub source_asset: Asset,
    pub source_amount: u64,
    pub dest_chain: Chain,
    pub dest_asset: Asset,
    pub min_dest_amount: u64,
    /// Fraction in `[0, 1]`.
    pub max_slippage: f64,
    /// Wall-clock UNIX seconds past which the swap must not proceed.
    pub deadline: i64,
    pub privacy_level: PrivacyLevel,
    pub status: IntentStatus,
    pub created_at: i64,
}

impl SwapIntent {
    /// Validate the invariants from §3.
    pub fn validate(&self, now: i64) -> Result<()> {
        if self.source_chain == self.dest_chain {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "source and destination chains must differ".to_string(),
            )));
        }
        if self.source_amount == 0 {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "source amount must be > 0".to_string(),
            )));
        }
        if self.deadline <= now {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "deadline must be strictly in the future".to_string(),
            )));
        }
        if !(0.0..=1.0).contains(&self.max_slippage) {
            return Err(Error::Swap(SwapError::InvalidIntent(
                "max_slippage must be in [0, 1]".to_string(),
            )));
        }
        Ok(())
    }

    pub fn user_address(&self, chain: Chain) -> Option<&str> {
        self.user_addresses.get(&chain).map(String::as_str)
    }
}

/// Reputation metrics the embedding application tracks for a solver. The
/// core treats these as opaque ranking input, never as a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverReputation {
    pub completed_swaps: u64,
    pub failed_swaps: u64,
    pub average_completion_seconds: f64,
}

/// Counterparty inventory summary, supplied by the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solver {
    pub id: String,
    pub addresses: HashMap<Chain, String>,
    pub inventory: HashMap<String, u64>,
    pub reputation: SolverReputation,
    /// Fee rate as a fraction, e.g. `0.0025` for 25 bps.
    pub fee_rate: rust_decimal::Decimal,
}

impl Solver {
    pub fn address(&self, chain: Chain) -> Option<&str> {
        self.addresses.get(&chain).map(String::as_str)
    }

    pub fn available_inventory(&self, asset_symbol: &str) -> u64 {
        self.inventory.get(asset_symbol).copied().unwrap_or(0)
    }
}

/// A quote accepted from an external pricing/quoting source. The core
/// never invents quotes; it only validates and executes an accepted one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub route: String,
    pub input_amount: u64,
    pub output_amount: u64,
    pub fee_breakdown: HashMap<String, u64>,
    pub valid_until: i64,
}

impl Quote {
    pub fn is_valid(&self, now: i64) -> bool {
        now < self.valid_until
    }
}
