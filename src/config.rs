//! PSBT options.

use std::path::Path;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_MAXIMUM_FEE_RATE;
use crate::error::Result;

/// Options carried by every [`Psbt`](crate::Psbt).
///
/// Loaded from JSON like the key files; absent fields take their defaults:
///
/// ```json
/// { "network": "regtest", "maximum_fee_rate": 200 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsbtConfig {
    /// Network used to resolve output addresses.
    pub network: Network,
    /// Highest fee rate, in sat/vB, [`extract_transaction`](crate::Psbt::extract_transaction)
    /// accepts without `disable_fee_check`.
    pub maximum_fee_rate: u64,
}

impl Default for PsbtConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            maximum_fee_rate: DEFAULT_MAXIMUM_FEE_RATE,
        }
    }
}

impl PsbtConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
