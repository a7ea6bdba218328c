//! Liquidity pool identity and token metadata.

use crate::{Address, Chain};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Factory generation the pool was created by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PoolVersion {
    V2 = 2,
    V3 = 3,
}

impl PoolVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolVersion::V2 => "V2",
            PoolVersion::V3 => "V3",
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(PoolVersion::V2),
            3 => Some(PoolVersion::V3),
            _ => None,
        }
    }
}

/// One side of a pool's token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    /// Symbol when known; pools discovered from raw logs start with a
    /// placeholder derived from the address.
    pub symbol: CompactString,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn new(address: Address, symbol: &str, decimals: u8) -> Self {
        Self {
            address,
            symbol: CompactString::new(symbol),
            decimals,
        }
    }

    /// Placeholder metadata for a token we have only seen by address.
    pub fn unknown(address: Address) -> Self {
        Self {
            address,
            symbol: CompactString::new(address.short()),
            decimals: 18,
        }
    }
}

/// A liquidity pool observed on chain. Created on the first pool-creation
/// event and immutable afterwards; rolling liquidity lives in the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub chain: Chain,
    pub version: PoolVersion,
    pub address: Address,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    /// V3 fee tier in hundredths of a bip (e.g. 3000 = 0.3%); None for V2.
    pub fee_tier: Option<u32>,
    pub created_block: u64,
    pub created_at: DateTime<Utc>,
    /// Which side is the quote (pricing) token: 0 or 1.
    pub quote_index: u8,
}

impl Pool {
    /// The non-quote token, used for sentiment lookups.
    pub fn base_token(&self) -> &TokenInfo {
        if self.quote_index == 0 {
            &self.token1
        } else {
            &self.token0
        }
    }

    /// The quote side of the pair.
    pub fn quote_token(&self) -> &TokenInfo {
        if self.quote_index == 0 {
            &self.token0
        } else {
            &self.token1
        }
    }

    /// Pair label for logs and alerts, e.g. "PEPE/WETH".
    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.base_token().symbol, self.quote_token().symbol)
    }

    /// Version label including the V3 fee tier when present, e.g. "V3 0.30%".
    pub fn version_label(&self) -> String {
        match self.fee_tier {
            Some(fee) => format!("{} {:.2}%", self.version.as_str(), fee as f64 / 10_000.0),
            None => self.version.as_str().to_string(),
        }
    }

    /// Block explorer link for the pool contract.
    pub fn explorer_url(&self) -> String {
        format!("{}/address/{}", self.chain.explorer_base(), self.address)
    }
}
