//! Blockchain chain identifiers and utilities.

use serde::{Deserialize, Serialize};

/// Blockchain network identifier.
/// Uses u8 representation for compact serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Chain {
    Base = 1,
    Ethereum = 2,
}

impl Chain {
    /// Create Chain from u8 ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Chain::Base),
            2 => Some(Chain::Ethereum),
            _ => None,
        }
    }

    /// Get u8 ID of this chain.
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// EVM network chain ID as used in JSON-RPC.
    #[inline]
    pub fn network_id(self) -> u64 {
        match self {
            Chain::Base => 8453,
            Chain::Ethereum => 1,
        }
    }

    /// Get string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Base => "Base",
            Chain::Ethereum => "Ethereum",
        }
    }

    /// Block explorer base URL, used to build address links in alerts.
    pub fn explorer_base(self) -> &'static str {
        match self {
            Chain::Base => "https://basescan.org",
            Chain::Ethereum => "https://etherscan.io",
        }
    }

    /// Get all chain variants.
    pub fn all() -> &'static [Chain] {
        &[Chain::Base, Chain::Ethereum]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_from_id() {
        assert_eq!(Chain::from_id(1), Some(Chain::Base));
        assert_eq!(Chain::from_id(2), Some(Chain::Ethereum));
        // Invalid ID should return None
        assert_eq!(Chain::from_id(255), None);
    }

    #[test]
    fn test_chain_to_id() {
        assert_eq!(Chain::Base.id(), 1);
        assert_eq!(Chain::Ethereum.id(), 2);
    }

    #[test]
    fn test_network_id() {
        assert_eq!(Chain::Base.network_id(), 8453);
        assert_eq!(Chain::Ethereum.network_id(), 1);
    }

    #[test]
    fn test_chain_display() {
        assert_eq!(Chain::Base.as_str(), "Base");
        assert_eq!(Chain::Ethereum.as_str(), "Ethereum");
    }

    #[test]
    fn test_explorer_base() {
        assert_eq!(Chain::Base.explorer_base(), "https://basescan.org");
        assert_eq!(Chain::Ethereum.explorer_base(), "https://etherscan.io");
    }

    #[test]
    fn test_chain_all_variants() {
        let all = Chain::all();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&Chain::Base));
        assert!(all.contains(&Chain::Ethereum));
    }
}
