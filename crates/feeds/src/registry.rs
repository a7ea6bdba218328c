//! Tracked-pool registry and USD notional estimation.

use crate::decode::DecodedLog;
use chrono::Utc;
use dashmap::DashMap;
use poolwatch_core::{Address, Chain, Pool, TokenInfo, TradeKind, UsdValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Reference token prices used for USD estimation, e.g. WETH and the
/// major stablecoins. Configured at startup; not a live price feed.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    prices: HashMap<Address, QuoteToken>,
}

#[derive(Debug, Clone)]
pub struct QuoteToken {
    pub symbol: String,
    pub usd_price: f64,
    pub decimals: u8,
}

impl QuoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, address: Address, symbol: &str, usd_price: f64, decimals: u8) {
        self.prices.insert(
            address,
            QuoteToken {
                symbol: symbol.to_string(),
                usd_price,
                decimals,
            },
        );
    }

    pub fn get(&self, address: &Address) -> Option<&QuoteToken> {
        self.prices.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.prices.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// All pools the feed has seen created (or restored from persistence),
/// shared between the decoder path and the poll source's address filter.
#[derive(Debug, Clone)]
pub struct PoolRegistry {
    chain: Chain,
    quotes: Arc<QuoteBook>,
    pools: Arc<DashMap<Address, Pool>>,
}

impl PoolRegistry {
    pub fn new(chain: Chain, quotes: QuoteBook) -> Self {
        Self {
            chain,
            quotes: Arc::new(quotes),
            pools: Arc::new(DashMap::new()),
        }
    }

    /// Build a Pool from a decoded creation log and start tracking it.
    /// Returns None when the pool was already known (duplicate creation log).
    pub fn observe_creation(&self, decoded: &DecodedLog) -> Option<Pool> {
        let DecodedLog::Creation {
            version,
            pool,
            token0,
            token1,
            fee_tier,
            block_number,
            ..
        } = decoded
        else {
            return None;
        };
        if self.pools.contains_key(pool) {
            debug!("pool {} already tracked, ignoring duplicate creation", pool);
            return None;
        }

        // The side listed in the quote book prices the pair; when both or
        // neither side is known, token1 is assumed to be the quote.
        let quote_index = if self.quotes.contains(token1) {
            1
        } else if self.quotes.contains(token0) {
            0
        } else {
            1
        };

        let token_info = |address: &Address| match self.quotes.get(address) {
            Some(q) => TokenInfo::new(*address, &q.symbol, q.decimals),
            None => TokenInfo::unknown(*address),
        };

        let created = Pool {
            chain: self.chain,
            version: *version,
            address: *pool,
            token0: token_info(token0),
            token1: token_info(token1),
            fee_tier: *fee_tier,
            created_block: *block_number,
            created_at: Utc::now(),
            quote_index,
        };
        self.pools.insert(*pool, created.clone());
        Some(created)
    }

    /// Restore a pool from persistence without treating it as new.
    pub fn restore(&self, pool: Pool) {
        self.pools.insert(pool.address, pool);
    }

    pub fn get(&self, address: &Address) -> Option<Pool> {
        self.pools.get(address).map(|p| p.clone())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.pools.contains_key(address)
    }

    /// Tracked pool addresses, for the poll source's address filter.
    pub fn addresses(&self) -> Vec<Address> {
        self.pools.iter().map(|p| *p.key()).collect()
    }

    /// Distinct base tokens across tracked pools, for sentiment polling.
    pub fn base_tokens(&self) -> Vec<Address> {
        let mut seen = std::collections::HashSet::new();
        self.pools
            .iter()
            .filter_map(|p| {
                let token = p.value().base_token().address;
                seen.insert(token).then_some(token)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// USD notional for a decoded trade on a tracked pool.
    ///
    /// The quote leg is valued at its configured reference price; mint and
    /// burn move both legs so their notional is twice the quote leg. Pools
    /// whose quote side has no reference price estimate to zero, which
    /// downstream detectors treat as "unpriceable".
    pub fn estimate_usd(
        &self,
        pool: &Pool,
        kind: TradeKind,
        amount0: u128,
        amount1: u128,
    ) -> UsdValue {
        let quote = pool.quote_token();
        let Some(reference) = self.quotes.get(&quote.address) else {
            return UsdValue::ZERO;
        };
        let quote_amount = if pool.quote_index == 0 { amount0 } else { amount1 };
        let units = quote_amount as f64 / 10f64.powi(reference.decimals as i32);
        let leg_value = units * reference.usd_price;
        match kind {
            TradeKind::Swap => UsdValue::from_f64(leg_value),
            TradeKind::Mint | TradeKind::Burn => UsdValue::from_f64(leg_value * 2.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolwatch_core::{PoolVersion, TxHash};
    use pretty_assertions::assert_eq;

    fn addr(last: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        Address(bytes)
    }

    fn weth() -> Address {
        "0x4200000000000000000000000000000000000006".parse().unwrap()
    }

    fn quotes() -> QuoteBook {
        let mut book = QuoteBook::new();
        book.add(weth(), "WETH", 2_500.0, 18);
        book
    }

    fn creation(pool: Address, token0: Address, token1: Address) -> DecodedLog {
        DecodedLog::Creation {
            version: PoolVersion::V2,
            pool,
            token0,
            token1,
            fee_tier: None,
            block_number: 100,
            tx_hash: TxHash([0u8; 32]),
            log_index: 0,
        }
    }

    #[test]
    fn test_observe_creation_tracks_pool() {
        let registry = PoolRegistry::new(Chain::Base, quotes());
        let pool = registry
            .observe_creation(&creation(addr(0xaa), addr(1), weth()))
            .unwrap();

        assert_eq!(pool.quote_index, 1);
        assert_eq!(pool.quote_token().symbol.as_str(), "WETH");
        assert!(registry.contains(&addr(0xaa)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_creation_ignored() {
        let registry = PoolRegistry::new(Chain::Base, quotes());
        let first = registry.observe_creation(&creation(addr(0xaa), addr(1), weth()));
        let second = registry.observe_creation(&creation(addr(0xaa), addr(1), weth()));

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_quote_side_detection_flipped() {
        let registry = PoolRegistry::new(Chain::Base, quotes());
        let pool = registry
            .observe_creation(&creation(addr(0xbb), weth(), addr(2)))
            .unwrap();
        assert_eq!(pool.quote_index, 0);
        assert_eq!(pool.base_token().address, addr(2));
    }

    #[test]
    fn test_estimate_usd_swap_and_mint() {
        let registry = PoolRegistry::new(Chain::Base, quotes());
        let pool = registry
            .observe_creation(&creation(addr(0xaa), addr(1), weth()))
            .unwrap();

        // 2 WETH quote leg at $2500
        let two_eth: u128 = 2 * 10u128.pow(18);
        let swap = registry.estimate_usd(&pool, TradeKind::Swap, 500, two_eth);
        assert_eq!(swap.to_f64(), 5_000.0);

        // Mint counts both legs
        let mint = registry.estimate_usd(&pool, TradeKind::Mint, 500, two_eth);
        assert_eq!(mint.to_f64(), 10_000.0);
    }

    #[test]
    fn test_estimate_usd_unpriceable_pool() {
        let registry = PoolRegistry::new(Chain::Base, quotes());
        // Neither side is in the quote book
        let pool = registry
            .observe_creation(&creation(addr(0xcc), addr(1), addr(2)))
            .unwrap();
        let usd = registry.estimate_usd(&pool, TradeKind::Swap, 1_000, 1_000);
        assert_eq!(usd, UsdValue::ZERO);
    }

    #[test]
    fn test_restore_does_not_emit() {
        let registry = PoolRegistry::new(Chain::Base, quotes());
        let pool = registry
            .observe_creation(&creation(addr(0xaa), addr(1), weth()))
            .unwrap();

        let fresh = PoolRegistry::new(Chain::Base, quotes());
        fresh.restore(pool.clone());
        assert!(fresh.contains(&pool.address));
        // A later duplicate creation log for a restored pool is ignored
        assert!(fresh
            .observe_creation(&creation(addr(0xaa), addr(1), weth()))
            .is_none());
    }
}
