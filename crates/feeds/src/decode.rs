//! Raw log recognition and ABI decoding for factory and pool events.

use crate::rpc::{
    data_word, parse_hex_u64, topic_address, word_address, word_i128_magnitude, word_u128,
    LogEntry,
};
use crate::FeedError;
use poolwatch_core::{Address, PoolVersion, TradeKind, TxHash};
use tracing::debug;

/// keccak256 event signatures for the log kinds this feed understands.
pub mod topics {
    /// PairCreated(address,address,address,uint256)
    pub const V2_PAIR_CREATED: &str =
        "0x0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9";
    /// PoolCreated(address,address,uint24,int24,address)
    pub const V3_POOL_CREATED: &str =
        "0x783cca1c0412dd0d695e784568c96da2e9c22ff989357a2e8b1d9b2b4e6b7118";
    /// Mint(address,uint256,uint256)
    pub const V2_MINT: &str =
        "0x4c209b5fc8ad50758f13e2e1088ba56a560dff690a1c6fef26394f4c03821c4f";
    /// Burn(address,uint256,uint256,address)
    pub const V2_BURN: &str =
        "0xdccd412f0b1252819cb1fd330b93224ca42612892bb3f4f789976e6d81936496";
    /// Swap(address,uint256,uint256,uint256,uint256,address)
    pub const V2_SWAP: &str =
        "0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822";
    /// Mint(address,address,int24,int24,uint128,uint256,uint256)
    pub const V3_MINT: &str =
        "0x7a53080ba414158be7ec69b987b5fb7d07dee101fe85488f0853ae16239d0bde";
    /// Burn(address,int24,int24,uint128,uint256,uint256)
    pub const V3_BURN: &str =
        "0x0c396cd989a39f4459b5fa1aed6a9a8dcdbc45908acfd67e028cd568da98982c";
    /// Swap(address,address,int256,int256,uint160,uint128,int24)
    pub const V3_SWAP: &str =
        "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67";

    /// All topic0 values, for subscription filters.
    pub fn all() -> &'static [&'static str] {
        &[
            V2_PAIR_CREATED,
            V3_POOL_CREATED,
            V2_MINT,
            V2_BURN,
            V2_SWAP,
            V3_MINT,
            V3_BURN,
            V3_SWAP,
        ]
    }

    /// Creation topics only, for the factory-scoped poll query.
    pub fn creations() -> &'static [&'static str] {
        &[V2_PAIR_CREATED, V3_POOL_CREATED]
    }

    /// Trade topics only, for the pool-scoped poll query.
    pub fn trades() -> &'static [&'static str] {
        &[V2_MINT, V2_BURN, V2_SWAP, V3_MINT, V3_BURN, V3_SWAP]
    }
}

/// A recognized, ABI-decoded log. Still raw: token symbols, USD estimates
/// and registry checks happen downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLog {
    Creation {
        version: PoolVersion,
        pool: Address,
        token0: Address,
        token1: Address,
        fee_tier: Option<u32>,
        block_number: u64,
        tx_hash: TxHash,
        log_index: u32,
    },
    Trade {
        pool: Address,
        kind: TradeKind,
        amount0: u128,
        amount1: u128,
        token0_in: bool,
        block_number: u64,
        tx_hash: TxHash,
        log_index: u32,
    },
}

/// Decodes raw logs against a configured set of factory addresses.
/// Creation logs from unknown factories and unrecognized topics yield None;
/// recognized-but-malformed logs yield an error so the caller can drop and
/// log exactly one event without stalling the stream.
#[derive(Debug, Clone)]
pub struct LogDecoder {
    v2_factories: Vec<Address>,
    v3_factories: Vec<Address>,
}

impl LogDecoder {
    pub fn new(v2_factories: Vec<Address>, v3_factories: Vec<Address>) -> Self {
        Self {
            v2_factories,
            v3_factories,
        }
    }

    pub fn factory_addresses(&self) -> Vec<Address> {
        let mut all = self.v2_factories.clone();
        all.extend(self.v3_factories.iter().copied());
        all
    }

    pub fn decode(&self, log: &LogEntry) -> Result<Option<DecodedLog>, FeedError> {
        if log.removed {
            debug!("skipping reorged-out log in tx {}", log.transaction_hash);
            return Ok(None);
        }
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };

        let block_number = log.block()?;
        let log_index = log.index()?;
        let tx_hash: TxHash = log
            .transaction_hash
            .parse()
            .map_err(|e| FeedError::ParseError(format!("bad tx hash: {}", e)))?;
        let emitter: Address = log
            .address
            .parse()
            .map_err(|e| FeedError::ParseError(format!("bad log address: {}", e)))?;

        match topic0.as_str() {
            topics::V2_PAIR_CREATED => {
                if !self.v2_factories.contains(&emitter) {
                    return Ok(None);
                }
                let token0 = topic_address(topic(log, 1)?)?;
                let token1 = topic_address(topic(log, 2)?)?;
                let pool = word_address(word(log, 0)?)?;
                Ok(Some(DecodedLog::Creation {
                    version: PoolVersion::V2,
                    pool,
                    token0,
                    token1,
                    fee_tier: None,
                    block_number,
                    tx_hash,
                    log_index,
                }))
            }
            topics::V3_POOL_CREATED => {
                if !self.v3_factories.contains(&emitter) {
                    return Ok(None);
                }
                let token0 = topic_address(topic(log, 1)?)?;
                let token1 = topic_address(topic(log, 2)?)?;
                let fee = parse_hex_u64(topic(log, 3)?)? as u32;
                // data = (int24 tickSpacing, address pool)
                let pool = word_address(word(log, 1)?)?;
                Ok(Some(DecodedLog::Creation {
                    version: PoolVersion::V3,
                    pool,
                    token0,
                    token1,
                    fee_tier: Some(fee),
                    block_number,
                    tx_hash,
                    log_index,
                }))
            }
            topics::V2_MINT => Ok(Some(DecodedLog::Trade {
                pool: emitter,
                kind: TradeKind::Mint,
                amount0: word_u128(word(log, 0)?),
                amount1: word_u128(word(log, 1)?),
                token0_in: true,
                block_number,
                tx_hash,
                log_index,
            })),
            topics::V2_BURN => Ok(Some(DecodedLog::Trade {
                pool: emitter,
                kind: TradeKind::Burn,
                amount0: word_u128(word(log, 0)?),
                amount1: word_u128(word(log, 1)?),
                token0_in: false,
                block_number,
                tx_hash,
                log_index,
            })),
            topics::V2_SWAP => {
                // data = (amount0In, amount1In, amount0Out, amount1Out)
                let a0_in = word_u128(word(log, 0)?);
                let a1_in = word_u128(word(log, 1)?);
                let a0_out = word_u128(word(log, 2)?);
                let a1_out = word_u128(word(log, 3)?);
                Ok(Some(DecodedLog::Trade {
                    pool: emitter,
                    kind: TradeKind::Swap,
                    amount0: a0_in.max(a0_out),
                    amount1: a1_in.max(a1_out),
                    token0_in: a0_in > 0,
                    block_number,
                    tx_hash,
                    log_index,
                }))
            }
            topics::V3_MINT => Ok(Some(DecodedLog::Trade {
                pool: emitter,
                // data = (sender, amount, amount0, amount1)
                kind: TradeKind::Mint,
                amount0: word_u128(word(log, 2)?),
                amount1: word_u128(word(log, 3)?),
                token0_in: true,
                block_number,
                tx_hash,
                log_index,
            })),
            topics::V3_BURN => Ok(Some(DecodedLog::Trade {
                pool: emitter,
                // data = (amount, amount0, amount1)
                kind: TradeKind::Burn,
                amount0: word_u128(word(log, 1)?),
                amount1: word_u128(word(log, 2)?),
                token0_in: false,
                block_number,
                tx_hash,
                log_index,
            })),
            topics::V3_SWAP => {
                // data = (int256 amount0, int256 amount1, ...); positive flows in
                let (a0, a0_neg) = word_i128_magnitude(word(log, 0)?);
                let (a1, _) = word_i128_magnitude(word(log, 1)?);
                Ok(Some(DecodedLog::Trade {
                    pool: emitter,
                    kind: TradeKind::Swap,
                    amount0: a0,
                    amount1: a1,
                    token0_in: !a0_neg,
                    block_number,
                    tx_hash,
                    log_index,
                }))
            }
            _ => Ok(None),
        }
    }
}

fn topic<'a>(log: &'a LogEntry, index: usize) -> Result<&'a str, FeedError> {
    log.topics
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| FeedError::ParseError(format!("missing topic {}", index)))
}

fn word<'a>(log: &'a LogEntry, index: usize) -> Result<&'a str, FeedError> {
    data_word(&log.data, index)
        .ok_or_else(|| FeedError::ParseError(format!("data too short for word {}", index)))
}
