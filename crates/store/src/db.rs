//! SQLite database behind the monitor's durable state.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use poolwatch_core::{
    Address, Alert, Chain, Phase, Pool, PoolVersion, StrategySnapshot, TokenInfo, TradeEvent,
    TradeKind, TxHash, UsdValue,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Delivery progress of one alert, keyed by its idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Pending,
    Sent,
    Failed,
}

impl DispatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Sent => "sent",
            DispatchStatus::Failed => "failed",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DispatchStatus::Pending),
            "sent" => Some(DispatchStatus::Sent),
            "failed" => Some(DispatchStatus::Failed),
            _ => None,
        }
    }
}

/// One persisted dispatch row, as surfaced to the redrive pass.
#[derive(Debug, Clone)]
pub struct StoredDispatch {
    pub idempotency_key: String,
    pub alert: Alert,
    pub status: DispatchStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Database handle shared across the process.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (and create if missing) the database at the given URL.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pools (
                address TEXT PRIMARY KEY,
                chain INTEGER NOT NULL,
                version INTEGER NOT NULL,
                token0_address TEXT NOT NULL,
                token0_symbol TEXT NOT NULL,
                token0_decimals INTEGER NOT NULL,
                token1_address TEXT NOT NULL,
                token1_symbol TEXT NOT NULL,
                token1_decimals INTEGER NOT NULL,
                fee_tier INTEGER,
                created_block INTEGER NOT NULL,
                created_at DATETIME NOT NULL,
                quote_index INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Append-only; the UNIQUE pair is what makes replays idempotent.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pool TEXT NOT NULL,
                kind TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                amount0 TEXT NOT NULL,
                amount1 TEXT NOT NULL,
                token0_in INTEGER NOT NULL,
                usd_value REAL NOT NULL,
                observed_at DATETIME NOT NULL,
                UNIQUE(tx_hash, log_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trade_events_pool
            ON trade_events(pool, block_number)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                source TEXT PRIMARY KEY,
                block INTEGER NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatches (
                idempotency_key TEXT PRIMARY KEY,
                pool TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_snapshots (
                pool TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                epoch INTEGER NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Track a pool. Creation metadata never changes, so replays are no-ops.
    pub async fn save_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO pools
                (address, chain, version, token0_address, token0_symbol, token0_decimals,
                 token1_address, token1_symbol, token1_decimals, fee_tier, created_block,
                 created_at, quote_index)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(pool.address.to_string())
        .bind(pool.chain.id())
        .bind(pool.version as u8)
        .bind(pool.token0.address.to_string())
        .bind(pool.token0.symbol.as_str())
        .bind(pool.token0.decimals)
        .bind(pool.token1.address.to_string())
        .bind(pool.token1.symbol.as_str())
        .bind(pool.token1.decimals)
        .bind(pool.fee_tier.map(|fee| fee as i64))
        .bind(pool.created_block as i64)
        .bind(pool.created_at)
        .bind(pool.quote_index)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every tracked pool, for registry warm-up at startup.
    pub async fn load_pools(&self) -> Result<Vec<Pool>, StoreError> {
        let rows = sqlx::query_as::<
            _,
            (
                String,
                u8,
                u8,
                String,
                String,
                u8,
                String,
                String,
                u8,
                Option<i64>,
                i64,
                DateTime<Utc>,
                u8,
            ),
        >(
            r#"
            SELECT address, chain, version, token0_address, token0_symbol, token0_decimals,
                   token1_address, token1_symbol, token1_decimals, fee_tier, created_block,
                   created_at, quote_index
            FROM pools
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_pool).collect()
    }

    /// Append one trade to the event log. Returns false when the
    /// (tx_hash, log_index) pair was already recorded.
    pub async fn append_trade(&self, event: &TradeEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO trade_events
                (pool, kind, block_number, tx_hash, log_index, amount0, amount1,
                 token0_in, usd_value, observed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.pool.to_string())
        .bind(event.kind.as_str())
        .bind(event.block_number as i64)
        .bind(event.tx_hash.to_string())
        .bind(event.log_index)
        .bind(event.amount0.to_string())
        .bind(event.amount1.to_string())
        .bind(event.token0_in)
        .bind(event.usd_value.to_f64())
        .bind(event.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recent trades for one pool, newest first.
    pub async fn recent_trades(
        &self,
        pool: &Address,
        limit: u32,
    ) -> Result<Vec<TradeEvent>, StoreError> {
        let rows = sqlx::query_as::<
            _,
            (
                String,
                String,
                i64,
                String,
                u32,
                String,
                String,
                bool,
                f64,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT pool, kind, block_number, tx_hash, log_index, amount0, amount1,
                   token0_in, usd_value, observed_at
            FROM trade_events
            WHERE pool = ?
            ORDER BY block_number DESC, log_index DESC
            LIMIT ?
            "#,
        )
        .bind(pool.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_trade).collect()
    }

    /// Drop trade log entries older than `days`.
    pub async fn cleanup_trades(&self, days: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM trade_events WHERE observed_at < datetime('now', ? || ' days')",
        )
        .bind(-days)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Persist the highest acknowledged block for a feed source.
    /// The stored value never moves backwards.
    pub async fn save_checkpoint(&self, source: &str, block: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (source, block) VALUES (?, ?)
            ON CONFLICT(source)
            DO UPDATE SET block = MAX(block, ?), updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(source)
        .bind(block as i64)
        .bind(block as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_checkpoint(&self, source: &str) -> Result<Option<u64>, StoreError> {
        let block = sqlx::query_scalar::<_, i64>("SELECT block FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(&self.pool)
            .await?;
        Ok(block.map(|block| block as u64))
    }

    /// Reserve an alert for delivery. Returns false when the key is already
    /// tracked, which is how duplicate qualifications are suppressed.
    pub async fn reserve_dispatch(&self, alert: &Alert) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(alert)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO dispatches (idempotency_key, pool, payload) VALUES (?, ?, ?)",
        )
        .bind(&alert.idempotency_key)
        .bind(alert.pool.to_string())
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_dispatch_sent(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE dispatches
            SET status = 'sent', updated_at = CURRENT_TIMESTAMP
            WHERE idempotency_key = ?
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_dispatch_failed(
        &self,
        key: &str,
        attempts: u32,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE dispatches
            SET status = 'failed', attempts = ?, last_error = ?, updated_at = CURRENT_TIMESTAMP
            WHERE idempotency_key = ?
            "#,
        )
        .bind(attempts)
        .bind(error)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Dispatches that never completed, oldest first. Failed deliveries stay
    /// here until a redrive marks them sent; they are never dropped.
    pub async fn undelivered_dispatches(
        &self,
        limit: u32,
    ) -> Result<Vec<StoredDispatch>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, u32, Option<String>)>(
            r#"
            SELECT idempotency_key, payload, status, attempts, last_error
            FROM dispatches
            WHERE status != 'sent'
            ORDER BY created_at
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(idempotency_key, payload, status, attempts, last_error)| {
                    let alert: Alert = serde_json::from_str(&payload)?;
                    let status = DispatchStatus::from_str_opt(&status).ok_or_else(|| {
                        StoreError::Corrupt(format!("unknown dispatch status: {}", status))
                    })?;
                    Ok(StoredDispatch {
                        idempotency_key,
                        alert,
                        status,
                        attempts,
                        last_error,
                    })
                },
            )
            .collect()
    }

    /// Drop delivered history older than `days`. Undelivered rows are kept
    /// regardless of age.
    pub async fn cleanup_dispatches(&self, days: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM dispatches WHERE status = 'sent' AND updated_at < datetime('now', ? || ' days')",
        )
        .bind(-days)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn save_snapshot(&self, snapshot: &StrategySnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO strategy_snapshots (pool, phase, epoch, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(pool) DO UPDATE SET phase = ?, epoch = ?, updated_at = ?
            "#,
        )
        .bind(snapshot.pool.to_string())
        .bind(snapshot.phase.as_str())
        .bind(snapshot.epoch)
        .bind(snapshot.updated_at)
        .bind(snapshot.phase.as_str())
        .bind(snapshot.epoch)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Per-pool aggregation state for warm restart.
    pub async fn load_snapshots(&self) -> Result<Vec<StrategySnapshot>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, u32, DateTime<Utc>)>(
            "SELECT pool, phase, epoch, updated_at FROM strategy_snapshots",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(pool, phase, epoch, updated_at)| {
                Ok(StrategySnapshot {
                    pool: parse_address(&pool)?,
                    phase: Phase::from_str_opt(&phase).ok_or_else(|| {
                        StoreError::Corrupt(format!("unknown phase: {}", phase))
                    })?,
                    epoch,
                    updated_at,
                })
            })
            .collect()
    }
}

fn parse_address(s: &str) -> Result<Address, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Corrupt(format!("bad address {}: {}", s, e)))
}

fn parse_tx_hash(s: &str) -> Result<TxHash, StoreError> {
    s.parse()
        .map_err(|e| StoreError::Corrupt(format!("bad tx hash {}: {}", s, e)))
}

fn parse_u128(s: &str) -> Result<u128, StoreError> {
    s.parse()
        .map_err(|_| StoreError::Corrupt(format!("bad amount: {}", s)))
}

#[allow(clippy::type_complexity)]
fn row_to_pool(
    row: (
        String,
        u8,
        u8,
        String,
        String,
        u8,
        String,
        String,
        u8,
        Option<i64>,
        i64,
        DateTime<Utc>,
        u8,
    ),
) -> Result<Pool, StoreError> {
    let (
        address,
        chain,
        version,
        token0_address,
        token0_symbol,
        token0_decimals,
        token1_address,
        token1_symbol,
        token1_decimals,
        fee_tier,
        created_block,
        created_at,
        quote_index,
    ) = row;

    Ok(Pool {
        chain: Chain::from_id(chain)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown chain id: {}", chain)))?,
        version: PoolVersion::from_id(version)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown pool version: {}", version)))?,
        address: parse_address(&address)?,
        token0: TokenInfo::new(parse_address(&token0_address)?, &token0_symbol, token0_decimals),
        token1: TokenInfo::new(parse_address(&token1_address)?, &token1_symbol, token1_decimals),
        fee_tier: fee_tier.map(|fee| fee as u32),
        created_block: created_block as u64,
        created_at,
        quote_index,
    })
}

#[allow(clippy::type_complexity)]
fn row_to_trade(
    row: (
        String,
        String,
        i64,
        String,
        u32,
        String,
        String,
        bool,
        f64,
        DateTime<Utc>,
    ),
) -> Result<TradeEvent, StoreError> {
    let (
        pool,
        kind,
        block_number,
        tx_hash,
        log_index,
        amount0,
        amount1,
        token0_in,
        usd_value,
        observed_at,
    ) = row;

    Ok(TradeEvent {
        pool: parse_address(&pool)?,
        kind: TradeKind::from_str_opt(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown trade kind: {}", kind)))?,
        block_number: block_number as u64,
        tx_hash: parse_tx_hash(&tx_hash)?,
        log_index,
        amount0: parse_u128(&amount0)?,
        amount1: parse_u128(&amount1)?,
        token0_in,
        usd_value: UsdValue::from_f64(usd_value),
        observed_at,
    })
}
