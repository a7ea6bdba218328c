//! Application configuration.

use poolwatch_alerts::DispatcherSettings;
use poolwatch_core::{Address, Chain};
use poolwatch_engine::{AggregatorSettings, DetectorSettings};
use poolwatch_feeds::{Endpoint, FeedSettings, LogDecoder, QuoteBook};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error loading or validating configuration. All of these are fatal at
/// startup; nothing downstream treats configuration as recoverable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chain to watch.
    pub chain: Chain,
    /// SQLite database URL.
    pub database_url: String,
    /// Alert webhook receiver. Alerts go to the log when unset.
    pub webhook_url: Option<String>,
    /// Upstream log feed.
    pub feed: FeedSection,
    /// Sentiment service polling.
    pub sentiment: SentimentSection,
    /// Detector thresholds.
    pub detector: DetectorSettings,
    /// Signal aggregation.
    pub aggregator: AggregatorSettings,
    /// Alert delivery.
    pub dispatcher: DispatcherSettings,
    /// Factory contracts that announce new pools.
    pub factories: FactorySection,
    /// Quote tokens with trusted USD prices.
    pub quotes: Vec<QuoteSection>,
    /// Days of trade history kept in the store.
    pub event_retention_days: i64,
    /// Logging level.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chain: Chain::Base,
            database_url: "sqlite://poolwatch.db".to_string(),
            webhook_url: None,
            feed: FeedSection::default(),
            sentiment: SentimentSection::default(),
            detector: DetectorSettings::default(),
            aggregator: AggregatorSettings::default(),
            dispatcher: DispatcherSettings::default(),
            factories: FactorySection::default(),
            quotes: vec![
                QuoteSection::new(
                    "0x4200000000000000000000000000000000000006",
                    "WETH",
                    2500.0,
                    18,
                ),
                QuoteSection::new(
                    "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                    "USDC",
                    1.0,
                    6,
                ),
            ],
            event_retention_days: 7,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Parse a JSON config file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Reject configurations the pipeline cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Invalid("database_url is empty".to_string()));
        }
        if self.feed.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "no feed endpoints configured".to_string(),
            ));
        }
        if matches!(&self.webhook_url, Some(url) if url.is_empty()) {
            return Err(ConfigError::Invalid(
                "webhook_url is empty, omit it to log alerts instead".to_string(),
            ));
        }
        if self.event_retention_days <= 0 {
            return Err(ConfigError::Invalid(
                "event_retention_days must be positive".to_string(),
            ));
        }
        if self.sentiment.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sentiment.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.sentiment.staleness_secs <= 0 {
            return Err(ConfigError::Invalid(
                "sentiment.staleness_secs must be positive".to_string(),
            ));
        }

        self.detector
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.aggregator
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.dispatcher
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        // Addresses parse here so a typo is a startup error, not a half
        // built registry later.
        self.factories.v2_addresses()?;
        self.factories.v3_addresses()?;
        if self.factories.v2.is_empty() && self.factories.v3.is_empty() {
            return Err(ConfigError::Invalid(
                "no factory contracts configured".to_string(),
            ));
        }

        if self.quotes.is_empty() {
            return Err(ConfigError::Invalid(
                "no quote tokens configured".to_string(),
            ));
        }
        for quote in &self.quotes {
            parse_address(&quote.address)?;
            if !quote.usd_price.is_finite() || quote.usd_price <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "quote {} needs a positive usd_price",
                    quote.symbol
                )));
            }
        }

        Ok(())
    }

    /// Feed settings for the chain event feed.
    pub fn feed_settings(&self) -> FeedSettings {
        (&self.feed).into()
    }

    /// Quote token book used for USD notional estimates.
    pub fn quote_book(&self) -> Result<QuoteBook, ConfigError> {
        let mut book = QuoteBook::new();
        for quote in &self.quotes {
            book.add(
                parse_address(&quote.address)?,
                &quote.symbol,
                quote.usd_price,
                quote.decimals,
            );
        }
        Ok(book)
    }

    /// Log decoder watching the configured factories.
    pub fn decoder(&self) -> Result<LogDecoder, ConfigError> {
        Ok(LogDecoder::new(
            self.factories.v2_addresses()?,
            self.factories.v3_addresses()?,
        ))
    }
}

/// Upstream endpoints and feed pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSection {
    /// Fallback list, tried in ascending priority order.
    pub endpoints: Vec<Endpoint>,
    /// Base reconnect delay in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub backoff_ceiling_ms: u64,
    /// Poll transport query interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Max blocks per range query.
    pub max_blocks_per_query: u64,
    /// Network call timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Dedup retention window in blocks.
    pub dedup_retention_blocks: u64,
}

impl Default for FeedSection {
    fn default() -> Self {
        let defaults = FeedSettings::default();
        Self {
            endpoints: vec![
                Endpoint::socket("wss://base-rpc.publicnode.com", 0),
                Endpoint::poll("https://mainnet.base.org", 1),
            ],
            reconnect_delay_ms: defaults.reconnect_delay_ms,
            backoff_ceiling_ms: defaults.backoff_ceiling_ms,
            poll_interval_ms: defaults.poll_interval_ms,
            max_blocks_per_query: defaults.max_blocks_per_query,
            request_timeout_ms: defaults.request_timeout_ms,
            dedup_retention_blocks: defaults.dedup_retention_blocks,
        }
    }
}

impl From<&FeedSection> for FeedSettings {
    fn from(section: &FeedSection) -> Self {
        FeedSettings {
            endpoints: section.endpoints.clone(),
            reconnect_delay_ms: section.reconnect_delay_ms,
            backoff_ceiling_ms: section.backoff_ceiling_ms,
            poll_interval_ms: section.poll_interval_ms,
            max_blocks_per_query: section.max_blocks_per_query,
            request_timeout_ms: section.request_timeout_ms,
            dedup_retention_blocks: section.dedup_retention_blocks,
        }
    }
}

/// Sentiment service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSection {
    /// Scoring service base URL. Polling is disabled when unset.
    pub url: Option<String>,
    /// Poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Scores older than this count as missing, never as zero.
    pub staleness_secs: i64,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for SentimentSection {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval_secs: 60,
            staleness_secs: 900,
            request_timeout_ms: 10_000,
        }
    }
}

/// Factory contracts whose pool-creation logs are watched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorySection {
    /// V2-style factories (PairCreated).
    pub v2: Vec<String>,
    /// V3-style factories (PoolCreated).
    pub v3: Vec<String>,
}

impl Default for FactorySection {
    fn default() -> Self {
        // Uniswap factories on Base.
        Self {
            v2: vec!["0x8909Dc15e40173Ff4699343b6eB8132c65e18eC6".to_string()],
            v3: vec!["0x33128a8fC17869897dcE68Ed026d694621f6FDfD".to_string()],
        }
    }
}

impl FactorySection {
    pub fn v2_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.v2.iter().map(|s| parse_address(s)).collect()
    }

    pub fn v3_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.v3.iter().map(|s| parse_address(s)).collect()
    }
}

/// One quote token with a trusted USD price. Trade notional is estimated
/// from the quote side of the pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSection {
    /// Token contract address.
    pub address: String,
    /// Display symbol.
    pub symbol: String,
    /// USD price per whole token.
    pub usd_price: f64,
    /// Token decimals.
    pub decimals: u8,
}

impl QuoteSection {
    pub fn new(address: &str, symbol: &str, usd_price: f64, decimals: u8) -> Self {
        Self {
            address: address.to_string(),
            symbol: symbol.to_string(),
            usd_price,
            decimals,
        }
    }
}

fn parse_address(s: &str) -> Result<Address, ConfigError> {
    s.parse()
        .map_err(|e| ConfigError::Invalid(format!("bad address {}: {}", s, e)))
}
