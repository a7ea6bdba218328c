//! Sentiment oracle adapter: polls an external scoring service and caches
//! the latest per-token score with a staleness cutoff.
//!
//! Unavailable or stale scores surface as "no signal" (`None`), never as a
//! zero score. A zero would read as neutral sentiment, which is a different
//! claim than "we don't know".

use crate::registry::PoolRegistry;
use crate::OracleError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use poolwatch_core::{clamp_score, Address, SentimentScore};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A source of per-token sentiment scores in [-1.0, 1.0].
#[async_trait]
pub trait SentimentOracle: Send + Sync {
    async fn score(&self, token: Address) -> Result<f64, OracleError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// HTTP oracle: `GET {base_url}?token=0x...` returning `{"score": 0.42}`.
pub struct HttpSentimentOracle {
    base_url: String,
    client: reqwest::Client,
    name: String,
}

impl HttpSentimentOracle {
    pub fn new(base_url: &str, request_timeout_ms: u64) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()?;
        let name = url::Url::parse(base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "sentiment".to_string());
        Ok(Self {
            base_url: base_url.to_string(),
            client,
            name,
        })
    }
}

#[async_trait]
impl SentimentOracle for HttpSentimentOracle {
    async fn score(&self, token: Address) -> Result<f64, OracleError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("token", token.to_string())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OracleError::Unavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let body: ScoreResponse = response.json().await?;
        if !body.score.is_finite() {
            return Err(OracleError::InvalidResponse(format!(
                "non-finite score {}",
                body.score
            )));
        }
        Ok(clamp_score(body.score))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Latest score per token, shared between the poller and the detectors.
#[derive(Debug)]
pub struct SentimentCache {
    scores: DashMap<Address, SentimentScore>,
    ttl: chrono::Duration,
}

impl SentimentCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            scores: DashMap::new(),
            ttl: chrono::Duration::seconds(ttl_secs),
        }
    }

    pub fn record(&self, score: SentimentScore) {
        self.scores.insert(score.token, score);
    }

    /// The latest score for `token`, or `None` when missing or stale.
    pub fn latest(&self, token: &Address) -> Option<SentimentScore> {
        self.latest_at(token, Utc::now())
    }

    fn latest_at(
        &self,
        token: &Address,
        now: chrono::DateTime<Utc>,
    ) -> Option<SentimentScore> {
        let entry = self.scores.get(token)?;
        if entry.is_stale(self.ttl, now) {
            debug!("sentiment for {} went stale, no signal", token.short());
            return None;
        }
        Some(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Polls the oracle for every distinct base token at a fixed interval.
pub struct SentimentPoller {
    oracle: Arc<dyn SentimentOracle>,
    cache: Arc<SentimentCache>,
    registry: PoolRegistry,
    interval: Duration,
}

impl SentimentPoller {
    pub fn new(
        oracle: Arc<dyn SentimentOracle>,
        cache: Arc<SentimentCache>,
        registry: PoolRegistry,
        interval_secs: u64,
    ) -> Self {
        Self {
            oracle,
            cache,
            registry,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    pub async fn run(self, running: Arc<AtomicBool>) {
        info!(
            "sentiment poller started ({}, every {}s)",
            self.oracle.name(),
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while running.load(Ordering::Relaxed) {
            ticker.tick().await;
            self.poll_once().await;
        }
        info!("sentiment poller stopped");
    }

    /// One polling pass. Failures leave the cache untouched, so the last
    /// good score stays visible until the staleness cutoff retires it.
    pub async fn poll_once(&self) {
        let tokens = self.registry.base_tokens();
        if tokens.is_empty() {
            return;
        }
        let mut fetched = 0usize;
        for token in tokens {
            match self.oracle.score(token).await {
                Ok(value) => {
                    self.cache
                        .record(SentimentScore::new(token, value, self.oracle.name()));
                    fetched += 1;
                }
                Err(e) => {
                    warn!("sentiment unavailable for {}: {}", token.short(), e);
                }
            }
        }
        debug!("sentiment pass: {} scores refreshed", fetched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::QuoteBook;
    use chrono::Duration as ChronoDuration;
    use poolwatch_core::Chain;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    fn pool_fixture(pool: Address, base: Address, quote: Address) -> poolwatch_core::Pool {
        poolwatch_core::Pool {
            chain: Chain::Base,
            version: poolwatch_core::PoolVersion::V2,
            address: pool,
            token0: poolwatch_core::TokenInfo::unknown(base),
            token1: poolwatch_core::TokenInfo::new(quote, "WETH", 18),
            fee_tier: None,
            created_block: 100,
            created_at: Utc::now(),
            quote_index: 1,
        }
    }

    struct FixedOracle(f64);

    #[async_trait]
    impl SentimentOracle for FixedOracle {
        async fn score(&self, _token: Address) -> Result<f64, OracleError> {
            Ok(self.0)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct DownOracle;

    #[async_trait]
    impl SentimentOracle for DownOracle {
        async fn score(&self, _token: Address) -> Result<f64, OracleError> {
            Err(OracleError::Unavailable("offline".into()))
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    #[test]
    fn test_cache_misses_on_unknown_token() {
        let cache = SentimentCache::new(300);
        assert_eq!(cache.latest(&addr(1)), None);
    }

    #[test]
    fn test_cache_returns_fresh_score() {
        let cache = SentimentCache::new(300);
        let mut score = SentimentScore::new(addr(1), 0.8, "test");
        let now = Utc::now();
        score.observed_at = now;
        cache.record(score);
        let got = cache.latest_at(&addr(1), now).unwrap();
        assert_eq!(got.value, 0.8);
    }

    #[test]
    fn test_cache_hides_stale_score() {
        let cache = SentimentCache::new(300);
        let mut score = SentimentScore::new(addr(1), 0.8, "test");
        let now = Utc::now();
        score.observed_at = now;
        cache.record(score);
        let later = now + ChronoDuration::seconds(301);
        assert_eq!(cache.latest_at(&addr(1), later), None);
    }

    #[tokio::test]
    async fn test_poller_records_scores_for_base_tokens() {
        let mut quotes = QuoteBook::new();
        let weth = Address::from_str("0x4200000000000000000000000000000000000006").unwrap();
        quotes.add(weth, "WETH", 2500.0, 18);
        let registry = PoolRegistry::new(Chain::Base, quotes);
        registry.restore(pool_fixture(addr(0xAA), addr(0x11), weth));

        let cache = Arc::new(SentimentCache::new(300));
        let poller = SentimentPoller::new(
            Arc::new(FixedOracle(0.75)),
            Arc::clone(&cache),
            registry,
            60,
        );
        poller.poll_once().await;
        assert_eq!(cache.latest(&addr(0x11)).unwrap().value, 0.75);
    }

    #[tokio::test]
    async fn test_poller_keeps_cache_untouched_when_oracle_is_down() {
        let mut quotes = QuoteBook::new();
        let weth = Address::from_str("0x4200000000000000000000000000000000000006").unwrap();
        quotes.add(weth, "WETH", 2500.0, 18);
        let registry = PoolRegistry::new(Chain::Base, quotes);
        registry.restore(pool_fixture(addr(0xAA), addr(0x11), weth));

        let cache = Arc::new(SentimentCache::new(300));
        cache.record(SentimentScore::new(addr(0x11), 0.5, "earlier"));
        let poller =
            SentimentPoller::new(Arc::new(DownOracle), Arc::clone(&cache), registry, 60);
        poller.poll_once().await;
        // Last good score survives an outage; staleness retires it later.
        assert_eq!(cache.latest(&addr(0x11)).unwrap().value, 0.5);
    }
}
