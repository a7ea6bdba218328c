//! HTTP polling log source (eth_getLogs range queries).

use crate::decode::{topics, DecodedLog, LogDecoder};
use crate::message::SourceMessage;
use crate::registry::PoolRegistry;
use crate::rpc::{parse_hex_u64, LogEntry, RpcRequest, RpcResponse};
use crate::FeedError;
use poolwatch_core::Address;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Polls an HTTP JSON-RPC endpoint for logs in bounded block ranges.
///
/// Two queries per range keep the result sets small: creations scoped to the
/// factory addresses, trades scoped to the tracked pools. Pools created
/// inside the range are included in the same range's trade query so their
/// first trades are never missed.
pub struct PollSource {
    url: String,
    client: reqwest::Client,
    interval: Duration,
    max_blocks: u64,
    decoder: LogDecoder,
    registry: PoolRegistry,
    tx: mpsc::Sender<SourceMessage>,
    next_id: AtomicU64,
}

impl PollSource {
    pub fn new(
        url: &str,
        interval_ms: u64,
        max_blocks: u64,
        request_timeout_ms: u64,
        decoder: LogDecoder,
        registry: PoolRegistry,
        tx: mpsc::Sender<SourceMessage>,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            client,
            interval: Duration::from_millis(interval_ms),
            max_blocks: max_blocks.max(1),
            decoder,
            registry,
            tx,
            next_id: AtomicU64::new(1),
        })
    }

    /// Poll forever starting at `from_block`, until a call fails.
    /// The feed restarts from its checkpoint on the next endpoint.
    /// A `from_block` of zero means cold start: begin at the current head.
    pub async fn run_once(&self, from_block: u64) -> Result<(), FeedError> {
        let mut from = from_block;
        let mut connected_sent = false;

        loop {
            let latest = self.block_number().await?;
            if !connected_sent {
                self.forward(SourceMessage::Connected).await?;
                connected_sent = true;
            }
            if from == 0 {
                from = latest;
            }

            if latest < from {
                tokio::time::sleep(self.interval).await;
                continue;
            }

            let to = (from + self.max_blocks - 1).min(latest);
            let logs = self.fetch_range(from, to).await?;
            debug!("{}: {} logs in blocks {}..={}", self.url, logs.len(), from, to);
            for log in logs {
                self.forward(SourceMessage::Log(log)).await?;
            }
            // Blocks up to `to` are complete; seal them downstream.
            self.forward(SourceMessage::Head(to + 1)).await?;

            let caught_up = to == latest;
            from = to + 1;
            if caught_up {
                tokio::time::sleep(self.interval).await;
            }
        }
    }

    /// Creation logs (factory-scoped) plus trade logs (tracked pools and
    /// pools created within this very range), merged.
    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, FeedError> {
        let factories = self.decoder.factory_addresses();
        let creations = self
            .get_logs(from, to, &factories, topics::creations())
            .await?;

        let mut trade_addresses = self.registry.addresses();
        for log in &creations {
            match self.decoder.decode(log) {
                Ok(Some(DecodedLog::Creation { pool, .. })) => trade_addresses.push(pool),
                Ok(_) => {}
                Err(e) => warn!("{}: undecodable creation log: {}", self.url, e),
            }
        }

        let mut logs = creations;
        if !trade_addresses.is_empty() {
            let trades = self
                .get_logs(from, to, &trade_addresses, topics::trades())
                .await?;
            logs.extend(trades);
        }
        Ok(logs)
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
        topic0: &[&str],
    ) -> Result<Vec<LogEntry>, FeedError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::get_logs(id, from, to, addresses, topic0);
        let result = self.call(&request).await?;
        serde_json::from_value(result).map_err(Into::into)
    }

    async fn block_number(&self) -> Result<u64, FeedError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let result = self.call(&RpcRequest::block_number(id)).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| FeedError::ParseError("non-string block number".into()))?;
        parse_hex_u64(hex)
    }

    async fn call(&self, request: &RpcRequest) -> Result<serde_json::Value, FeedError> {
        let response = self.client.post(&self.url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(FeedError::ConnectionFailed(format!(
                "{}: HTTP {}",
                self.url,
                response.status()
            )));
        }
        let body: RpcResponse = response.json().await?;
        body.into_result()
    }

    async fn forward(&self, msg: SourceMessage) -> Result<(), FeedError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{}: channel full, restarting from checkpoint", self.url);
                Err(FeedError::Disconnected("channel full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(FeedError::ChannelClosed),
        }
    }
}

/// Current chain head via a one-shot eth_blockNumber call.
pub async fn latest_block(url: &str, request_timeout_ms: u64) -> Result<u64, FeedError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(request_timeout_ms))
        .build()?;
    let response = client
        .post(url)
        .json(&RpcRequest::block_number(1))
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(FeedError::ConnectionFailed(format!(
            "{}: HTTP {}",
            url,
            response.status()
        )));
    }
    let body: RpcResponse = response.json().await?;
    let hex = body.into_result()?;
    let hex = hex
        .as_str()
        .ok_or_else(|| FeedError::ParseError("non-string block number".into()))?;
    parse_hex_u64(hex)
}

/// One-shot range fetch used for checkpoint backfill after reconnects.
pub async fn fetch_logs_range(
    url: &str,
    request_timeout_ms: u64,
    from: u64,
    to: u64,
    addresses: &[Address],
    topic0: &[&str],
) -> Result<Vec<LogEntry>, FeedError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(request_timeout_ms))
        .build()?;
    let request = RpcRequest::get_logs(1, from, to, addresses, topic0);
    let response = client.post(url).json(&request).send().await?;
    if !response.status().is_success() {
        return Err(FeedError::ConnectionFailed(format!(
            "{}: HTTP {}",
            url,
            response.status()
        )));
    }
    let body: RpcResponse = response.json().await?;
    serde_json::from_value(body.into_result()?).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::QuoteBook;
    use poolwatch_core::Chain;

    #[tokio::test]
    async fn test_poll_source_construction() {
        let (tx, _rx) = mpsc::channel(16);
        let registry = PoolRegistry::new(Chain::Base, QuoteBook::new());
        let decoder = LogDecoder::new(vec![], vec![]);
        let source =
            PollSource::new("https://rpc.example", 5_000, 500, 10_000, decoder, registry, tx);
        assert!(source.is_ok());
    }
}
