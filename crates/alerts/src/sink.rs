//! Alert delivery transports and notification formatting.

use crate::error::DispatchError;
use async_trait::async_trait;
use poolwatch_core::{Alert, SignalKind, SignalSummary};
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// Where qualified-pool notifications get delivered.
///
/// The dispatcher suppresses duplicate idempotency keys before calling
/// `deliver`, but a retry after an ambiguous failure may resend, so
/// receivers must tolerate repeats of the same key.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert, message: &str) -> Result<(), DispatchError>;

    /// Transport name for logs.
    fn name(&self) -> &str;
}

/// POSTs each alert as JSON to a configured endpoint.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: &Alert, message: &str) -> Result<(), DispatchError> {
        let body = serde_json::json!({
            "idempotency_key": alert.idempotency_key,
            "text": message,
            "alert": alert,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(DispatchError::Rejected(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Fallback transport when no webhook is configured: alerts land in the
/// process log and nowhere else.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, _alert: &Alert, message: &str) -> Result<(), DispatchError> {
        info!("{}", message);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Format one alert as human-readable notification text.
pub fn format_alert_message(alert: &Alert) -> String {
    let mut msg = format!(
        "Pool qualified on {}: {} ({})\n\
         Signals ({}): {}",
        alert.chain.as_str(),
        alert.pair,
        alert.version,
        alert.count_summary(),
        alert.signals.canonical(),
    );

    for summary in &alert.breakdown {
        msg.push_str(&format!("\n  - {}", summary_line(summary)));
    }

    msg.push_str(&format!(
        "\nScore: {:.2}\nBlock: {} (epoch {})\n{}",
        alert.score, alert.block_number, alert.epoch, alert.explorer_url
    ));
    msg
}

/// One breakdown entry with its kind-specific magnitude.
fn summary_line(summary: &SignalSummary) -> String {
    let detail = match summary.kind {
        SignalKind::NewPool => format!("{:.0} blocks old", summary.magnitude),
        SignalKind::LiquiditySpike => format!("{:.1}x trailing baseline", summary.magnitude),
        SignalKind::WhaleBuy => {
            format!("{:.2}% of pool liquidity", summary.magnitude * 100.0)
        }
        SignalKind::SentimentHigh => format!("score {:.2}", summary.magnitude),
    };
    format!(
        "{}: {} at block {}",
        summary.kind.as_str(),
        detail,
        summary.block_number
    )
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use poolwatch_core::{Address, Chain, Pool, PoolVersion, Signal, TokenInfo};
    use pretty_assertions::assert_eq;

    fn sample_alert() -> Alert {
        let pool = Pool {
            chain: Chain::Base,
            version: PoolVersion::V2,
            address: Address([0xAB; 20]),
            token0: TokenInfo::new(Address([0x01; 20]), "PEPE", 18),
            token1: TokenInfo::new(Address([0x02; 20]), "WETH", 18),
            fee_tier: None,
            created_block: 100,
            created_at: Utc::now(),
            quote_index: 1,
        };
        let signals = vec![
            Signal::new(SignalKind::NewPool, pool.address, 105, 5.0),
            Signal::new(SignalKind::LiquiditySpike, pool.address, 108, 6.2),
            Signal::new(SignalKind::WhaleBuy, pool.address, 110, 0.008),
        ];
        Alert::from_qualification(&pool, &signals, 0, 110)
    }

    #[test]
    fn test_message_carries_pair_and_signal_lines() {
        let message = format_alert_message(&sample_alert());

        assert!(message.starts_with("Pool qualified on Base: PEPE/WETH (V2)"));
        assert!(message.contains("Signals (3/4): liquidity_spike+new_pool+whale_buy"));
        assert!(message.contains("liquidity_spike: 6.2x trailing baseline at block 108"));
        assert!(message.contains("new_pool: 5 blocks old at block 105"));
        assert!(message.contains("whale_buy: 0.80% of pool liquidity at block 110"));
        assert!(message.contains("Block: 110 (epoch 0)"));
        assert!(message.contains("https://basescan.org/address/"));
    }

    #[test]
    fn test_message_score_line() {
        let message = format_alert_message(&sample_alert());
        assert!(message.contains("Score: 0.80"));
    }

    #[tokio::test]
    async fn test_memory_sink_recovers_after_failures() {
        let sink = testing::MemorySink::failing(2);
        let alert = sample_alert();

        assert!(sink.deliver(&alert, "x").await.is_err());
        assert!(sink.deliver(&alert, "x").await.is_err());
        assert!(sink.deliver(&alert, "x").await.is_ok());

        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.delivered(), vec![alert.idempotency_key.clone()]);
    }
}
