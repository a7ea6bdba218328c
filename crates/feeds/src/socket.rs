//! WebSocket log subscription source.

use crate::decode::topics;
use crate::message::SourceMessage;
use crate::rpc::{HeadFrame, LogEntry, RpcRequest, RpcResponse, SubscriptionFrame};
use crate::FeedError;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, warn};

const LOGS_REQUEST_ID: u64 = 1;
const HEADS_REQUEST_ID: u64 = 2;

/// One WebSocket connection to a JSON-RPC endpoint, subscribed to the
/// recognized log topics plus new block headers.
///
/// Runs a single connection to completion; endpoint fallback and backoff
/// live in the feed loop, which calls `run_once` again on the next endpoint.
pub struct SocketSource {
    url: String,
    connect_timeout: Duration,
    ping_interval: Duration,
    tx: mpsc::Sender<SourceMessage>,
}

impl SocketSource {
    pub fn new(url: &str, connect_timeout_ms: u64, tx: mpsc::Sender<SourceMessage>) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            ping_interval: Duration::from_secs(30),
            tx,
        }
    }

    /// Connect, subscribe, and pump messages until the connection dies.
    /// Always returns an error describing why the connection ended; clean
    /// closes count too, since the feed must fail over either way.
    pub async fn run_once(&self) -> Result<(), FeedError> {
        debug!("connecting to {}", self.url);
        let connect = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| FeedError::Timeout(format!("connect to {}", self.url)))?;
        let (ws_stream, response) = connect?;
        debug!("{}: connected (status: {:?})", self.url, response.status());

        let (mut write, mut read) = ws_stream.split();

        let logs_req = RpcRequest::subscribe_logs(LOGS_REQUEST_ID, topics::all());
        write
            .send(Message::Text(serde_json::to_string(&logs_req)?))
            .await?;
        let heads_req = RpcRequest::subscribe_new_heads(HEADS_REQUEST_ID);
        write
            .send(Message::Text(serde_json::to_string(&heads_req)?))
            .await?;

        let mut logs_sub: Option<String> = None;
        let mut heads_sub: Option<String> = None;

        let mut ping_timer = tokio::time::interval(self.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Silent-disconnect detection: heads arrive every few seconds on a
        // live chain, so two quiet minutes means the connection is dead.
        let stale_timeout = Duration::from_secs(120);
        let mut last_message_time = std::time::Instant::now();

        loop {
            if last_message_time.elapsed() > stale_timeout {
                warn!(
                    "{}: no messages for {:?}, forcing reconnect",
                    self.url,
                    last_message_time.elapsed()
                );
                return Err(FeedError::Disconnected("stale connection".into()));
            }

            tokio::select! {
                msg = read.next() => {
                    last_message_time = std::time::Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, &mut logs_sub, &mut heads_sub).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            debug!("{}: close frame: {:?}", self.url, frame);
                            return Err(FeedError::Disconnected("close frame".into()));
                        }
                        Some(Ok(other)) => {
                            debug!("{}: ignoring frame: {:?}", self.url, other);
                        }
                        Some(Err(e)) => {
                            error!("{}: read error: {}", self.url, e);
                            return Err(FeedError::ConnectionFailed(e.to_string()));
                        }
                        None => {
                            warn!("{}: stream ended", self.url);
                            return Err(FeedError::Disconnected("stream ended".into()));
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
            }
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        logs_sub: &mut Option<String>,
        heads_sub: &mut Option<String>,
    ) -> Result<(), FeedError> {
        // Subscription pushes carry a method field; request responses do not.
        if let Ok(frame) = serde_json::from_str::<SubscriptionFrame>(text) {
            if frame.method.as_deref() == Some("eth_subscription") {
                let Some(params) = frame.params else {
                    return Ok(());
                };
                if Some(&params.subscription) == logs_sub.as_ref() {
                    let log: LogEntry = serde_json::from_value(params.result)?;
                    return self.forward(SourceMessage::Log(log)).await;
                }
                if Some(&params.subscription) == heads_sub.as_ref() {
                    let head: HeadFrame = serde_json::from_value(params.result)?;
                    return self.forward(SourceMessage::Head(head.block()?)).await;
                }
                debug!("{}: push for unknown subscription", self.url);
                return Ok(());
            }
        }

        let response: RpcResponse = serde_json::from_str(text)?;
        let id = response.id;
        let result = response.into_result().map_err(|e| {
            FeedError::SubscriptionFailed(format!("{}: {}", self.url, e))
        })?;
        let sub_id = result
            .as_str()
            .ok_or_else(|| FeedError::SubscriptionFailed("non-string subscription id".into()))?
            .to_string();

        let was_ready = logs_sub.is_some() && heads_sub.is_some();
        match id {
            Some(LOGS_REQUEST_ID) => {
                debug!("{}: logs subscription {}", self.url, sub_id);
                *logs_sub = Some(sub_id);
            }
            Some(HEADS_REQUEST_ID) => {
                debug!("{}: heads subscription {}", self.url, sub_id);
                *heads_sub = Some(sub_id);
            }
            other => {
                debug!("{}: response for unexpected id {:?}", self.url, other);
            }
        }
        if !was_ready && logs_sub.is_some() && heads_sub.is_some() {
            self.forward(SourceMessage::Connected).await?;
        }
        Ok(())
    }

    async fn forward(&self, msg: SourceMessage) -> Result<(), FeedError> {
        // try_send so a slow consumer surfaces as a reconnect (the feed
        // backfills the gap from its checkpoint) instead of silent loss.
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{}: channel full, forcing reconnect to backfill", self.url);
                Err(FeedError::Disconnected("channel full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(FeedError::ChannelClosed),
        }
    }
}
