//! New-block feed over a node WebSocket (`eth_subscribe` / `newHeads`).
//!
//! Features:
//! - Automatic reconnection with exponential backoff
//! - Heartbeat pings while the socket is idle
//! - Out-of-order and duplicate heads are dropped

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::WsError;
use crate::metrics;
use crate::rpc::parse_quantity;

/// Reconnection configuration for the block feed.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_s: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2.0,
            heartbeat_interval_s: 30,
        }
    }
}

impl ReconnectConfig {
    /// Create from config values.
    pub fn from_config(max_delay_s: u64, heartbeat_interval_s: u64) -> Self {
        Self {
            max_delay_s,
            heartbeat_interval_s,
            ..Default::default()
        }
    }

    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let max_delay_ms = self.max_delay_s * 1000;
        let clamped_ms = delay_ms.min(max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }
}

#[derive(Debug, Deserialize)]
struct Notification {
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: Head,
}

#[derive(Debug, Deserialize)]
struct Head {
    number: String,
}

/// Extract the block number from a `newHeads` notification. Subscription
/// acks and other frames yield `None`.
pub fn parse_head(text: &str) -> Option<u64> {
    let note: Notification = serde_json::from_str(text).ok()?;
    let number = parse_quantity(&note.params?.result.number).ok()?;
    u64::try_from(number).ok()
}

/// Watches the chain head and publishes block numbers.
pub struct BlockWatcher {
    ws_url: String,
    reconnect_config: ReconnectConfig,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU64>,
    last_block: Arc<AtomicU64>,
}

impl BlockWatcher {
    /// Create a watcher for `ws_url`.
    pub fn new(ws_url: String, reconnect_config: ReconnectConfig) -> Self {
        Self {
            ws_url,
            reconnect_config,
            connected: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(AtomicU64::new(0)),
            last_block: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Get reconnection attempt count.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Highest block seen so far (0 before the first head).
    pub fn last_block(&self) -> u64 {
        self.last_block.load(Ordering::SeqCst)
    }

    /// Record a head; returns `true` if it advances the chain tip.
    fn advance(&self, number: u64) -> bool {
        self.last_block.fetch_max(number, Ordering::SeqCst) < number
    }

    /// One connection: subscribe, then forward heads until the socket drops.
    /// Returns `Ok(false)` when the receiver is gone.
    async fn run_once(&self, tx: &mpsc::Sender<u64>) -> Result<bool, WsError> {
        info!(url = %self.ws_url, "Connecting to block feed");

        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        info!("Subscribed to newHeads");

        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.reconnect_config.heartbeat_interval_s.max(1)));
        heartbeat.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let Some(number) = parse_head(&text) else {
                                debug!("Ignoring non-head frame");
                                continue;
                            };
                            if !self.advance(number) {
                                debug!(block = number, "Dropping stale head");
                                continue;
                            }
                            metrics::set_block_height(number);
                            if tx.send(number).await.is_err() {
                                return Ok(false);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(frame = ?frame, "Block feed closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "Block feed error");
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        warn!("Heartbeat failed");
                        break;
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Run with automatic reconnection on disconnect.
    /// Returns a channel receiver that yields new block numbers.
    pub fn run_with_reconnect(self: Arc<Self>) -> mpsc::Receiver<u64> {
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut attempt = 0u32;

            loop {
                match self.run_once(&tx).await {
                    Ok(false) => {
                        info!("Channel closed, stopping block feed");
                        return;
                    }
                    Ok(true) => {
                        attempt = 0;
                        warn!("Block feed ended, will reconnect");
                    }
                    Err(e) => {
                        error!(error = %e, attempt = attempt, "Block feed connection failed");
                    }
                }
                if tx.is_closed() {
                    return;
                }

                let delay = self.reconnect_config.next_delay(attempt);
                self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                metrics::inc_ws_reconnects();

                info!(delay_ms = delay.as_millis(), "Reconnecting after delay");
                tokio::time::sleep(delay).await;

                attempt = attempt.saturating_add(1);
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_clamps() {
        let config = ReconnectConfig::from_config(5, 30);
        assert_eq!(config.next_delay(0), Duration::from_millis(1000));
        assert_eq!(config.next_delay(1), Duration::from_millis(2000));
        assert_eq!(config.next_delay(2), Duration::from_millis(4000));
        assert_eq!(config.next_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn parses_new_heads_notification() {
        let text = r#"{"jsonrpc":"2.0","method":"eth_subscription",
            "params":{"subscription":"0xabc","result":{"number":"0x1b4","hash":"0x00"}}}"#;
        assert_eq!(parse_head(text), Some(436));

        // Subscription ack carries no head.
        assert_eq!(parse_head(r#"{"jsonrpc":"2.0","id":1,"result":"0xabc"}"#), None);
        assert_eq!(parse_head("not json"), None);
    }

    #[test]
    fn only_newer_heads_advance() {
        let watcher = BlockWatcher::new("ws://localhost".into(), ReconnectConfig::default());
        assert!(watcher.advance(10));
        assert!(!watcher.advance(10));
        assert!(!watcher.advance(9));
        assert!(watcher.advance(11));
        assert_eq!(watcher.last_block(), 11);
        assert!(!watcher.is_connected());
    }
}
