// =============================================================================
// PriceOracle — external price/market-data feed interface
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A `(price, timestamp)` sample from the price oracle for a single token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub timestamp_ms: i64,
}

/// External price feed. Implementations own the network connection (RPC
/// subscription, pool-account polling, etc.) — the core only ever sees typed
/// ticks delivered over a channel.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Start streaming ticks for `token` into the returned receiver. Calling
    /// `subscribe` twice for the same token is implementation-defined but
    /// must not panic.
    async fn subscribe(&self, token: &str) -> mpsc::Receiver<Tick>;

    /// Stop streaming ticks for `token`. No-op if not subscribed.
    async fn unsubscribe(&self, token: &str);
}
