// =============================================================================
// PriceSubscriber — de-duplicates/fans out ticks to positions and candles
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::market_data::CandleBuffer;
use crate::position::PositionManager;
use crate::price_oracle::{PriceOracle, Tick};

const DEFAULT_DEDUP_WINDOW_MS: i64 = 5;
const MAX_PENDING_PER_TOKEN: usize = 16;

/// Fans price ticks out to `PositionManager` and `CandleBuffer`,
/// de-duplicating and back-pressuring per the configured thresholds.
pub struct PriceSubscriber {
    oracle: Arc<dyn PriceOracle>,
    positions: Arc<PositionManager>,
    candles: Arc<CandleBuffer>,
    dedup_window_ms: i64,
    last_tick: RwLock<HashMap<String, Tick>>,
}

impl PriceSubscriber {
    pub fn new(oracle: Arc<dyn PriceOracle>, positions: Arc<PositionManager>, candles: Arc<CandleBuffer>) -> Self {
        Self {
            oracle,
            positions,
            candles,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            last_tick: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_dedup_window_ms(mut self, ms: i64) -> Self {
        self.dedup_window_ms = ms;
        self
    }

    /// Subscribes to `token` and spawns a task draining the oracle's tick
    /// stream into `handle_tick`. Back-pressure (§4.7: 16 pending ticks,
    /// oldest dropped) is enforced here on top of whatever buffering the
    /// oracle implementation itself applies: after a blocking `recv`, any
    /// backlog that already piled up while the previous tick was being
    /// handled is drained non-blockingly, keeping only the freshest tick in
    /// the batch.
    pub async fn subscribe(self: &Arc<Self>, token: &str) {
        let mut receiver = self.oracle.subscribe(token).await;
        let this = Arc::clone(self);
        let token = token.to_string();
        tokio::spawn(async move {
            while let Some(mut tick) = receiver.recv().await {
                let mut dropped = 0usize;
                while dropped < MAX_PENDING_PER_TOKEN {
                    match receiver.try_recv() {
                        Ok(newer) => {
                            tick = newer;
                            dropped += 1;
                        }
                        Err(_) => break,
                    }
                }
                if dropped > 0 {
                    trace!(token = %token, dropped, "tick queue over cap, dropped to freshest");
                }
                this.handle_tick(&token, tick).await;
            }
        });
    }

    pub async fn unsubscribe(&self, token: &str) {
        self.oracle.unsubscribe(token).await;
        self.last_tick.write().remove(token);
    }

    async fn handle_tick(&self, token: &str, tick: Tick) {
        let is_duplicate = {
            let mut last = self.last_tick.write();
            let duplicate = last
                .get(token)
                .map(|prev| (tick.timestamp_ms - prev.timestamp_ms).abs() < self.dedup_window_ms)
                .unwrap_or(false);
            last.insert(token.to_string(), tick);
            duplicate
        };

        // Every tick still contributes to the candle, duplicate or not —
        // only position exit evaluation is skipped on a duplicate.
        self.candles.record_tick(token, tick.price, 0.0, tick.timestamp_ms);

        if !is_duplicate {
            self.positions.on_tick(token, tick.price, tick.timestamp_ms).await;
        }
    }

    pub fn last_price(&self, token: &str) -> Option<f64> {
        self.last_tick.read().get(token).map(|t| t.price)
    }
}
