// =============================================================================
// Demo CandidateSource / PriceOracle — runnable stand-ins for external feeds
// =============================================================================
//
// Token discovery and price-tick ingestion are external collaborators (§1 of
// SPEC_FULL.md); the core defines only their interfaces. These
// implementations play the same role for `CandidateSource`/`PriceOracle`
// that `SimulatedSwapExecutor` plays for `SwapExecutor` — a local-run
// stand-in, not a production integration. A deployment wires real feeds in
// their place at construction time.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::trace;

use crate::candidate::{Candidate, CandidateSource};
use crate::price_oracle::{PriceOracle, Tick};

/// Cycles a fixed token universe, emitting one candidate with randomized
/// metrics per `poll_interval`. Never exhausts — `poll` always returns
/// `Some`.
pub struct SimulatedCandidateSource {
    tokens: Vec<String>,
    poll_interval: Duration,
}

impl SimulatedCandidateSource {
    pub fn new(tokens: Vec<String>, poll_interval: Duration) -> Self {
        Self { tokens, poll_interval }
    }
}

#[async_trait]
impl CandidateSource for SimulatedCandidateSource {
    async fn poll(&self) -> Option<Candidate> {
        tokio::time::sleep(self.poll_interval).await;

        let mut rng = rand::thread_rng();
        let token = self.tokens[rng.gen_range(0..self.tokens.len())].clone();

        let mut raw_metrics = HashMap::new();
        raw_metrics.insert("price_change_5m".to_string(), rng.gen_range(-10.0..10.0));
        raw_metrics.insert("price_change_1h".to_string(), rng.gen_range(-15.0..15.0));
        raw_metrics.insert("price_change_24h".to_string(), rng.gen_range(-20.0..20.0));
        raw_metrics.insert("buy_volume".to_string(), rng.gen_range(0.0..100.0));
        raw_metrics.insert("sell_volume".to_string(), rng.gen_range(0.0..100.0));
        raw_metrics.insert("sentiment_score".to_string(), rng.gen_range(-1.0..1.0));
        raw_metrics.insert("copy_overlap_score".to_string(), rng.gen_range(0.0..1.0));

        Some(Candidate {
            token,
            price: rng.gen_range(0.00001..1.0),
            volume_24h: rng.gen_range(0.0..50_000.0),
            volume_1h: rng.gen_range(0.0..5_000.0),
            liquidity_depth: rng.gen_range(0.0..20_000.0),
            age_seconds: rng.gen_range(60..86_400),
            holder_count: rng.gen_range(10..5_000),
            raw_metrics,
        })
    }
}

/// Per-token random-walk tick generator. Each `subscribe` spawns its own
/// drift loop; `unsubscribe` is a no-op since the loop exits on its own once
/// the receiver is dropped.
pub struct SimulatedPriceOracle {
    tick_interval: Duration,
    seed_prices: RwLock<HashMap<String, f64>>,
}

impl SimulatedPriceOracle {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            seed_prices: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PriceOracle for SimulatedPriceOracle {
    async fn subscribe(&self, token: &str) -> mpsc::Receiver<Tick> {
        let (tx, rx) = mpsc::channel(32);
        let tick_interval = self.tick_interval;
        let token_owned = token.to_string();

        let mut starting_price = *self
            .seed_prices
            .write()
            .entry(token_owned.clone())
            .or_insert_with(|| rand::thread_rng().gen_range(0.00001..1.0));
        if starting_price <= 0.0 {
            starting_price = 0.00001;
        }

        tokio::spawn(async move {
            let mut price = starting_price;
            loop {
                tokio::time::sleep(tick_interval).await;
                let drift = rand::thread_rng().gen_range(-0.02..0.02);
                price = (price * (1.0 + drift)).max(0.0000001);
                let timestamp_ms = chrono::Utc::now().timestamp_millis();
                if tx.send(Tick { price, timestamp_ms }).await.is_err() {
                    trace!(token = %token_owned, "tick receiver dropped, stopping simulated stream");
                    break;
                }
            }
        });

        rx
    }

    async fn unsubscribe(&self, _token: &str) {}
}
