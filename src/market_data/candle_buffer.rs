// =============================================================================
// Candle Buffer — tick-driven OHLCV aggregation
// =============================================================================
//
// The upstream system this generalizes from fed its candle buffer from a
// Binance kline WebSocket. Here the only price feed is the PriceOracle tick
// stream (see `price_oracle.rs`), so candles are synthesized in-process by
// bucketing ticks into fixed-width time windows. This is purely an ambient
// convenience for `MarketConditionMonitor` (§2.1 of SPEC_FULL.md) — no
// decision in the core depends on candle boundaries being exact.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single synthesized OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// Thread-safe ring buffer of synthesized candles, one series per token.
pub struct CandleBuffer {
    buffers: RwLock<HashMap<String, VecDeque<Candle>>>,
    max_candles: usize,
    bucket_ms: i64,
}

impl CandleBuffer {
    /// `bucket_ms` is the width of each synthesized candle; `max_candles` is
    /// the number of closed candles retained per token.
    pub fn new(max_candles: usize, bucket_ms: i64) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles,
            bucket_ms: bucket_ms.max(1),
        }
    }

    /// Feed a single price tick into the bucket it falls into, closing the
    /// previous bucket when a tick lands in a later one.
    pub fn record_tick(&self, token: &str, price: f64, volume: f64, timestamp_ms: i64) {
        let bucket_open = (timestamp_ms / self.bucket_ms) * self.bucket_ms;
        let mut map = self.buffers.write();
        let ring = map
            .entry(token.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        match ring.back_mut() {
            Some(last) if last.open_time_ms == bucket_open => {
                last.high = last.high.max(price);
                last.low = last.low.min(price);
                last.close = price;
                last.volume += volume;
            }
            Some(last) => {
                last.is_closed = true;
                ring.push_back(Candle {
                    open_time_ms: bucket_open,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume,
                    is_closed: false,
                });
                while ring.len() > self.max_candles + 1 {
                    ring.pop_front();
                }
            }
            None => {
                ring.push_back(Candle {
                    open_time_ms: bucket_open,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume,
                    is_closed: false,
                });
            }
        }
    }

    /// Most recent `count` closed candles for `token`, oldest-first.
    pub fn get_closed(&self, token: &str, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(token) {
            Some(ring) => {
                let closed: Vec<&Candle> = ring.iter().filter(|c| c.is_closed).collect();
                let start = closed.len().saturating_sub(count);
                closed[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn get_closes(&self, token: &str, count: usize) -> Vec<f64> {
        self.get_closed(token, count).iter().map(|c| c.close).collect()
    }

    pub fn last_close(&self, token: &str) -> Option<f64> {
        let map = self.buffers.read();
        map.get(token)
            .and_then(|ring| ring.iter().rev().find(|c| c.is_closed).map(|c| c.close))
    }

    pub fn count(&self, token: &str) -> usize {
        let map = self.buffers.read();
        map.get(token).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_within_bucket_update_in_place() {
        let buf = CandleBuffer::new(10, 1000);
        buf.record_tick("TOKA", 1.0, 5.0, 100);
        buf.record_tick("TOKA", 1.2, 5.0, 500);
        buf.record_tick("TOKA", 0.9, 5.0, 900);
        assert_eq!(buf.count("TOKA"), 1);
    }

    #[test]
    fn tick_in_new_bucket_closes_previous() {
        let buf = CandleBuffer::new(10, 1000);
        buf.record_tick("TOKA", 1.0, 5.0, 100);
        buf.record_tick("TOKA", 2.0, 5.0, 1500);
        let closed = buf.get_closed("TOKA", 10);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].close, 1.0);
    }

    #[test]
    fn ring_trims_to_max_candles() {
        let buf = CandleBuffer::new(3, 1000);
        for i in 0..10 {
            buf.record_tick("TOKA", i as f64, 1.0, i * 1000);
        }
        assert!(buf.count("TOKA") <= 4);
    }

    #[test]
    fn last_close_none_when_untracked() {
        let buf = CandleBuffer::new(10, 1000);
        assert_eq!(buf.last_close("NOPE"), None);
    }
}
