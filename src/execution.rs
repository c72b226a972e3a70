// =============================================================================
// SwapExecutor — routes sized orders through an on-chain swap, with a
// simulated implementation for local runs and tests
// =============================================================================

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ExecError;

/// Direction of a swap relative to the base (quote) asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapSide {
    Buy,
    Sell,
}

/// A successful swap fill. Only ever produced on a genuine success path —
/// no implementation may construct one speculatively before the swap lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub tx_id: String,
    pub tokens_received: f64,
    pub effective_price: f64,
    pub fees: f64,
}

/// External swap execution interface. Implementations own the RPC/relay
/// connection; the core only ever sees a receipt or a typed failure.
#[async_trait]
pub trait SwapExecutor: Send + Sync {
    async fn swap(
        &self,
        token: &str,
        side: SwapSide,
        base_amount: f64,
        limit_price: f64,
    ) -> Result<ExecutionReceipt, ExecError>;
}

/// Simulated executor used for demo runs and tests. Applies configurable
/// slippage and a rejection probability; never fabricates a receipt when it
/// decides to fail.
pub struct SimulatedSwapExecutor {
    pub slippage_bps: f64,
    pub fee_bps: f64,
    pub rejection_probability: f64,
}

impl Default for SimulatedSwapExecutor {
    fn default() -> Self {
        Self {
            slippage_bps: 30.0,
            fee_bps: 25.0,
            rejection_probability: 0.02,
        }
    }
}

#[async_trait]
impl SwapExecutor for SimulatedSwapExecutor {
    async fn swap(
        &self,
        token: &str,
        side: SwapSide,
        base_amount: f64,
        limit_price: f64,
    ) -> Result<ExecutionReceipt, ExecError> {
        if base_amount <= 0.0 || limit_price <= 0.0 {
            warn!(token, base_amount, limit_price, "rejected swap with invalid size/price");
            return Err(ExecError::Rejected);
        }

        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.rejection_probability) {
            warn!(token, side = ?side, "simulated swap rejected");
            return Err(ExecError::Rejected);
        }

        let slippage_direction = match side {
            SwapSide::Buy => 1.0,
            SwapSide::Sell => -1.0,
        };
        let slippage = rng.gen_range(0.0..self.slippage_bps) / 10_000.0;
        let effective_price = limit_price * (1.0 + slippage_direction * slippage);

        // `base_amount` is base-currency on a Buy (spend base, receive tokens)
        // but token-quantity on a Sell (spend tokens, receive base) — fees
        // and `tokens_received` are computed in the unit each side actually
        // moves, so callers can always read `tokens_received * effective_price
        // - fees` as the base-currency amount settled.
        let (tokens_received, fees) = match side {
            SwapSide::Buy => {
                let fees = base_amount * (self.fee_bps / 10_000.0);
                let tokens_received = (base_amount - fees) / effective_price;
                (tokens_received, fees)
            }
            SwapSide::Sell => {
                let gross_proceeds = base_amount * effective_price;
                let fees = gross_proceeds * (self.fee_bps / 10_000.0);
                (base_amount, fees)
            }
        };

        let receipt = ExecutionReceipt {
            tx_id: Uuid::new_v4().to_string(),
            tokens_received,
            effective_price,
            fees,
        };

        info!(
            token,
            side = ?side,
            base_amount,
            tokens_received,
            effective_price,
            tx_id = %receipt.tx_id,
            "simulated swap filled"
        );

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_zero_size() {
        let executor = SimulatedSwapExecutor::default();
        let result = executor.swap("TOKA", SwapSide::Buy, 0.0, 1.0).await;
        assert_eq!(result.unwrap_err(), ExecError::Rejected);
    }

    #[tokio::test]
    async fn success_produces_positive_receipt() {
        let executor = SimulatedSwapExecutor {
            rejection_probability: 0.0,
            ..Default::default()
        };
        let receipt = executor.swap("TOKA", SwapSide::Buy, 100.0, 1.0).await.unwrap();
        assert!(receipt.tokens_received > 0.0);
        assert!(receipt.fees > 0.0);
        assert!(!receipt.tx_id.is_empty());
    }

    #[tokio::test]
    async fn sell_proceeds_scale_with_price_not_token_count() {
        let executor = SimulatedSwapExecutor {
            rejection_probability: 0.0,
            slippage_bps: 0.0,
            ..Default::default()
        };
        // Selling 10_000 tokens at 0.00012 base/token should yield base-scale
        // proceeds (~1.2), not another division by price.
        let receipt = executor.swap("TOKA", SwapSide::Sell, 10_000.0, 0.00012).await.unwrap();
        let proceeds_base = receipt.tokens_received * receipt.effective_price - receipt.fees;
        assert!(proceeds_base > 1.0 && proceeds_base < 1.3, "proceeds_base = {proceeds_base}");
    }

    #[tokio::test]
    async fn always_rejects_when_probability_is_one() {
        let executor = SimulatedSwapExecutor {
            rejection_probability: 1.0,
            ..Default::default()
        };
        let result = executor.swap("TOKA", SwapSide::Sell, 100.0, 1.0).await;
        assert_eq!(result.unwrap_err(), ExecError::Rejected);
    }
}
