use crate::error::GatewayError;
use crate::types::{OrderRequest, OrderState, Quote, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Market data and order entry for one venue.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Returns the current top of book for `market_id`.
    async fn get_quote(&self, market_id: &str) -> Result<Quote, GatewayError>;

    /// Submits an order and returns the exchange order id.
    async fn place_order(&self, order: &OrderRequest) -> Result<String, GatewayError>;

    /// Cancels a resting order. Returns false when the order was already gone.
    async fn cancel_order(&self, order_id: &str) -> Result<bool, GatewayError>;

    async fn get_order_status(&self, order_id: &str) -> Result<OrderState, GatewayError>;
}

/// Model estimate of what a contract is worth.
pub trait FairValueSource: Send + Sync {
    /// Fair probability for the `side` contract of `market_id`, if the model has one.
    fn fair_value(&self, market_id: &str, side: Side) -> Option<Decimal>;
}

/// Fair-value source for deployments without a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFairValue;

impl FairValueSource for NoFairValue {
    fn fair_value(&self, _market_id: &str, _side: Side) -> Option<Decimal> {
        None
    }
}
