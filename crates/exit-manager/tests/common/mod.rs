#![allow(dead_code)]

use algo_trade_core::{
    GatewayError, MarketGateway, OrderKind, OrderRequest, OrderState, OrderStatus, Quote,
};
use algo_trade_exits::{
    ExitAttempt, ExitEngine, ExitEngineConfig, ExitStore, InMemoryExitStore,
    InMemoryStrategyRegistry, Position, StrategyConfig, StrategyKey, StrategyParams,
    TrailingStopState,
};
use algo_trade_kalshi::{RateLimiterConfig, TokenBucket};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct MockOrder {
    request: OrderRequest,
    cancelled: bool,
}

/// In-process exchange. Quotes are set per market on the YES side; sell
/// limits fill when at or below the configured clearing price, market orders
/// fill at the current held-side bid.
#[derive(Default)]
pub struct MockExchange {
    quotes: Mutex<HashMap<String, Quote>>,
    limiter: Option<TokenBucket>,
    quote_calls: Mutex<Vec<(Instant, String)>>,
    orders: Mutex<Vec<MockOrder>>,
    cancels: Mutex<Vec<String>>,
    limit_clearing: Mutex<Option<Decimal>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call first takes a token from a bucket of `per_minute` with
    /// `burst`, waiting at most `max_wait`.
    pub fn rate_limited(per_minute: u32, burst: u32, max_wait: Duration) -> Self {
        let config = RateLimiterConfig::new(
            NonZeroU32::new(per_minute).unwrap(),
            NonZeroU32::new(burst).unwrap(),
            max_wait,
        );
        Self {
            limiter: Some(TokenBucket::new(config)),
            ..Self::default()
        }
    }

    pub fn set_quote(&self, market_id: &str, bid: Decimal, ask: Decimal) {
        self.quotes
            .lock()
            .insert(market_id.to_string(), Quote::new(market_id, bid, ask, dec!(100)));
    }

    pub fn fill_limits_at_or_below(&self, price: Decimal) {
        *self.limit_clearing.lock() = Some(price);
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.orders.lock().iter().map(|o| o.request.clone()).collect()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }

    pub fn quote_calls(&self) -> Vec<(Instant, String)> {
        self.quote_calls.lock().clone()
    }

    pub fn fetched_markets(&self) -> HashSet<String> {
        self.quote_calls
            .lock()
            .iter()
            .map(|(_, market)| market.clone())
            .collect()
    }

    async fn admit(&self) -> Result<(), GatewayError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await.map_err(GatewayError::from)?;
        }
        Ok(())
    }

    fn index(order_id: &str) -> Result<usize, GatewayError> {
        order_id
            .strip_prefix("mock-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| GatewayError::client(404, format!("unknown order {order_id}")))
    }
}

#[async_trait]
impl MarketGateway for MockExchange {
    async fn get_quote(&self, market_id: &str) -> Result<Quote, GatewayError> {
        self.admit().await?;
        self.quote_calls
            .lock()
            .push((Instant::now(), market_id.to_string()));
        let mut quote = self
            .quotes
            .lock()
            .get(market_id)
            .cloned()
            .ok_or_else(|| GatewayError::client(404, format!("unknown market {market_id}")))?;
        quote.timestamp = chrono::Utc::now();
        Ok(quote)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, GatewayError> {
        self.admit().await?;
        let mut orders = self.orders.lock();
        orders.push(MockOrder {
            request: order.clone(),
            cancelled: false,
        });
        Ok(format!("mock-{}", orders.len() - 1))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, GatewayError> {
        self.admit().await?;
        let index = Self::index(order_id)?;
        self.cancels.lock().push(order_id.to_string());
        let mut orders = self.orders.lock();
        let order = &mut orders[index];
        let was_live = !order.cancelled;
        order.cancelled = true;
        Ok(was_live)
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderState, GatewayError> {
        self.admit().await?;
        let index = Self::index(order_id)?;
        let clearing = *self.limit_clearing.lock();
        let orders = self.orders.lock();
        let order = &orders[index];
        let request = &order.request;

        let fill_price = match request.kind {
            OrderKind::Market => self
                .quotes
                .lock()
                .get(&request.market_id)
                .map(|q| q.bid_for(request.side)),
            OrderKind::Limit => match (request.limit_price, clearing) {
                (Some(limit), Some(clearing)) if limit <= clearing => Some(limit),
                _ => None,
            },
        };

        let (status, filled) = match fill_price {
            Some(_) => (OrderStatus::Filled, request.quantity),
            None if order.cancelled => (OrderStatus::Cancelled, 0),
            None => (OrderStatus::Resting, 0),
        };
        Ok(OrderState {
            order_id: order_id.to_string(),
            status,
            filled_quantity: filled,
            avg_fill_price: fill_price,
        })
    }
}

pub fn strategy_key() -> StrategyKey {
    StrategyKey::new("test", 1)
}

/// Registry holding `params` as the active version of `test@v1`.
pub fn registry(params: StrategyParams) -> Arc<InMemoryStrategyRegistry> {
    let registry = InMemoryStrategyRegistry::new();
    registry
        .register(StrategyConfig::new(strategy_key(), params).unwrap())
        .unwrap();
    registry.set_active(&strategy_key()).unwrap();
    Arc::new(registry)
}

pub fn open_position(
    id: &str,
    market_id: &str,
    params: &StrategyParams,
    quantity: u32,
    entry: Decimal,
) -> Position {
    let strategy = StrategyConfig::new(strategy_key(), params.clone()).unwrap();
    Position::open(id, market_id, algo_trade_core::Side::Yes, &strategy, quantity, entry).unwrap()
}

pub fn engine(
    exchange: &Arc<MockExchange>,
    params: StrategyParams,
    config: ExitEngineConfig,
    store: Option<Arc<dyn ExitStore>>,
) -> ExitEngine {
    let mut builder = ExitEngine::builder(Arc::clone(exchange) as Arc<dyn MarketGateway>)
        .with_config(config)
        .with_strategies(registry(params));
    if let Some(store) = store {
        builder = builder.with_store(store);
    }
    builder.build().unwrap()
}

/// In-memory store that counts position and stop writes.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryExitStore,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExitStore for CountingStore {
    async fn save_position(&self, position: &Position) -> algo_trade_exits::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save_position(position).await
    }

    async fn save_trailing_stop_state(
        &self,
        position_id: &str,
        state: &TrailingStopState,
    ) -> algo_trade_exits::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save_trailing_stop_state(position_id, state).await
    }

    async fn append_exit_attempt(&self, attempt: &ExitAttempt) -> algo_trade_exits::Result<bool> {
        self.inner.append_exit_attempt(attempt).await
    }

    async fn load_open_positions(&self) -> algo_trade_exits::Result<Vec<Position>> {
        self.inner.load_open_positions().await
    }

    async fn exit_attempts(&self, position_id: &str) -> algo_trade_exits::Result<Vec<ExitAttempt>> {
        self.inner.exit_attempts(position_id).await
    }
}
