//! Tiered exit execution with price walking.
//!
//! The trigger's tier decides how hard the executor leans on the book:
//!
//! | Tier     | First order              | Walks | Then                  |
//! |----------|--------------------------|-------|-----------------------|
//! | CRITICAL | market                   | none  | done                  |
//! | HIGH     | limit at `bid - tick`    | 2     | market fallback       |
//! | MEDIUM   | limit at `bid`           | 5     | done                  |
//! | LOW      | limit at `bid + tick`    | 10    | done                  |
//!
//! Each walk cancels the resting order and re-places the unfilled remainder
//! one tick lower. Timeouts and walk limits come from the strategy version.
//! Every order placed produces one [`ExitAttempt`], appended to the store.

use crate::conditions::{ExitCondition, ExitTier};
use crate::evaluator::ExitTrigger;
use crate::persistence::ExitStore;
use crate::position::Position;
use crate::strategy::StrategyConfig;
use algo_trade_core::{MarketGateway, OrderKind, OrderRequest, OrderState, OrderStatus, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Interval between order status polls.
    pub poll_interval_ms: u64,
    /// Price increment of one walk.
    pub tick_size: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            tick_size: Decimal::new(1, 2),
            min_price: Decimal::new(1, 2),
            max_price: Decimal::new(99, 2),
        }
    }
}

impl ExecutorConfig {
    fn clamp(&self, price: Decimal) -> Decimal {
        price.max(self.min_price).min(self.max_price)
    }

    /// First limit price for `tier`, given the held-side bid.
    #[must_use]
    pub fn initial_limit(&self, tier: ExitTier, bid: Decimal) -> Decimal {
        let price = match tier {
            ExitTier::Critical | ExitTier::High => bid - self.tick_size,
            ExitTier::Medium => bid,
            ExitTier::Low => bid + self.tick_size,
        };
        self.clamp(price)
    }

    /// Price one tick more aggressive than `price`.
    #[must_use]
    pub fn walk(&self, price: Decimal) -> Decimal {
        self.clamp(price - self.tick_size)
    }
}

// =============================================================================
// Records
// =============================================================================

/// Final state of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Filled,
    PartiallyFilled,
    /// Timed out with nothing filled.
    Unfilled,
    /// Stopped by cancellation or by the exchange, nothing filled.
    Cancelled,
    /// Placement failed or the exchange rejected the order.
    Rejected,
}

impl AttemptStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Filled => "filled",
            Self::PartiallyFilled => "partially_filled",
            Self::Unfilled => "unfilled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }
}

/// Audit record of one order placed for a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitAttempt {
    /// `{trigger_id}-{attempt_number}`, also used as the client order id.
    pub id: String,
    pub position_id: String,
    pub trigger_id: String,
    pub market_id: String,
    pub side: Side,
    pub condition: ExitCondition,
    pub tier: ExitTier,
    pub order_kind: OrderKind,
    pub limit_price: Option<Decimal>,
    pub quantity: u32,
    pub attempt_number: u32,
    pub order_id: Option<String>,
    pub filled_quantity: u32,
    pub avg_fill_price: Option<Decimal>,
    pub status: AttemptStatus,
    pub error: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    Filled,
    PartiallyFilled,
    /// Nothing filled.
    Failed,
    /// Stopped by the cancellation token. Fills made before that still count.
    Cancelled,
}

impl ExitOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Filled => "filled",
            Self::PartiallyFilled => "partially_filled",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Everything that happened while executing one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitExecution {
    pub trigger: ExitTrigger,
    pub attempts: Vec<ExitAttempt>,
    pub filled_quantity: u32,
    /// Volume-weighted fill price across attempts.
    pub avg_fill_price: Option<Decimal>,
    pub realized_pnl: Decimal,
    pub outcome: ExitOutcome,
}

// =============================================================================
// Executor
// =============================================================================

/// Per-execution facts shared by every attempt.
struct AttemptContext<'a> {
    position: &'a Position,
    trigger: &'a ExitTrigger,
    cancel: &'a CancellationToken,
}

/// Places, polls, cancels and escalates exit orders.
pub struct ExitExecutor {
    gateway: Arc<dyn MarketGateway>,
    store: Arc<dyn ExitStore>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for ExitExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExitExecutor {
    pub fn new(
        gateway: Arc<dyn MarketGateway>,
        store: Arc<dyn ExitStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes `trigger` against `position` until filled, out of walks, or
    /// cancelled.
    pub async fn execute(
        &self,
        position: &Position,
        trigger: &ExitTrigger,
        strategy: &StrategyConfig,
        cancel: CancellationToken,
    ) -> ExitExecution {
        let params = strategy.params();
        let limits = params.tier_execution(trigger.tier);
        let ctx = AttemptContext {
            position,
            trigger,
            cancel: &cancel,
        };

        let mut attempts = Vec::new();
        let mut remaining = trigger.quantity;

        if trigger.tier == ExitTier::Critical {
            if !cancel.is_cancelled() {
                let attempt = self
                    .run_attempt(&ctx, None, remaining, 1, limits.timeout())
                    .await;
                attempts.push(attempt);
            }
        } else {
            let mut price = self.config.initial_limit(trigger.tier, trigger.bid);
            let mut rejected = false;

            for walk in 0..=limits.max_walks {
                if cancel.is_cancelled() {
                    break;
                }
                if walk > 0 {
                    let next = self.config.walk(price);
                    if next == price {
                        debug!(
                            position_id = %position.id,
                            trigger_id = %trigger.id,
                            price = %price,
                            "exit price at floor, no further walks"
                        );
                        break;
                    }
                    price = next;
                    debug!(
                        position_id = %position.id,
                        trigger_id = %trigger.id,
                        walk,
                        price = %price,
                        "walking exit price"
                    );
                }

                let number = attempts.len() as u32 + 1;
                let attempt = self
                    .run_attempt(&ctx, Some(price), remaining, number, limits.timeout())
                    .await;
                remaining -= attempt.filled_quantity.min(remaining);
                rejected = attempt.status == AttemptStatus::Rejected;
                attempts.push(attempt);

                if remaining == 0 || rejected {
                    break;
                }
            }

            let fallback = trigger.tier == ExitTier::High
                && remaining > 0
                && !rejected
                && !cancel.is_cancelled();
            if fallback {
                info!(
                    position_id = %position.id,
                    trigger_id = %trigger.id,
                    remaining,
                    "walks exhausted, escalating to market order"
                );
                let number = attempts.len() as u32 + 1;
                let attempt = self
                    .run_attempt(&ctx, None, remaining, number, params.critical.timeout())
                    .await;
                attempts.push(attempt);
            }
        }

        let execution = Self::summarize(position, trigger, attempts, cancel.is_cancelled());
        info!(
            position_id = %position.id,
            market_id = %position.market_id,
            trigger_id = %trigger.id,
            condition = trigger.condition.as_str(),
            tier = trigger.tier.as_str(),
            outcome = execution.outcome.as_str(),
            filled = execution.filled_quantity,
            requested = trigger.quantity,
            attempts = execution.attempts.len(),
            realized_pnl = %execution.realized_pnl,
            "exit execution finished"
        );
        execution
    }

    fn summarize(
        position: &Position,
        trigger: &ExitTrigger,
        attempts: Vec<ExitAttempt>,
        cancelled: bool,
    ) -> ExitExecution {
        let mut filled = 0u32;
        let mut notional = Decimal::ZERO;
        for attempt in &attempts {
            if attempt.filled_quantity == 0 {
                continue;
            }
            let price = attempt
                .avg_fill_price
                .or(attempt.limit_price)
                .unwrap_or(trigger.bid);
            filled += attempt.filled_quantity;
            notional += price * Decimal::from(attempt.filled_quantity);
        }

        let avg_fill_price = (filled > 0).then(|| notional / Decimal::from(filled));
        let realized_pnl = avg_fill_price.map_or(Decimal::ZERO, |avg| {
            (avg - position.entry_price) * Decimal::from(filled)
        });

        let outcome = if filled >= trigger.quantity {
            ExitOutcome::Filled
        } else if cancelled {
            ExitOutcome::Cancelled
        } else if filled > 0 {
            ExitOutcome::PartiallyFilled
        } else {
            ExitOutcome::Failed
        };

        ExitExecution {
            trigger: trigger.clone(),
            attempts,
            filled_quantity: filled,
            avg_fill_price,
            realized_pnl,
            outcome,
        }
    }

    /// Places one order and drives it to a terminal attempt status.
    async fn run_attempt(
        &self,
        ctx: &AttemptContext<'_>,
        limit_price: Option<Decimal>,
        quantity: u32,
        attempt_number: u32,
        timeout: Duration,
    ) -> ExitAttempt {
        let AttemptContext {
            position,
            trigger,
            cancel,
        } = ctx;
        let id = format!("{}-{attempt_number}", trigger.id);
        let order = match limit_price {
            Some(price) => {
                OrderRequest::sell_limit(&position.market_id, position.side, quantity, price, &id)
            }
            None => OrderRequest::sell_market(&position.market_id, position.side, quantity, &id),
        };

        let mut attempt = ExitAttempt {
            id,
            position_id: position.id.clone(),
            trigger_id: trigger.id.clone(),
            market_id: position.market_id.clone(),
            side: position.side,
            condition: trigger.condition,
            tier: trigger.tier,
            order_kind: order.kind,
            limit_price,
            quantity,
            attempt_number,
            order_id: None,
            filled_quantity: 0,
            avg_fill_price: None,
            status: AttemptStatus::Rejected,
            error: None,
            placed_at: Utc::now(),
            resolved_at: Utc::now(),
        };

        match self.gateway.place_order(&order).await {
            Ok(order_id) => {
                attempt.order_id = Some(order_id.clone());
                let (state, end) = self.await_fill(&order_id, quantity, timeout, cancel).await;
                if let Some(state) = &state {
                    attempt.filled_quantity = if state.status == OrderStatus::Filled {
                        quantity
                    } else {
                        state.filled_quantity.min(quantity)
                    };
                    attempt.avg_fill_price = state.avg_fill_price;
                }
                attempt.status =
                    Self::attempt_status(state.as_ref(), attempt.filled_quantity, quantity, end);
            }
            Err(e) => {
                warn!(
                    position_id = %position.id,
                    attempt = %attempt.id,
                    error = %e,
                    "exit order placement failed"
                );
                attempt.error = Some(e.to_string());
            }
        }
        attempt.resolved_at = Utc::now();

        info!(
            position_id = %attempt.position_id,
            market_id = %attempt.market_id,
            attempt = %attempt.id,
            condition = attempt.condition.as_str(),
            tier = attempt.tier.as_str(),
            order_type = %attempt.order_kind,
            price = ?attempt.limit_price,
            quantity = attempt.quantity,
            filled = attempt.filled_quantity,
            status = attempt.status.as_str(),
            order_id = ?attempt.order_id,
            "exit attempt resolved"
        );

        if let Err(e) = self.store.append_exit_attempt(&attempt).await {
            warn!(attempt = %attempt.id, error = %e, "failed to persist exit attempt");
        }
        attempt
    }

    /// Polls until the order fills, turns terminal, times out or is
    /// cancelled. A live order is then cancelled and its final fills re-read.
    async fn await_fill(
        &self,
        order_id: &str,
        quantity: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> (Option<OrderState>, WaitEnd) {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let deadline = Instant::now() + timeout;
        let mut last: Option<OrderState> = None;

        let end = loop {
            let next_poll = (Instant::now() + poll).min(deadline);
            tokio::select! {
                () = cancel.cancelled() => break WaitEnd::Interrupted,
                () = sleep_until(next_poll) => {}
            }

            match self.gateway.get_order_status(order_id).await {
                Ok(state) => {
                    let done = state.is_filled(quantity) || state.status.is_terminal();
                    last = Some(state);
                    if done {
                        return (last, WaitEnd::Terminal);
                    }
                }
                Err(e) => {
                    debug!(order_id, error = %e, "order status poll failed");
                }
            }

            if Instant::now() >= deadline {
                break WaitEnd::TimedOut;
            }
        };

        match self.gateway.cancel_order(order_id).await {
            Ok(true) => debug!(order_id, "exit order cancelled"),
            Ok(false) => debug!(order_id, "exit order already gone at cancel"),
            Err(e) => warn!(order_id, error = %e, "exit order cancel failed"),
        }

        // The order may have filled between the last poll and the cancel.
        match self.gateway.get_order_status(order_id).await {
            Ok(state) => last = Some(state),
            Err(e) => warn!(order_id, error = %e, "final order status read failed"),
        }
        (last, end)
    }

    fn attempt_status(
        state: Option<&OrderState>,
        filled: u32,
        quantity: u32,
        end: WaitEnd,
    ) -> AttemptStatus {
        if filled >= quantity {
            AttemptStatus::Filled
        } else if filled > 0 {
            AttemptStatus::PartiallyFilled
        } else if state.is_some_and(|s| s.status == OrderStatus::Rejected) {
            AttemptStatus::Rejected
        } else {
            match end {
                WaitEnd::Interrupted | WaitEnd::Terminal => AttemptStatus::Cancelled,
                WaitEnd::TimedOut => AttemptStatus::Unfilled,
            }
        }
    }
}

/// How waiting on a resting order ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitEnd {
    /// The exchange reported a fill or a terminal status.
    Terminal,
    TimedOut,
    /// The cancellation token fired.
    Interrupted,
}
