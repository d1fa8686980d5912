//! Exit decision engine.
//!
//! Every tick checks all ten conditions independently against the held-side
//! quote, drops the ones the strategy disables, and resolves the rest by tier
//! and declaration order (see [`ConditionSet::winner`]).
//!
//! # Example
//!
//! ```ignore
//! let evaluator = ExitEvaluator::new();
//! let context = EvaluationContext::at(Utc::now()).with_fair_value(Some(dec!(0.55)));
//!
//! if let Some(trigger) = evaluator.evaluate(&position, &quote, &stop, &strategy, &context)? {
//!     println!("{} ({}) for {}", trigger.condition, trigger.tier, trigger.quantity);
//! }
//! ```

use crate::conditions::{ConditionSet, ExitCondition, ExitTier};
use crate::error::{ExitError, Result};
use crate::position::Position;
use crate::strategy::StrategyConfig;
use crate::trailing_stop::TrailingStopState;
use algo_trade_core::Quote;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

// =============================================================================
// Types
// =============================================================================

/// Inputs to an evaluation that do not come from the position or quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationContext {
    pub now: DateTime<Utc>,
    /// Model fair value for the held side.
    pub fair_value: Option<Decimal>,
    pub circuit_breaker_tripped: bool,
}

impl EvaluationContext {
    #[must_use]
    pub const fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            fair_value: None,
            circuit_breaker_tripped: false,
        }
    }

    #[must_use]
    pub const fn with_fair_value(mut self, fair_value: Option<Decimal>) -> Self {
        self.fair_value = fair_value;
        self
    }

    #[must_use]
    pub const fn with_circuit_breaker(mut self, tripped: bool) -> Self {
        self.circuit_breaker_tripped = tripped;
        self
    }
}

/// The winning exit decision for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitTrigger {
    pub id: String,
    pub position_id: String,
    pub condition: ExitCondition,
    pub tier: ExitTier,
    /// Contracts to sell.
    pub quantity: u32,
    /// Partial-exit stage index, for partial triggers.
    pub partial_stage: Option<usize>,
    /// Held-side bid the decision was made at.
    pub bid: Decimal,
    pub unrealized_pnl: Decimal,
    pub triggered_at: DateTime<Utc>,
}

// =============================================================================
// ExitEvaluator
// =============================================================================

/// Stateless evaluator of exit conditions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitEvaluator;

impl ExitEvaluator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns every enabled condition that fires for this tick.
    #[must_use]
    pub fn firing(
        &self,
        position: &Position,
        quote: &Quote,
        trailing: &TrailingStopState,
        strategy: &StrategyConfig,
        context: &EvaluationContext,
    ) -> ConditionSet {
        let params = strategy.params();
        let bid = quote.bid_for(position.side);
        let pnl_pct = position.pnl_pct_at(bid);
        let mut firing = ConditionSet::empty();

        if pnl_pct <= -params.stop_loss_pct {
            firing.insert(ExitCondition::StopLoss);
        }
        if context.circuit_breaker_tripped {
            firing.insert(ExitCondition::CircuitBreaker);
        }
        if trailing.is_hit(bid) {
            firing.insert(ExitCondition::TrailingStop);
        }
        if let Some(close) = position.market_close_time {
            if close - context.now <= Duration::seconds(params.urgent_before_close_secs) {
                firing.insert(ExitCondition::TimeBasedUrgent);
            }
        }
        if quote.spread() > params.max_spread || quote.volume < params.min_volume {
            firing.insert(ExitCondition::LiquidityDriedUp);
        }
        if pnl_pct >= params.profit_target_pct {
            firing.insert(ExitCondition::ProfitTarget);
        }
        if self.partial_stage_due(position, pnl_pct, strategy).is_some() {
            firing.insert(ExitCondition::PartialExitTarget);
        }
        if let Some(fair) = context.fair_value {
            let edge = fair - bid;
            if edge <= -params.early_exit_edge {
                firing.insert(ExitCondition::EarlyExit);
            }
            if edge < params.edge_floor {
                firing.insert(ExitCondition::EdgeDisappeared);
            }
        }
        if position.rebalance_requested {
            firing.insert(ExitCondition::Rebalance);
        }

        firing.without(params.disabled_conditions)
    }

    /// Evaluates one tick and returns the winning trigger, if any.
    ///
    /// # Errors
    /// Returns an invariant violation if the winning trigger would sell
    /// nothing or more than the position holds.
    pub fn evaluate(
        &self,
        position: &Position,
        quote: &Quote,
        trailing: &TrailingStopState,
        strategy: &StrategyConfig,
        context: &EvaluationContext,
    ) -> Result<Option<ExitTrigger>> {
        if !position.is_open() {
            return Ok(None);
        }

        let firing = self.firing(position, quote, trailing, strategy, context);
        let Some(condition) = firing.winner() else {
            return Ok(None);
        };

        let bid = quote.bid_for(position.side);
        let (quantity, partial_stage) = match condition {
            ExitCondition::PartialExitTarget => {
                let pnl_pct = position.pnl_pct_at(bid);
                match self.partial_stage_due(position, pnl_pct, strategy) {
                    Some((stage, quantity)) => (quantity, Some(stage)),
                    None => (0, None),
                }
            }
            _ => (position.quantity, None),
        };

        if quantity == 0 || quantity > position.quantity {
            return Err(ExitError::invariant(format!(
                "{condition} trigger for {quantity} contracts on position {} holding {}",
                position.id, position.quantity
            )));
        }

        let trigger = ExitTrigger {
            id: Uuid::new_v4().to_string(),
            position_id: position.id.clone(),
            condition,
            tier: condition.tier(),
            quantity,
            partial_stage,
            bid,
            unrealized_pnl: (bid - position.entry_price) * Decimal::from(position.quantity),
            triggered_at: context.now,
        };

        info!(
            position_id = %position.id,
            market_id = %position.market_id,
            trigger_id = %trigger.id,
            condition = condition.as_str(),
            tier = trigger.tier.as_str(),
            quantity,
            bid = %bid,
            pnl = %trigger.unrealized_pnl,
            firing = firing.len(),
            "exit triggered"
        );
        Ok(Some(trigger))
    }

    /// The next pending partial stage and its quantity, when it is due.
    fn partial_stage_due(
        &self,
        position: &Position,
        pnl_pct: Decimal,
        strategy: &StrategyConfig,
    ) -> Option<(usize, u32)> {
        let params = strategy.params();
        let stage_index = position.partial_stages_completed;
        let stage = params.partial_exits.get(stage_index)?;
        if pnl_pct < stage.profit_pct {
            return None;
        }
        let quantity =
            params.partial_quantity(stage_index, position.initial_quantity, position.quantity);
        (quantity > 0).then_some((stage_index, quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{StrategyKey, StrategyParams};
    use algo_trade_core::Side;
    use rust_decimal_macros::dec;

    fn strategy_with(params: StrategyParams) -> StrategyConfig {
        StrategyConfig::new(StrategyKey::new("test", 1), params).unwrap()
    }

    fn strategy() -> StrategyConfig {
        strategy_with(StrategyParams::default())
    }

    fn position(strategy: &StrategyConfig, quantity: u32) -> Position {
        Position::open("p1", "KXTEST", Side::Yes, strategy, quantity, dec!(0.50)).unwrap()
    }

    fn quote(bid: Decimal, ask: Decimal) -> Quote {
        Quote::new("KXTEST", bid, ask, dec!(1000))
    }

    fn now() -> EvaluationContext {
        EvaluationContext::at(Utc::now())
    }

    fn evaluate(
        strategy: &StrategyConfig,
        position: &Position,
        quote: &Quote,
        context: &EvaluationContext,
    ) -> Option<ExitTrigger> {
        ExitEvaluator::new()
            .evaluate(position, quote, position.trailing_stop(), strategy, context)
            .unwrap()
    }

    // ==================== Quiet Market Tests ====================

    #[test]
    fn test_no_trigger_near_entry() {
        let s = strategy();
        let pos = position(&s, 10);
        assert!(evaluate(&s, &pos, &quote(dec!(0.50), dec!(0.52)), &now()).is_none());
    }

    #[test]
    fn test_closed_position_never_triggers() {
        let s = strategy();
        let mut pos = position(&s, 10);
        pos.close();
        assert!(evaluate(&s, &pos, &quote(dec!(0.10), dec!(0.12)), &now()).is_none());
    }

    // ==================== Condition Tests ====================

    #[test]
    fn test_stop_loss_fires_at_threshold() {
        let s = strategy();
        let pos = position(&s, 10);
        let trigger = evaluate(&s, &pos, &quote(dec!(0.35), dec!(0.36)), &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::StopLoss);
        assert_eq!(trigger.tier, ExitTier::Critical);
        assert_eq!(trigger.quantity, 10);
        assert_eq!(trigger.unrealized_pnl, dec!(-1.50));
    }

    #[test]
    fn test_trailing_stop_fires() {
        let s = strategy();
        let pos = position(&s, 10);
        let trigger = evaluate(&s, &pos, &quote(dec!(0.45), dec!(0.46)), &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::TrailingStop);
        assert_eq!(trigger.tier, ExitTier::High);
    }

    #[test]
    fn test_circuit_breaker_fires_for_any_position() {
        let s = strategy();
        let pos = position(&s, 10);
        let ctx = now().with_circuit_breaker(true);
        let trigger = evaluate(&s, &pos, &quote(dec!(0.50), dec!(0.51)), &ctx).unwrap();
        assert_eq!(trigger.condition, ExitCondition::CircuitBreaker);
        assert_eq!(trigger.tier, ExitTier::Critical);
    }

    #[test]
    fn test_time_based_urgent_near_close() {
        let s = strategy();
        let ctx = now();
        let pos = position(&s, 10).with_market_close(ctx.now + Duration::seconds(120));
        let trigger = evaluate(&s, &pos, &quote(dec!(0.50), dec!(0.51)), &ctx).unwrap();
        assert_eq!(trigger.condition, ExitCondition::TimeBasedUrgent);

        let far = position(&s, 10).with_market_close(ctx.now + Duration::hours(3));
        assert!(evaluate(&s, &far, &quote(dec!(0.50), dec!(0.51)), &ctx).is_none());
    }

    #[test]
    fn test_liquidity_dried_up_on_spread_or_volume() {
        let s = strategy();
        let pos = position(&s, 10);

        let wide = quote(dec!(0.50), dec!(0.70));
        let trigger = evaluate(&s, &pos, &wide, &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::LiquidityDriedUp);

        let thin = Quote::new("KXTEST", dec!(0.50), dec!(0.51), dec!(3));
        let trigger = evaluate(&s, &pos, &thin, &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::LiquidityDriedUp);
    }

    #[test]
    fn test_profit_target_is_full_exit() {
        let s = strategy_with(StrategyParams {
            partial_exits: vec![],
            ..Default::default()
        });
        let pos = position(&s, 10);
        let trigger = evaluate(&s, &pos, &quote(dec!(0.75), dec!(0.76)), &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::ProfitTarget);
        assert_eq!(trigger.quantity, 10);
        assert!(trigger.partial_stage.is_none());
    }

    #[test]
    fn test_partial_exit_schedule() {
        let s = strategy();
        let mut pos = position(&s, 10);

        // +16%: first stage sells 50% of the initial size.
        let trigger = evaluate(&s, &pos, &quote(dec!(0.58), dec!(0.59)), &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::PartialExitTarget);
        assert_eq!(trigger.tier, ExitTier::Medium);
        assert_eq!(trigger.quantity, 5);
        assert_eq!(trigger.partial_stage, Some(0));

        pos.apply_fill(5, dec!(0.58)).unwrap();
        pos.partial_stages_completed = 1;

        // Still +16%: the second stage is not due yet.
        assert!(evaluate(&s, &pos, &quote(dec!(0.58), dec!(0.59)), &now()).is_none());

        // +26%: second stage sells 25% of the initial size.
        let trigger = evaluate(&s, &pos, &quote(dec!(0.63), dec!(0.64)), &now()).unwrap();
        assert_eq!(trigger.quantity, 2);
        assert_eq!(trigger.partial_stage, Some(1));
    }

    #[test]
    fn test_partial_stage_skipped_when_quantity_rounds_to_zero() {
        let s = strategy();
        let pos = position(&s, 1);
        assert!(evaluate(&s, &pos, &quote(dec!(0.58), dec!(0.59)), &now()).is_none());
    }

    #[test]
    fn test_edge_conditions_need_fair_value() {
        let s = strategy();
        let pos = position(&s, 10);
        let q = quote(dec!(0.55), dec!(0.56));
        assert!(evaluate(&s, &pos, &q, &now()).is_none());

        // Fair 0.49 vs bid 0.55: edge -0.06, past the early-exit threshold.
        let ctx = now().with_fair_value(Some(dec!(0.49)));
        let trigger = evaluate(&s, &pos, &q, &ctx).unwrap();
        assert_eq!(trigger.condition, ExitCondition::EarlyExit);

        // Fair 0.555: edge 0.005 is positive but below the floor.
        let ctx = now().with_fair_value(Some(dec!(0.555)));
        let trigger = evaluate(&s, &pos, &q, &ctx).unwrap();
        assert_eq!(trigger.condition, ExitCondition::EdgeDisappeared);

        let ctx = now().with_fair_value(Some(dec!(0.60)));
        assert!(evaluate(&s, &pos, &q, &ctx).is_none());
    }

    #[test]
    fn test_rebalance_flag() {
        let s = strategy();
        let mut pos = position(&s, 10);
        pos.rebalance_requested = true;
        let trigger = evaluate(&s, &pos, &quote(dec!(0.50), dec!(0.51)), &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::Rebalance);
        assert_eq!(trigger.tier, ExitTier::Low);
    }

    #[test]
    fn test_no_side_uses_complement_bid() {
        let s = strategy();
        let pos = Position::open("p2", "KXTEST", Side::No, &s, 10, dec!(0.50)).unwrap();
        // YES ask 0.66 means the NO bid is 0.34: a 32% loss.
        let trigger = evaluate(&s, &pos, &quote(dec!(0.65), dec!(0.66)), &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::StopLoss);
        assert_eq!(trigger.bid, dec!(0.34));
    }

    // ==================== Resolution Tests ====================

    #[test]
    fn test_highest_tier_wins() {
        let s = strategy();
        let pos = position(&s, 10);
        // Trailing stop (HIGH) and liquidity (HIGH) and stop loss (CRITICAL).
        let trigger = evaluate(&s, &pos, &quote(dec!(0.30), dec!(0.60)), &now()).unwrap();
        assert_eq!(trigger.condition, ExitCondition::StopLoss);

        let firing = ExitEvaluator::new().firing(
            &pos,
            &quote(dec!(0.30), dec!(0.60)),
            pos.trailing_stop(),
            &s,
            &now(),
        );
        assert!(firing.contains(ExitCondition::TrailingStop));
        assert!(firing.contains(ExitCondition::LiquidityDriedUp));
    }

    #[test]
    fn test_circuit_breaker_beats_profit_target() {
        let s = strategy();
        let pos = position(&s, 10);
        let ctx = now().with_circuit_breaker(true);
        let trigger = evaluate(&s, &pos, &quote(dec!(0.80), dec!(0.81)), &ctx).unwrap();
        assert_eq!(trigger.condition, ExitCondition::CircuitBreaker);
        assert_eq!(trigger.quantity, 10);
    }

    #[test]
    fn test_disabled_condition_is_skipped() {
        let s = strategy_with(StrategyParams {
            disabled_conditions: ConditionSet::empty().with(ExitCondition::TrailingStop),
            ..Default::default()
        });
        let pos = position(&s, 10);
        assert!(evaluate(&s, &pos, &quote(dec!(0.45), dec!(0.46)), &now()).is_none());
    }

    #[test]
    fn test_trigger_ids_are_unique() {
        let s = strategy();
        let pos = position(&s, 10);
        let q = quote(dec!(0.30), dec!(0.31));
        let a = evaluate(&s, &pos, &q, &now()).unwrap();
        let b = evaluate(&s, &pos, &q, &now()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.condition, b.condition);
    }
}
