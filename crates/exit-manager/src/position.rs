//! Open positions on binary markets.

use crate::error::{ExitError, Result};
use crate::strategy::{StrategyConfig, StrategyKey};
use crate::trailing_stop::TrailingStopState;
use algo_trade_core::{Quote, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// An open exposure to one side of a binary market.
///
/// All prices are in terms of the held side: a NO position's bid is
/// `1 - yes_ask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub market_id: String,
    pub side: Side,
    /// Strategy version the position was opened under.
    pub strategy: StrategyKey,
    /// Contracts still held.
    pub quantity: u32,
    pub initial_quantity: u32,
    pub entry_price: Decimal,
    pub current_bid: Decimal,
    pub current_ask: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    trailing_stop: TrailingStopState,
    /// Partial-exit stages already filled.
    pub partial_stages_completed: usize,
    pub market_close_time: Option<DateTime<Utc>>,
    pub rebalance_requested: bool,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    last_evaluated_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Opens a position under `strategy`, with its trailing stop anchored at
    /// `entry_price`.
    ///
    /// # Errors
    /// Returns a validation error for an empty id, zero quantity, or an entry
    /// price outside `(0, 1)`.
    pub fn open(
        id: impl Into<String>,
        market_id: impl Into<String>,
        side: Side,
        strategy: &StrategyConfig,
        quantity: u32,
        entry_price: Decimal,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ExitError::validation("position id cannot be empty"));
        }
        if quantity == 0 {
            return Err(ExitError::validation("position quantity must be positive"));
        }
        if entry_price <= Decimal::ZERO || entry_price >= Decimal::ONE {
            return Err(ExitError::validation(format!(
                "entry price must be in (0, 1), got {entry_price}"
            )));
        }

        let trailing_stop =
            TrailingStopState::new(entry_price, strategy.params().trailing_stop_distance)?;

        Ok(Self {
            id,
            market_id: market_id.into(),
            side,
            strategy: strategy.key().clone(),
            quantity,
            initial_quantity: quantity,
            entry_price,
            current_bid: entry_price,
            current_ask: entry_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            trailing_stop,
            partial_stages_completed: 0,
            market_close_time: None,
            rebalance_requested: false,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            last_evaluated_at: None,
        })
    }

    /// Sets the market close time.
    #[must_use]
    pub fn with_market_close(mut self, close_time: DateTime<Utc>) -> Self {
        self.market_close_time = Some(close_time);
        self
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    #[must_use]
    pub const fn trailing_stop(&self) -> &TrailingStopState {
        &self.trailing_stop
    }

    /// Replaces the stop with one produced by the trailing-stop engine.
    pub(crate) fn set_trailing_stop(&mut self, state: TrailingStopState) {
        self.trailing_stop = state;
    }

    #[must_use]
    pub const fn last_evaluated_at(&self) -> Option<DateTime<Utc>> {
        self.last_evaluated_at
    }

    /// Records an evaluation. The timestamp never moves backwards.
    pub fn touch_evaluated(&mut self, at: DateTime<Utc>) {
        self.last_evaluated_at = Some(self.last_evaluated_at.map_or(at, |prev| prev.max(at)));
    }

    /// Marks the position to `quote`.
    pub fn mark(&mut self, quote: &Quote) {
        self.current_bid = quote.bid_for(self.side);
        self.current_ask = quote.ask_for(self.side);
        self.unrealized_pnl = (self.current_bid - self.entry_price) * Decimal::from(self.quantity);
    }

    /// Return on entry at `bid`, as a fraction (0.15 = +15%).
    #[must_use]
    pub fn pnl_pct_at(&self, bid: Decimal) -> Decimal {
        (bid - self.entry_price) / self.entry_price
    }

    #[must_use]
    pub fn pnl_pct(&self) -> Decimal {
        self.pnl_pct_at(self.current_bid)
    }

    /// Removes `quantity` contracts sold at `price` and books the P&L.
    /// Closes the position once nothing remains.
    ///
    /// # Errors
    /// Returns an invariant violation when more is sold than is held or the
    /// position is already closed.
    pub fn apply_fill(&mut self, quantity: u32, price: Decimal) -> Result<Decimal> {
        if !self.is_open() {
            return Err(ExitError::invariant(format!(
                "fill of {quantity} applied to closed position {}",
                self.id
            )));
        }
        if quantity > self.quantity {
            return Err(ExitError::invariant(format!(
                "fill of {quantity} exceeds open quantity {} on position {}",
                self.quantity, self.id
            )));
        }

        let realized = (price - self.entry_price) * Decimal::from(quantity);
        self.quantity -= quantity;
        self.realized_pnl += realized;
        self.unrealized_pnl = (self.current_bid - self.entry_price) * Decimal::from(self.quantity);
        if self.quantity == 0 {
            self.status = PositionStatus::Closed;
        }
        Ok(realized)
    }

    /// Closes the position without a fill.
    pub fn close(&mut self) {
        self.status = PositionStatus::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyParams;
    use rust_decimal_macros::dec;

    fn strategy() -> StrategyConfig {
        StrategyConfig::new(StrategyKey::new("test", 1), StrategyParams::default()).unwrap()
    }

    // ==================== Open Tests ====================

    #[test]
    fn test_open_sets_stop_at_entry() {
        let pos = Position::open("p1", "KXTEST", Side::Yes, &strategy(), 10, dec!(0.50)).unwrap();
        assert_eq!(pos.trailing_stop().peak_price(), dec!(0.50));
        assert_eq!(pos.trailing_stop().current_stop_price(), dec!(0.45));
        assert_eq!(pos.initial_quantity, 10);
        assert!(pos.is_open());
        assert_eq!(pos.strategy.version, 1);
    }

    #[test]
    fn test_open_rejects_bad_inputs() {
        let s = strategy();
        assert!(Position::open("", "KXTEST", Side::Yes, &s, 10, dec!(0.5)).is_err());
        assert!(Position::open("p1", "KXTEST", Side::Yes, &s, 0, dec!(0.5)).is_err());
        assert!(Position::open("p1", "KXTEST", Side::Yes, &s, 10, dec!(1.0)).is_err());
        assert!(Position::open("p1", "KXTEST", Side::Yes, &s, 10, dec!(0)).is_err());
    }

    // ==================== Mark Tests ====================

    #[test]
    fn test_mark_yes_position() {
        let mut pos =
            Position::open("p1", "KXTEST", Side::Yes, &strategy(), 10, dec!(0.50)).unwrap();
        pos.mark(&Quote::new("KXTEST", dec!(0.60), dec!(0.62), dec!(100)));
        assert_eq!(pos.current_bid, dec!(0.60));
        assert_eq!(pos.unrealized_pnl, dec!(1.00));
        assert_eq!(pos.pnl_pct(), dec!(0.2));
    }

    #[test]
    fn test_mark_no_position_uses_complement() {
        let mut pos = Position::open("p1", "KXTEST", Side::No, &strategy(), 4, dec!(0.40)).unwrap();
        pos.mark(&Quote::new("KXTEST", dec!(0.45), dec!(0.50), dec!(100)));
        assert_eq!(pos.current_bid, dec!(0.50));
        assert_eq!(pos.current_ask, dec!(0.55));
        assert_eq!(pos.unrealized_pnl, dec!(0.40));
    }

    // ==================== Fill Tests ====================

    #[test]
    fn test_apply_partial_then_full_fill() {
        let mut pos =
            Position::open("p1", "KXTEST", Side::Yes, &strategy(), 10, dec!(0.50)).unwrap();

        let realized = pos.apply_fill(4, dec!(0.60)).unwrap();
        assert_eq!(realized, dec!(0.40));
        assert_eq!(pos.quantity, 6);
        assert!(pos.is_open());

        pos.apply_fill(6, dec!(0.45)).unwrap();
        assert_eq!(pos.quantity, 0);
        assert_eq!(pos.realized_pnl, dec!(0.10));
        assert_eq!(pos.status, PositionStatus::Closed);
    }

    #[test]
    fn test_overfill_is_invariant_violation() {
        let mut pos =
            Position::open("p1", "KXTEST", Side::Yes, &strategy(), 3, dec!(0.50)).unwrap();
        let err = pos.apply_fill(4, dec!(0.60)).unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(pos.quantity, 3);
    }

    #[test]
    fn test_fill_after_close_is_invariant_violation() {
        let mut pos =
            Position::open("p1", "KXTEST", Side::Yes, &strategy(), 3, dec!(0.50)).unwrap();
        pos.close();
        assert!(pos.apply_fill(1, dec!(0.60)).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn test_touch_evaluated_is_monotonic() {
        let mut pos =
            Position::open("p1", "KXTEST", Side::Yes, &strategy(), 3, dec!(0.50)).unwrap();
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(30);

        pos.touch_evaluated(later);
        pos.touch_evaluated(earlier);
        assert_eq!(pos.last_evaluated_at(), Some(later));
    }
}
