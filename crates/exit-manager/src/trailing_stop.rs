//! One-way-ratchet trailing stop.
//!
//! The stop follows the highest held-side bid seen since entry:
//!
//! ```text
//! current_stop_price = peak_price * (1 - distance)
//! ```
//!
//! A favorable tick raises the peak and the stop with it. Any other tick
//! leaves both untouched, so the stop never loosens. The stop is always
//! recomputed from the peak rather than adjusted incrementally, which keeps
//! the formula exact across any number of updates.

use crate::error::{ExitError, Result};
use crate::position::Position;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// TrailingStopState
// =============================================================================

/// Trailing stop for one position.
///
/// Fields are private: the only ways to obtain a state are [`TrailingStopState::new`],
/// deserialization (validated), and [`TrailingStopEngine::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TrailingStopRecord", into = "TrailingStopRecord")]
pub struct TrailingStopState {
    active: bool,
    peak_price: Decimal,
    current_stop_price: Decimal,
    distance: Decimal,
}

/// Persisted form of [`TrailingStopState`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrailingStopRecord {
    pub active: bool,
    pub peak_price: Decimal,
    pub current_stop_price: Decimal,
    pub distance: Decimal,
}

fn stop_for(peak: Decimal, distance: Decimal) -> Decimal {
    peak * (Decimal::ONE - distance)
}

impl TrailingStopState {
    /// Creates an active stop anchored at `entry_price`.
    ///
    /// # Errors
    /// Returns a validation error if the entry is not positive or the
    /// distance is outside `(0, 1)`.
    pub fn new(entry_price: Decimal, distance: Decimal) -> Result<Self> {
        if entry_price <= Decimal::ZERO {
            return Err(ExitError::validation(format!(
                "trailing stop peak must be positive, got {entry_price}"
            )));
        }
        if distance <= Decimal::ZERO || distance >= Decimal::ONE {
            return Err(ExitError::validation(format!(
                "trailing stop distance must be in (0, 1), got {distance}"
            )));
        }
        Ok(Self {
            active: true,
            peak_price: entry_price,
            current_stop_price: stop_for(entry_price, distance),
            distance,
        })
    }

    /// Returns a copy with the stop switched on or off.
    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    #[must_use]
    pub const fn active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn peak_price(&self) -> Decimal {
        self.peak_price
    }

    #[must_use]
    pub const fn current_stop_price(&self) -> Decimal {
        self.current_stop_price
    }

    #[must_use]
    pub const fn distance(&self) -> Decimal {
        self.distance
    }

    /// Returns true when an active stop is at or above `bid`.
    #[must_use]
    pub fn is_hit(&self, bid: Decimal) -> bool {
        self.active && bid <= self.current_stop_price
    }
}

impl TryFrom<TrailingStopRecord> for TrailingStopState {
    type Error = ExitError;

    fn try_from(record: TrailingStopRecord) -> Result<Self> {
        let state = Self::new(record.peak_price, record.distance)?;
        if record.current_stop_price != state.current_stop_price {
            return Err(ExitError::validation(format!(
                "stop {} does not match peak {} at distance {}",
                record.current_stop_price, record.peak_price, record.distance
            )));
        }
        Ok(state.with_active(record.active))
    }
}

impl From<TrailingStopState> for TrailingStopRecord {
    fn from(state: TrailingStopState) -> Self {
        Self {
            active: state.active,
            peak_price: state.peak_price,
            current_stop_price: state.current_stop_price,
            distance: state.distance,
        }
    }
}

// =============================================================================
// TrailingStopEngine
// =============================================================================

/// Applies price observations to trailing stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrailingStopEngine;

impl TrailingStopEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the position's stop after observing `current_price`.
    ///
    /// A price at or below the peak, including an empty book quoted at zero,
    /// leaves the state untouched.
    ///
    /// # Errors
    /// Returns an invariant violation if the result would lower the peak or
    /// the stop.
    pub fn update(&self, position: &Position, current_price: Decimal) -> Result<TrailingStopState> {
        self.advance(position.trailing_stop(), current_price)
    }

    /// Applies one observation to `state`.
    ///
    /// # Errors
    /// See [`TrailingStopEngine::update`].
    pub fn advance(
        &self,
        state: &TrailingStopState,
        current_price: Decimal,
    ) -> Result<TrailingStopState> {
        if !state.active || current_price <= state.peak_price {
            return Ok(*state);
        }

        let next = TrailingStopState {
            peak_price: current_price,
            current_stop_price: stop_for(current_price, state.distance),
            ..*state
        };

        if next.peak_price < state.peak_price
            || next.current_stop_price < state.current_stop_price
            || next.current_stop_price > next.peak_price
        {
            return Err(ExitError::invariant(format!(
                "trailing stop would move from peak {} stop {} to peak {} stop {}",
                state.peak_price, state.current_stop_price, next.peak_price, next.current_stop_price
            )));
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // ==================== State Tests ====================

    #[test]
    fn test_new_anchors_at_entry() {
        let state = TrailingStopState::new(dec!(0.50), dec!(0.10)).unwrap();
        assert!(state.active());
        assert_eq!(state.peak_price(), dec!(0.50));
        assert_eq!(state.current_stop_price(), dec!(0.45));
    }

    #[test]
    fn test_new_rejects_bad_inputs() {
        assert!(TrailingStopState::new(dec!(0), dec!(0.1)).is_err());
        assert!(TrailingStopState::new(dec!(0.5), dec!(0)).is_err());
        assert!(TrailingStopState::new(dec!(0.5), dec!(1)).is_err());
    }

    #[test]
    fn test_is_hit() {
        let state = TrailingStopState::new(dec!(0.50), dec!(0.10)).unwrap();
        assert!(state.is_hit(dec!(0.45)));
        assert!(state.is_hit(dec!(0.40)));
        assert!(!state.is_hit(dec!(0.46)));
        assert!(!state.with_active(false).is_hit(dec!(0.10)));
    }

    // ==================== Engine Tests ====================

    #[test]
    fn test_favorable_move_ratchets() {
        let engine = TrailingStopEngine::new();
        let state = TrailingStopState::new(dec!(0.50), dec!(0.10)).unwrap();

        let state = engine.advance(&state, dec!(0.70)).unwrap();
        assert_eq!(state.peak_price(), dec!(0.70));
        assert_eq!(state.current_stop_price(), dec!(0.63));

        let state = engine.advance(&state, dec!(0.65)).unwrap();
        assert_eq!(state.peak_price(), dec!(0.70));
        assert_eq!(state.current_stop_price(), dec!(0.63));
    }

    #[test]
    fn test_inactive_state_unchanged() {
        let engine = TrailingStopEngine::new();
        let state = TrailingStopState::new(dec!(0.50), dec!(0.10))
            .unwrap()
            .with_active(false);
        assert_eq!(engine.advance(&state, dec!(0.90)).unwrap(), state);
    }

    #[test]
    fn test_empty_book_leaves_stop_unchanged() {
        let engine = TrailingStopEngine::new();
        let state = TrailingStopState::new(dec!(0.50), dec!(0.10)).unwrap();
        assert_eq!(engine.advance(&state, dec!(0)).unwrap(), state);
        assert_eq!(engine.advance(&state, dec!(-0.01)).unwrap(), state);
    }

    #[test]
    fn test_ratchet_over_noisy_sequence() {
        let engine = TrailingStopEngine::new();
        let mut state = TrailingStopState::new(dec!(0.40), dec!(0.07)).unwrap();

        // Deterministic noise: out-of-order, repeated, and reversing ticks.
        let mut price = dec!(0.40);
        let steps = [
            dec!(0.03),
            dec!(-0.05),
            dec!(0.01),
            dec!(0.00),
            dec!(0.11),
            dec!(-0.20),
            dec!(0.02),
            dec!(0.07),
            dec!(-0.01),
            dec!(0.13),
        ];
        for round in 0..20 {
            for step in steps {
                let tweak = Decimal::from(round % 3) / dec!(1000);
                price = (price + step + tweak).max(dec!(0.01)).min(dec!(0.99));

                let next = engine.advance(&state, price).unwrap();
                assert!(next.peak_price() >= state.peak_price());
                assert!(next.current_stop_price() >= state.current_stop_price());
                assert!(next.current_stop_price() <= next.peak_price());
                assert_eq!(
                    next.current_stop_price(),
                    next.peak_price() * (Decimal::ONE - next.distance())
                );
                state = next;
            }
        }
        assert_eq!(state.peak_price(), dec!(0.99));
    }

    // ==================== Serde Tests ====================

    #[test]
    fn test_deserialize_validates_formula() {
        let ok: TrailingStopState = serde_json::from_value(serde_json::json!({
            "active": true,
            "peak_price": "0.70",
            "current_stop_price": "0.63",
            "distance": "0.10"
        }))
        .unwrap();
        assert_eq!(ok.current_stop_price(), dec!(0.63));

        let bad: std::result::Result<TrailingStopState, _> =
            serde_json::from_value(serde_json::json!({
                "active": true,
                "peak_price": "0.70",
                "current_stop_price": "0.60",
                "distance": "0.10"
            }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_deserialize_rejects_bad_distance_and_peak() {
        for (peak, stop, distance) in [("0.70", "0.70", "0"), ("0", "0", "0.1"), ("0.5", "0", "1")] {
            let result: std::result::Result<TrailingStopState, _> =
                serde_json::from_value(serde_json::json!({
                    "active": true,
                    "peak_price": peak,
                    "current_stop_price": stop,
                    "distance": distance
                }));
            assert!(result.is_err(), "accepted peak={peak} distance={distance}");
        }
    }

    #[test]
    fn test_serialize_keeps_inactive_flag() {
        let state = TrailingStopState::new(dec!(0.5), dec!(0.2))
            .unwrap()
            .with_active(false);
        let json = serde_json::to_string(&state).unwrap();
        let back: TrailingStopState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert!(!back.active());
    }
}
