//! Fair values published by an external model.

use algo_trade_core::{FairValueSource, Side};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Latest model fair value per market.
///
/// Values are stored for the YES side. The NO fair value is the complement.
#[derive(Debug, Default)]
pub struct FairValueBoard {
    values: RwLock<HashMap<String, Decimal>>,
}

impl FairValueBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the YES fair probability for `market_id`.
    pub fn publish(&self, market_id: impl Into<String>, yes_probability: Decimal) {
        self.values.write().insert(market_id.into(), yes_probability);
    }

    /// Withdraws the model's view of `market_id`, disabling its edge checks.
    pub fn withdraw(&self, market_id: &str) {
        self.values.write().remove(market_id);
    }
}

impl FairValueSource for FairValueBoard {
    fn fair_value(&self, market_id: &str, side: Side) -> Option<Decimal> {
        let yes = *self.values.read().get(market_id)?;
        Some(match side {
            Side::Yes => yes,
            Side::No => Decimal::ONE - yes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_publish_and_complement() {
        let board = FairValueBoard::new();
        board.publish("KXTEST", dec!(0.62));

        assert_eq!(board.fair_value("KXTEST", Side::Yes), Some(dec!(0.62)));
        assert_eq!(board.fair_value("KXTEST", Side::No), Some(dec!(0.38)));
        assert_eq!(board.fair_value("KXOTHER", Side::Yes), None);
    }

    #[test]
    fn test_withdraw() {
        let board = FairValueBoard::new();
        board.publish("KXTEST", dec!(0.62));
        board.withdraw("KXTEST");
        assert_eq!(board.fair_value("KXTEST", Side::Yes), None);
    }
}
