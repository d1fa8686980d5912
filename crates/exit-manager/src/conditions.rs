//! Exit conditions and their priority tiers.
//!
//! The ten conditions are a closed set. Each belongs to exactly one tier, and
//! the declaration order below doubles as the tie-break order within a tier:
//!
//! | Tier     | Conditions                                          |
//! |----------|-----------------------------------------------------|
//! | CRITICAL | stop_loss, circuit_breaker                          |
//! | HIGH     | trailing_stop, time_based_urgent, liquidity_dried_up |
//! | MEDIUM   | profit_target, partial_exit_target                  |
//! | LOW      | early_exit, edge_disappeared, rebalance             |

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// ExitTier
// =============================================================================

/// Urgency of an exit. Ordered so that `Critical` is the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitTier {
    Low,
    Medium,
    High,
    Critical,
}

impl ExitTier {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ExitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ExitCondition
// =============================================================================

/// A named exit rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCondition {
    StopLoss,
    CircuitBreaker,
    TrailingStop,
    TimeBasedUrgent,
    LiquidityDriedUp,
    ProfitTarget,
    PartialExitTarget,
    EarlyExit,
    EdgeDisappeared,
    Rebalance,
}

impl ExitCondition {
    /// Every condition in declaration order.
    pub const ALL: [Self; 10] = [
        Self::StopLoss,
        Self::CircuitBreaker,
        Self::TrailingStop,
        Self::TimeBasedUrgent,
        Self::LiquidityDriedUp,
        Self::ProfitTarget,
        Self::PartialExitTarget,
        Self::EarlyExit,
        Self::EdgeDisappeared,
        Self::Rebalance,
    ];

    #[must_use]
    pub const fn tier(&self) -> ExitTier {
        match self {
            Self::StopLoss | Self::CircuitBreaker => ExitTier::Critical,
            Self::TrailingStop | Self::TimeBasedUrgent | Self::LiquidityDriedUp => ExitTier::High,
            Self::ProfitTarget | Self::PartialExitTarget => ExitTier::Medium,
            Self::EarlyExit | Self::EdgeDisappeared | Self::Rebalance => ExitTier::Low,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::CircuitBreaker => "circuit_breaker",
            Self::TrailingStop => "trailing_stop",
            Self::TimeBasedUrgent => "time_based_urgent",
            Self::LiquidityDriedUp => "liquidity_dried_up",
            Self::ProfitTarget => "profit_target",
            Self::PartialExitTarget => "partial_exit_target",
            Self::EarlyExit => "early_exit",
            Self::EdgeDisappeared => "edge_disappeared",
            Self::Rebalance => "rebalance",
        }
    }

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for ExitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ConditionSet
// =============================================================================

/// Bitset of exit conditions.
///
/// Used both for the conditions firing on a tick and for a strategy's
/// disabled-condition mask. Serialized as a list of condition names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ExitCondition>", into = "Vec<ExitCondition>")]
pub struct ConditionSet(u16);

impl ConditionSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(&self, condition: ExitCondition) -> bool {
        self.0 & condition.bit() != 0
    }

    pub fn insert(&mut self, condition: ExitCondition) {
        self.0 |= condition.bit();
    }

    #[must_use]
    pub const fn with(self, condition: ExitCondition) -> Self {
        Self(self.0 | condition.bit())
    }

    /// Removes every condition present in `other`.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Conditions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = ExitCondition> + '_ {
        ExitCondition::ALL
            .into_iter()
            .filter(move |c| self.contains(*c))
    }

    /// The condition that wins priority resolution.
    ///
    /// Declaration order is sorted by descending tier, so the first member in
    /// declaration order is both the highest tier and the earliest declared
    /// within it.
    #[must_use]
    pub fn winner(&self) -> Option<ExitCondition> {
        self.iter().next()
    }
}

impl FromIterator<ExitCondition> for ConditionSet {
    fn from_iter<I: IntoIterator<Item = ExitCondition>>(iter: I) -> Self {
        let mut set = Self::empty();
        for condition in iter {
            set.insert(condition);
        }
        set
    }
}

impl From<Vec<ExitCondition>> for ConditionSet {
    fn from(conditions: Vec<ExitCondition>) -> Self {
        conditions.into_iter().collect()
    }
}

impl From<ConditionSet> for Vec<ExitCondition> {
    fn from(set: ConditionSet) -> Self {
        set.iter().collect()
    }
}
