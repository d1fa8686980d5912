//! Versioned strategy parameters.
//!
//! A [`StrategyConfig`] is a frozen value keyed by `(name, version)`. Once
//! registered it is shared by `Arc` and has no setters, so a position opened
//! under version N keeps seeing version N's parameters for its whole life even
//! after a newer version becomes active.

use crate::conditions::{ConditionSet, ExitTier};
use crate::error::{ExitError, Result};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Keys and Parameters
// =============================================================================

/// Identifies one frozen version of a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyKey {
    pub name: String,
    pub version: u32,
}

impl StrategyKey {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// One step of the partial-exit schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialExitStage {
    /// Profit fraction at which the stage fires (0.15 = +15%).
    pub profit_pct: Decimal,
    /// Fraction of the initial quantity to sell.
    pub fraction: Decimal,
}

/// Order placement limits for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierExecution {
    /// How long each attempt rests before it is cancelled.
    pub timeout_ms: u64,
    /// Price walks after the first attempt.
    pub max_walks: u32,
}

impl TierExecution {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Numeric parameters consumed by the trailing stop, evaluator and executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    /// Trailing distance as a fraction of the peak (0.10 = 10%).
    pub trailing_stop_distance: Decimal,
    /// Loss fraction of entry that forces a full exit.
    pub stop_loss_pct: Decimal,
    /// Gain fraction of entry that takes full profit.
    pub profit_target_pct: Decimal,
    pub partial_exits: Vec<PartialExitStage>,
    pub critical: TierExecution,
    pub high: TierExecution,
    pub medium: TierExecution,
    pub low: TierExecution,
    /// Widest tolerable bid/ask spread.
    pub max_spread: Decimal,
    /// Lowest tolerable traded volume.
    pub min_volume: Decimal,
    /// Seconds before market close at which the position is exited.
    pub urgent_before_close_secs: i64,
    /// Negative edge that triggers an early exit.
    pub early_exit_edge: Decimal,
    /// Edge below which the position no longer has a reason to exist.
    pub edge_floor: Decimal,
    pub disabled_conditions: ConditionSet,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            trailing_stop_distance: Decimal::new(10, 2),
            stop_loss_pct: Decimal::new(30, 2),
            profit_target_pct: Decimal::new(50, 2),
            partial_exits: vec![
                PartialExitStage {
                    profit_pct: Decimal::new(15, 2),
                    fraction: Decimal::new(50, 2),
                },
                PartialExitStage {
                    profit_pct: Decimal::new(25, 2),
                    fraction: Decimal::new(25, 2),
                },
            ],
            critical: TierExecution {
                timeout_ms: 5_000,
                max_walks: 0,
            },
            high: TierExecution {
                timeout_ms: 10_000,
                max_walks: 2,
            },
            medium: TierExecution {
                timeout_ms: 30_000,
                max_walks: 5,
            },
            low: TierExecution {
                timeout_ms: 60_000,
                max_walks: 10,
            },
            max_spread: Decimal::new(15, 2),
            min_volume: Decimal::TEN,
            urgent_before_close_secs: 600,
            early_exit_edge: Decimal::new(5, 2),
            edge_floor: Decimal::new(1, 2),
            disabled_conditions: ConditionSet::empty(),
        }
    }
}

impl StrategyParams {
    /// Placement limits for `tier`.
    #[must_use]
    pub const fn tier_execution(&self, tier: ExitTier) -> TierExecution {
        match tier {
            ExitTier::Critical => self.critical,
            ExitTier::High => self.high,
            ExitTier::Medium => self.medium,
            ExitTier::Low => self.low,
        }
    }

    /// Contracts sold by partial stage `stage`, capped at `remaining`.
    #[must_use]
    pub fn partial_quantity(&self, stage: usize, initial: u32, remaining: u32) -> u32 {
        self.partial_exits.get(stage).map_or(0, |s| {
            (Decimal::from(initial) * s.fraction)
                .floor()
                .to_u32()
                .unwrap_or(0)
                .min(remaining)
        })
    }

    /// Validates every parameter.
    ///
    /// # Errors
    /// Returns a configuration error naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let fraction = |value: Decimal, field: &str| {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                Err(ExitError::configuration(format!(
                    "{field} must be in (0, 1), got {value}"
                )))
            } else {
                Ok(())
            }
        };

        fraction(self.trailing_stop_distance, "trailing_stop_distance")?;
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct > Decimal::ONE {
            return Err(ExitError::configuration(format!(
                "stop_loss_pct must be in (0, 1], got {}",
                self.stop_loss_pct
            )));
        }
        if self.profit_target_pct <= Decimal::ZERO {
            return Err(ExitError::configuration(format!(
                "profit_target_pct must be positive, got {}",
                self.profit_target_pct
            )));
        }

        let mut previous = Decimal::ZERO;
        let mut total = Decimal::ZERO;
        for (i, stage) in self.partial_exits.iter().enumerate() {
            if stage.profit_pct <= previous {
                return Err(ExitError::configuration(format!(
                    "partial_exits[{i}].profit_pct must be positive and ascending"
                )));
            }
            if stage.fraction <= Decimal::ZERO || stage.fraction > Decimal::ONE {
                return Err(ExitError::configuration(format!(
                    "partial_exits[{i}].fraction must be in (0, 1]"
                )));
            }
            previous = stage.profit_pct;
            total += stage.fraction;
        }
        if total > Decimal::ONE {
            return Err(ExitError::configuration(format!(
                "partial exit fractions sum to {total}, more than the whole position"
            )));
        }

        for (tier, exec) in [
            (ExitTier::Critical, self.critical),
            (ExitTier::High, self.high),
            (ExitTier::Medium, self.medium),
            (ExitTier::Low, self.low),
        ] {
            if exec.timeout_ms == 0 {
                return Err(ExitError::configuration(format!(
                    "{tier} timeout must be positive"
                )));
            }
        }

        if self.max_spread <= Decimal::ZERO || self.max_spread > Decimal::ONE {
            return Err(ExitError::configuration(format!(
                "max_spread must be in (0, 1], got {}",
                self.max_spread
            )));
        }
        if self.min_volume < Decimal::ZERO {
            return Err(ExitError::configuration("min_volume cannot be negative"));
        }
        if self.urgent_before_close_secs < 0 {
            return Err(ExitError::configuration(
                "urgent_before_close_secs cannot be negative",
            ));
        }
        if self.early_exit_edge < Decimal::ZERO || self.edge_floor < Decimal::ZERO {
            return Err(ExitError::configuration("edge thresholds cannot be negative"));
        }
        Ok(())
    }
}

// =============================================================================
// StrategyConfig
// =============================================================================

/// A validated, immutable strategy version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyConfig {
    key: StrategyKey,
    params: StrategyParams,
}

impl StrategyConfig {
    /// Validates and freezes `params` under `key`.
    ///
    /// # Errors
    /// Returns a configuration error if any parameter is out of range.
    pub fn new(key: StrategyKey, params: StrategyParams) -> Result<Self> {
        if key.name.trim().is_empty() {
            return Err(ExitError::configuration("strategy name cannot be empty"));
        }
        params.validate()?;
        Ok(Self { key, params })
    }

    #[must_use]
    pub fn key(&self) -> &StrategyKey {
        &self.key
    }

    #[must_use]
    pub fn params(&self) -> &StrategyParams {
        &self.params
    }
}

/// Strategy version as it appears in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    pub version: u32,
    /// Marks this version as the one new positions open under.
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub params: StrategyParams,
}

// =============================================================================
// Registry
// =============================================================================

/// Read-only lookup of strategy versions.
pub trait StrategyRegistry: Send + Sync {
    /// Returns the exact version named by `key`.
    ///
    /// # Errors
    /// Returns [`ExitError::StrategyNotFound`] for an unknown key.
    fn resolve(&self, key: &StrategyKey) -> Result<Arc<StrategyConfig>>;

    /// Returns the active version of strategy `name`.
    ///
    /// # Errors
    /// Returns [`ExitError::StrategyNotFound`] if no version is active.
    fn active(&self, name: &str) -> Result<Arc<StrategyConfig>>;
}

#[derive(Debug, Default)]
struct RegistryInner {
    versions: HashMap<StrategyKey, Arc<StrategyConfig>>,
    active: HashMap<String, u32>,
}

/// In-process strategy registry loaded from configuration.
#[derive(Debug, Default)]
pub struct InMemoryStrategyRegistry {
    inner: RwLock<RegistryInner>,
}

impl InMemoryStrategyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configuration entries.
    ///
    /// # Errors
    /// Returns error if any entry is invalid or conflicts with another.
    pub fn from_definitions(definitions: &[StrategyDefinition]) -> Result<Self> {
        let registry = Self::new();
        for def in definitions {
            let key = StrategyKey::new(&def.name, def.version);
            registry.register(StrategyConfig::new(key.clone(), def.params.clone())?)?;
            if def.active {
                registry.set_active(&key)?;
            }
        }
        Ok(registry)
    }

    /// Registers a version. Re-registering identical parameters is a no-op.
    ///
    /// # Errors
    /// Returns error if the key already holds different parameters.
    pub fn register(&self, config: StrategyConfig) -> Result<Arc<StrategyConfig>> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.versions.get(config.key()) {
            if **existing == config {
                return Ok(Arc::clone(existing));
            }
            return Err(ExitError::configuration(format!(
                "strategy {} is already registered with different parameters",
                config.key()
            )));
        }
        let config = Arc::new(config);
        inner
            .versions
            .insert(config.key().clone(), Arc::clone(&config));
        Ok(config)
    }

    /// Marks `key` as the active version of its strategy.
    ///
    /// # Errors
    /// Returns error if the version is not registered.
    pub fn set_active(&self, key: &StrategyKey) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.versions.contains_key(key) {
            return Err(ExitError::StrategyNotFound(key.to_string()));
        }
        inner.active.insert(key.name.clone(), key.version);
        Ok(())
    }
}

impl StrategyRegistry for InMemoryStrategyRegistry {
    fn resolve(&self, key: &StrategyKey) -> Result<Arc<StrategyConfig>> {
        self.inner
            .read()
            .versions
            .get(key)
            .cloned()
            .ok_or_else(|| ExitError::StrategyNotFound(key.to_string()))
    }

    fn active(&self, name: &str) -> Result<Arc<StrategyConfig>> {
        let inner = self.inner.read();
        inner
            .active
            .get(name)
            .and_then(|version| inner.versions.get(&StrategyKey::new(name, *version)))
            .cloned()
            .ok_or_else(|| ExitError::StrategyNotFound(format!("{name} (no active version)")))
    }
}
