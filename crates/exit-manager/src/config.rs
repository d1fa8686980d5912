use crate::circuit_breaker::CircuitBreakerConfig;
use crate::executor::ExecutorConfig;
use crate::monitor::MonitorConfig;
use crate::price_cache::PriceCacheConfig;
use crate::strategy::StrategyDefinition;
use serde::{Deserialize, Serialize};

/// Engine configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitEngineConfig {
    pub monitor: MonitorConfig,
    pub cache: PriceCacheConfig,
    pub executor: ExecutorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Strategy versions loaded into the registry at startup.
    pub strategies: Vec<StrategyDefinition>,
}
