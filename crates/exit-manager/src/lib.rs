//! Exit management for binary prediction-market positions.
//!
//! Runs as a long-lived engine that:
//! - Watches every open position on its own schedule, faster near a threshold
//! - Ratchets a trailing stop that only ever moves up
//! - Checks ten exit conditions each tick and picks one by tier
//! - Executes exits with tiered limit orders that walk the price and, for
//!   HIGH urgency, fall back to a market order
//! - Records every order attempt for audit and crash-restart resume
//!
//! All quotes and orders go through one [`MarketGateway`](algo_trade_core::MarketGateway)
//! whose rate limiter is shared with the rest of the process.
//!
//! # Example
//!
//! ```ignore
//! use algo_trade_exits::{ExitEngine, Position, StrategyKey};
//!
//! let engine = ExitEngine::builder(gateway).with_config(config).build()?;
//! let handle = engine.start();
//!
//! let strategy = engine.strategies().active("momentum")?;
//! let position = Position::open("pos-1", "KXBTC-26FEB02-B100000", Side::Yes, &strategy, 10, dec!(0.50))?;
//! handle.track(position).await?;
//! ```

pub mod alerts;
pub mod circuit_breaker;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod fair_value;
pub mod gate;
pub mod monitor;
pub mod persistence;
pub mod position;
pub mod price_cache;
pub mod strategy;
pub mod trailing_stop;

pub use alerts::{AlertKind, ChannelAlertSink, OperatorAlert, OperatorAlertSink, TracingAlertSink};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, TripReason};
pub use conditions::{ConditionSet, ExitCondition, ExitTier};
pub use config::ExitEngineConfig;
pub use engine::{EngineHandle, ExitEngine, ExitEngineBuilder};
pub use error::{ExitError, Result};
pub use evaluator::{EvaluationContext, ExitEvaluator, ExitTrigger};
pub use executor::{
    AttemptStatus, ExecutorConfig, ExitAttempt, ExitExecution, ExitExecutor, ExitOutcome,
};
pub use fair_value::FairValueBoard;
pub use gate::{Frequency, TickGate, TickPermit, TickPriority};
pub use monitor::{MonitorConfig, MonitorContext, MonitorHandle, PositionMonitor, PositionSnapshot};
pub use persistence::{ExitStore, InMemoryExitStore, JsonFileExitStore};
pub use position::{Position, PositionStatus};
pub use price_cache::{CacheStats, PriceCache, PriceCacheConfig};
pub use strategy::{
    InMemoryStrategyRegistry, PartialExitStage, StrategyConfig, StrategyDefinition, StrategyKey,
    StrategyParams, StrategyRegistry, TierExecution,
};
pub use trailing_stop::{TrailingStopEngine, TrailingStopRecord, TrailingStopState};
