//! Engine assembly and lifecycle.
//!
//! One [`ExitEngine`] owns every shared collaborator: price cache, executor,
//! circuit breaker, tick gate, store, alert sink, strategy registry and
//! fair-value source. [`ExitEngine::start`] spawns the position monitor and
//! returns the [`EngineHandle`] used to feed and stop it.
//!
//! # Example
//!
//! ```ignore
//! let engine = ExitEngine::builder(Arc::new(kalshi_client))
//!     .with_config(config.engine)
//!     .with_store(Arc::new(JsonFileExitStore::open("data/exits.json").await?))
//!     .build()?;
//!
//! let handle = engine.start();
//! handle.resume().await?;
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await?;
//! ```

use crate::alerts::{OperatorAlertSink, TracingAlertSink};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::ExitEngineConfig;
use crate::error::{ExitError, Result};
use crate::evaluator::ExitEvaluator;
use crate::executor::ExitExecutor;
use crate::gate::{Frequency, TickGate};
use crate::monitor::{MonitorContext, MonitorHandle, PositionMonitor};
use crate::persistence::{ExitStore, InMemoryExitStore};
use crate::position::Position;
use crate::price_cache::PriceCache;
use crate::strategy::{InMemoryStrategyRegistry, StrategyRegistry};
use crate::trailing_stop::TrailingStopEngine;
use algo_trade_core::{FairValueSource, MarketGateway, NoFairValue};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Builder for [`ExitEngine`].
pub struct ExitEngineBuilder {
    gateway: Arc<dyn MarketGateway>,
    config: ExitEngineConfig,
    store: Option<Arc<dyn ExitStore>>,
    alerts: Option<Arc<dyn OperatorAlertSink>>,
    strategies: Option<Arc<dyn StrategyRegistry>>,
    fair_values: Option<Arc<dyn FairValueSource>>,
}

impl ExitEngineBuilder {
    #[must_use]
    pub fn with_config(mut self, config: ExitEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `store` instead of an in-memory store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ExitStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_alert_sink(mut self, alerts: Arc<dyn OperatorAlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Uses `strategies` instead of a registry built from the config's
    /// strategy list.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Arc<dyn StrategyRegistry>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    #[must_use]
    pub fn with_fair_values(mut self, fair_values: Arc<dyn FairValueSource>) -> Self {
        self.fair_values = Some(fair_values);
        self
    }

    /// Assembles the engine.
    ///
    /// # Errors
    /// Returns a configuration error if a configured strategy is invalid.
    pub fn build(self) -> Result<ExitEngine> {
        let Self {
            gateway,
            config,
            store,
            alerts,
            strategies,
            fair_values,
        } = self;

        let strategies: Arc<dyn StrategyRegistry> = match strategies {
            Some(strategies) => strategies,
            None => Arc::new(InMemoryStrategyRegistry::from_definitions(
                &config.strategies,
            )?),
        };
        let store: Arc<dyn ExitStore> = match store {
            Some(store) => store,
            None => Arc::new(InMemoryExitStore::new()),
        };
        let alerts: Arc<dyn OperatorAlertSink> = match alerts {
            Some(alerts) => alerts,
            None => Arc::new(TracingAlertSink),
        };
        let fair_values: Arc<dyn FairValueSource> = match fair_values {
            Some(fair_values) => fair_values,
            None => Arc::new(NoFairValue),
        };

        let context = MonitorContext {
            cache: Arc::new(PriceCache::new(Arc::clone(&gateway), &config.cache)),
            trailing: TrailingStopEngine::new(),
            evaluator: ExitEvaluator::new(),
            executor: Arc::new(ExitExecutor::new(
                gateway,
                Arc::clone(&store),
                config.executor.clone(),
            )),
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            gate: Arc::new(TickGate::new(
                config.monitor.max_concurrent_ticks,
                config.monitor.interval(Frequency::Normal),
            )),
            store,
            alerts,
            strategies,
            fair_values,
            config: config.monitor.clone(),
        };

        Ok(ExitEngine {
            context: Arc::new(context),
        })
    }
}

/// The assembled exit engine.
pub struct ExitEngine {
    context: Arc<MonitorContext>,
}

impl std::fmt::Debug for ExitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitEngine")
            .field("monitor", &self.context.config)
            .field("cache", &self.context.cache)
            .field("gate", &self.context.gate)
            .finish_non_exhaustive()
    }
}

impl ExitEngine {
    pub fn builder(gateway: Arc<dyn MarketGateway>) -> ExitEngineBuilder {
        ExitEngineBuilder {
            gateway,
            config: ExitEngineConfig::default(),
            store: None,
            alerts: None,
            strategies: None,
            fair_values: None,
        }
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.context.breaker
    }

    #[must_use]
    pub fn price_cache(&self) -> &Arc<PriceCache> {
        &self.context.cache
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ExitStore> {
        &self.context.store
    }

    #[must_use]
    pub fn strategies(&self) -> &Arc<dyn StrategyRegistry> {
        &self.context.strategies
    }

    /// Spawns the position monitor. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(&self) -> EngineHandle {
        let token = CancellationToken::new();
        let (monitor, handle) = PositionMonitor::new(Arc::clone(&self.context), token.clone());
        let task = tokio::spawn(monitor.run());
        info!(
            max_concurrent_ticks = self.context.gate.capacity(),
            "exit engine started"
        );

        EngineHandle {
            monitor: handle,
            store: Arc::clone(&self.context.store),
            token,
            task,
        }
    }
}

/// Handle to a running engine.
pub struct EngineHandle {
    monitor: MonitorHandle,
    store: Arc<dyn ExitStore>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl EngineHandle {
    #[must_use]
    pub const fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    /// Starts monitoring a newly opened position.
    ///
    /// # Errors
    /// See [`MonitorHandle::track`].
    pub async fn track(&self, position: Position) -> Result<()> {
        self.monitor.track(position).await
    }

    /// Re-tracks every open position in the store. Returns how many were
    /// resumed. Positions that cannot be tracked are logged and skipped.
    ///
    /// # Errors
    /// Returns error if the store cannot be read or the monitor is gone.
    pub async fn resume(&self) -> Result<usize> {
        let positions = self.store.load_open_positions().await?;
        let total = positions.len();
        let mut resumed = 0;

        for position in positions {
            let position_id = position.id.clone();
            match self.monitor.track(position).await {
                Ok(()) => resumed += 1,
                Err(ExitError::MonitorStopped) => return Err(ExitError::MonitorStopped),
                Err(e) => warn!(position_id = %position_id, error = %e, "could not resume position"),
            }
        }

        info!(resumed, total, "resumed open positions");
        Ok(resumed)
    }

    /// Cancels every worker, waits for in-flight exits, and joins the
    /// monitor.
    ///
    /// # Errors
    /// Returns error if the monitor task panicked.
    pub async fn shutdown(self) -> Result<()> {
        info!("exit engine shutting down");
        if self.monitor.shutdown().await.is_err() {
            self.token.cancel();
        }
        self.task
            .await
            .map_err(|e| ExitError::invariant(format!("monitor task failed: {e}")))?;
        info!("exit engine stopped");
        Ok(())
    }
}
