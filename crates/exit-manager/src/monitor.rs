//! Position monitor: one worker task per open position.
//!
//! The [`PositionMonitor`] actor owns the worker registry and answers
//! [`MonitorHandle`] commands. Each worker runs its own schedule:
//!
//! 1. take a [`TickPermit`](crate::gate::TickPermit) from the shared gate
//! 2. read the quote through the [`PriceCache`]
//! 3. mark the position and ratchet its trailing stop
//! 4. persist the stop and the position
//! 5. evaluate, and start an execution on a trigger
//! 6. reschedule at the normal or urgent interval
//!
//! Executions run as child tasks of the worker, so ticks keep running while a
//! limit order rests. Only the worker applies fills to its position.
//!
//! # Example
//!
//! ```ignore
//! let (monitor, handle) = PositionMonitor::new(context, CancellationToken::new());
//! tokio::spawn(monitor.run());
//!
//! handle.track(position).await?;
//! for snapshot in handle.snapshot().await? {
//!     println!("{} {:?}", snapshot.position.id, snapshot.frequency);
//! }
//! handle.shutdown().await?;
//! ```

use crate::alerts::{OperatorAlert, OperatorAlertSink};
use crate::circuit_breaker::CircuitBreaker;
use crate::conditions::{ExitCondition, ExitTier};
use crate::error::{ExitError, Result};
use crate::evaluator::{EvaluationContext, ExitEvaluator, ExitTrigger};
use crate::executor::{ExitExecution, ExitExecutor, ExitOutcome};
use crate::gate::{TickGate, TickPriority};
use crate::persistence::ExitStore;
use crate::position::Position;
use crate::price_cache::PriceCache;
use crate::strategy::{StrategyConfig, StrategyParams, StrategyRegistry};
use crate::trailing_stop::TrailingStopEngine;
use algo_trade_core::{ErrorClass, FairValueSource, Quote};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use crate::gate::Frequency;

const COMMAND_BUFFER: usize = 64;
const WORKER_COMMAND_BUFFER: usize = 8;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub normal_interval_secs: u64,
    pub urgent_interval_secs: u64,
    /// Relative distance to a threshold below which a position runs urgent.
    pub near_threshold_tolerance: Decimal,
    /// Ticks allowed to run at once across all positions.
    pub max_concurrent_ticks: usize,
    /// Delay before retrying a tick refused by the rate limiter.
    pub deferral_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            normal_interval_secs: 30,
            urgent_interval_secs: 5,
            near_threshold_tolerance: Decimal::new(2, 2),
            max_concurrent_ticks: 10,
            deferral_ms: 2_000,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub const fn interval(&self, frequency: Frequency) -> Duration {
        match frequency {
            Frequency::Normal => Duration::from_secs(self.normal_interval_secs),
            Frequency::Urgent => Duration::from_secs(self.urgent_interval_secs),
        }
    }

    #[must_use]
    pub const fn deferral(&self) -> Duration {
        Duration::from_millis(self.deferral_ms)
    }
}

/// Collaborators shared by every worker.
pub struct MonitorContext {
    pub cache: Arc<PriceCache>,
    pub trailing: TrailingStopEngine,
    pub evaluator: ExitEvaluator,
    pub executor: Arc<ExitExecutor>,
    pub breaker: Arc<CircuitBreaker>,
    pub gate: Arc<TickGate>,
    pub store: Arc<dyn ExitStore>,
    pub alerts: Arc<dyn OperatorAlertSink>,
    pub strategies: Arc<dyn StrategyRegistry>,
    pub fair_values: Arc<dyn FairValueSource>,
    pub config: MonitorConfig,
}

/// Relative distance from the bid to the nearest exit threshold: stop-loss,
/// profit target, trailing stop and the next partial stage.
#[must_use]
pub fn threshold_distance(position: &Position, params: &StrategyParams) -> Decimal {
    let entry = position.entry_price;
    let mut thresholds = vec![
        entry * (Decimal::ONE - params.stop_loss_pct),
        entry * (Decimal::ONE + params.profit_target_pct),
    ];
    let stop = position.trailing_stop();
    if stop.active() {
        thresholds.push(stop.current_stop_price());
    }
    if let Some(stage) = params.partial_exits.get(position.partial_stages_completed) {
        thresholds.push(entry * (Decimal::ONE + stage.profit_pct));
    }

    thresholds
        .into_iter()
        .filter(|threshold| *threshold > Decimal::ZERO)
        .map(|threshold| ((position.current_bid - threshold) / threshold).abs())
        .min()
        .unwrap_or(Decimal::MAX)
}

/// Point-in-time view of one tracked position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub position: Position,
    pub frequency: Frequency,
    pub threshold_distance: Decimal,
    /// Tier of the exit currently executing, if any.
    pub executing: Option<ExitTier>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Handle
// =============================================================================

enum MonitorCommand {
    Track {
        position: Box<Position>,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        position_id: String,
        reply: oneshot::Sender<Result<Position>>,
    },
    RequestRebalance {
        position_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<PositionSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable control surface of a running [`PositionMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| ExitError::MonitorStopped)?;
        rx.await.map_err(|_| ExitError::MonitorStopped)
    }

    /// Starts monitoring an open position.
    ///
    /// # Errors
    /// Returns error if the position is closed or already tracked, its
    /// strategy version is unknown, or it cannot be persisted.
    pub async fn track(&self, position: Position) -> Result<()> {
        self.request(|reply| MonitorCommand::Track {
            position: Box::new(position),
            reply,
        })
        .await?
    }

    /// Closes a position externally. Any in-flight exit is cancelled and its
    /// fills applied before the position is closed.
    ///
    /// # Errors
    /// Returns [`ExitError::PositionNotTracked`] for an unknown position.
    pub async fn close(&self, position_id: &str) -> Result<Position> {
        let position_id = position_id.to_string();
        self.request(|reply| MonitorCommand::Close { position_id, reply })
            .await?
    }

    /// Flags a position for a rebalance exit on its next tick.
    ///
    /// # Errors
    /// Returns [`ExitError::PositionNotTracked`] for an unknown position.
    pub async fn request_rebalance(&self, position_id: &str) -> Result<()> {
        let position_id = position_id.to_string();
        self.request(|reply| MonitorCommand::RequestRebalance { position_id, reply })
            .await?
    }

    /// Tracked positions ordered by id.
    ///
    /// # Errors
    /// Returns [`ExitError::MonitorStopped`] if the monitor is gone.
    pub async fn snapshot(&self) -> Result<Vec<PositionSnapshot>> {
        self.request(|reply| MonitorCommand::Snapshot { reply })
            .await
    }

    /// Stops every worker and waits for in-flight exits to resolve.
    ///
    /// # Errors
    /// Returns [`ExitError::MonitorStopped`] if the monitor is already gone.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| MonitorCommand::Shutdown { reply })
            .await
    }
}

// =============================================================================
// Monitor Actor
// =============================================================================

struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    snapshot: watch::Receiver<PositionSnapshot>,
}

impl WorkerHandle {
    fn is_live(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Owns the position workers.
pub struct PositionMonitor {
    ctx: Arc<MonitorContext>,
    rx: mpsc::Receiver<MonitorCommand>,
    workers: HashMap<String, WorkerHandle>,
    tasks: JoinSet<String>,
    token: CancellationToken,
}

impl PositionMonitor {
    /// Creates the actor and its handle. Workers run under child tokens of
    /// `token`.
    #[must_use]
    pub fn new(ctx: Arc<MonitorContext>, token: CancellationToken) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let monitor = Self {
            ctx,
            rx,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
            token,
        };
        (monitor, MonitorHandle { tx })
    }

    /// Runs until shutdown, cancellation, or every handle is dropped.
    pub async fn run(mut self) {
        info!("position monitor started");
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(MonitorCommand::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.reap(joined);
                }
                () = self.token.cancelled() => break,
            }
        }

        self.stop().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::Track { position, reply } => {
                let _ = reply.send(self.track(*position).await);
            }
            MonitorCommand::Close { position_id, reply } => {
                let Some(commands) = self.live_commands(&position_id) else {
                    let _ = reply.send(Err(ExitError::PositionNotTracked(position_id)));
                    return;
                };
                if let Err(mpsc::error::SendError(WorkerCommand::Close(reply))) =
                    commands.send(WorkerCommand::Close(reply)).await
                {
                    let _ = reply.send(Err(ExitError::PositionNotTracked(position_id)));
                }
            }
            MonitorCommand::RequestRebalance { position_id, reply } => {
                let result = match self.live_commands(&position_id) {
                    Some(commands) => commands
                        .send(WorkerCommand::RequestRebalance)
                        .await
                        .map_err(|_| ExitError::PositionNotTracked(position_id)),
                    None => Err(ExitError::PositionNotTracked(position_id)),
                };
                let _ = reply.send(result);
            }
            MonitorCommand::Snapshot { reply } => {
                let mut snapshots: Vec<_> = self
                    .workers
                    .values()
                    .filter(|worker| worker.is_live())
                    .map(|worker| worker.snapshot.borrow().clone())
                    .collect();
                snapshots.sort_by(|a, b| a.position.id.cmp(&b.position.id));
                let _ = reply.send(snapshots);
            }
            MonitorCommand::Shutdown { reply } => {
                // Handled by the run loop.
                let _ = reply.send(());
            }
        }
    }

    fn live_commands(&self, position_id: &str) -> Option<mpsc::Sender<WorkerCommand>> {
        self.workers
            .get(position_id)
            .filter(|worker| worker.is_live())
            .map(|worker| worker.commands.clone())
    }

    async fn track(&mut self, position: Position) -> Result<()> {
        if !position.is_open() {
            return Err(ExitError::validation(format!(
                "position {} is closed",
                position.id
            )));
        }
        if self
            .workers
            .get(&position.id)
            .is_some_and(WorkerHandle::is_live)
        {
            return Err(ExitError::validation(format!(
                "position {} is already tracked",
                position.id
            )));
        }

        let strategy = self.ctx.strategies.resolve(&position.strategy)?;
        self.ctx.store.save_position(&position).await?;
        self.ctx
            .store
            .save_trailing_stop_state(&position.id, position.trailing_stop())
            .await?;

        info!(
            position_id = %position.id,
            market_id = %position.market_id,
            side = %position.side,
            strategy = %position.strategy,
            quantity = position.quantity,
            entry_price = %position.entry_price,
            "tracking position"
        );

        let id = position.id.clone();
        let (worker, handle) = PositionWorker::new(
            Arc::clone(&self.ctx),
            position,
            strategy,
            self.token.child_token(),
        );
        self.tasks.spawn(worker.run());
        self.workers.insert(id, handle);
        Ok(())
    }

    fn reap(&mut self, joined: std::result::Result<String, JoinError>) {
        match joined {
            Ok(position_id) => {
                if self
                    .workers
                    .get(&position_id)
                    .is_some_and(|worker| !worker.is_live())
                {
                    self.workers.remove(&position_id);
                }
                debug!(position_id = %position_id, "position worker finished");
            }
            Err(e) => {
                error!(error = %e, "position worker failed");
                self.workers.retain(|_, worker| worker.is_live());
            }
        }
    }

    async fn stop(&mut self) {
        self.token.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            self.reap(joined);
        }
        self.workers.clear();
        info!("position monitor stopped");
    }
}

// =============================================================================
// Position Worker
// =============================================================================

enum WorkerCommand {
    Close(oneshot::Sender<Result<Position>>),
    RequestRebalance,
}

struct InFlight {
    tier: ExitTier,
    condition: ExitCondition,
    token: CancellationToken,
    handle: JoinHandle<ExitExecution>,
}

async fn join_in_flight(
    in_flight: &mut Option<InFlight>,
) -> std::result::Result<ExitExecution, JoinError> {
    match in_flight {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}

struct PositionWorker {
    ctx: Arc<MonitorContext>,
    position: Position,
    strategy: Arc<StrategyConfig>,
    commands: mpsc::Receiver<WorkerCommand>,
    snapshot: watch::Sender<PositionSnapshot>,
    token: CancellationToken,
    frequency: Frequency,
    distance: Decimal,
    in_flight: Option<InFlight>,
    last_tick_at: Option<DateTime<Utc>>,
}

impl PositionWorker {
    fn new(
        ctx: Arc<MonitorContext>,
        position: Position,
        strategy: Arc<StrategyConfig>,
        token: CancellationToken,
    ) -> (Self, WorkerHandle) {
        let (command_tx, command_rx) = mpsc::channel(WORKER_COMMAND_BUFFER);
        // Unpriced until the first quote arrives; rank it as urgent as possible.
        let distance = Decimal::ZERO;
        let (snapshot_tx, snapshot_rx) = watch::channel(PositionSnapshot {
            position: position.clone(),
            frequency: Frequency::Urgent,
            threshold_distance: distance,
            executing: None,
            last_tick_at: None,
        });

        let worker = Self {
            ctx,
            position,
            strategy,
            commands: command_rx,
            snapshot: snapshot_tx,
            token,
            frequency: Frequency::Urgent,
            distance,
            in_flight: None,
            last_tick_at: None,
        };
        let handle = WorkerHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };
        (worker, handle)
    }

    async fn run(mut self) -> String {
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                biased;

                () = self.token.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Close(reply)) => {
                        self.close_externally().await;
                        let _ = reply.send(Ok(self.position.clone()));
                        break;
                    }
                    Some(WorkerCommand::RequestRebalance) => {
                        info!(position_id = %self.position.id, "rebalance requested");
                        self.position.rebalance_requested = true;
                        self.persist().await;
                        next_tick = Instant::now();
                    }
                    None => break,
                },
                joined = join_in_flight(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.finish_execution(joined).await;
                    if !self.position.is_open() {
                        break;
                    }
                    self.refresh_frequency();
                    self.publish();
                    next_tick = self.next_tick();
                }
                () = sleep_until(next_tick) => {
                    next_tick = self.tick(next_tick).await;
                    if !self.position.is_open() {
                        break;
                    }
                }
            }
        }

        if let Some(in_flight) = self.in_flight.take() {
            in_flight.token.cancel();
            let joined = in_flight.handle.await;
            self.finish_execution(joined).await;
        }
        self.publish();
        self.position.id.clone()
    }

    /// One monitoring pass. Returns when the next one is due.
    async fn tick(&mut self, due: Instant) -> Instant {
        let priority = TickPriority {
            frequency: self.frequency,
            distance: self.distance,
            due,
        };
        let _permit = tokio::select! {
            permit = self.ctx.gate.acquire(priority) => permit,
            () = self.token.cancelled() => return Instant::now(),
        };

        // The permit is held across deferrals so queued workers keep their
        // order instead of racing for the next token.
        let quote = loop {
            match self.ctx.cache.get(&self.position.market_id).await {
                Ok(quote) => break quote,
                Err(e) if e.class() == ErrorClass::ResourceExhausted => {
                    info!(
                        position_id = %self.position.id,
                        market_id = %self.position.market_id,
                        error = %e,
                        "tick deferred by rate limit"
                    );
                    tokio::select! {
                        () = sleep(self.ctx.config.deferral()) => {}
                        () = self.token.cancelled() => return Instant::now(),
                    }
                }
                Err(e) => {
                    warn!(
                        position_id = %self.position.id,
                        market_id = %self.position.market_id,
                        class = ?e.class(),
                        error = %e,
                        "quote fetch failed, retrying next tick"
                    );
                    return self.next_tick();
                }
            }
        };

        let now = Utc::now();
        self.last_tick_at = Some(now);
        let mut retick = false;
        match self.observe(&quote, now).await {
            Ok(Some(trigger)) => retick = self.dispatch(trigger).await,
            Ok(None) => {}
            Err(e) => self.report(&e),
        }

        self.refresh_frequency();
        self.publish();
        if retick {
            Instant::now()
        } else {
            self.next_tick()
        }
    }

    /// Marks, ratchets, persists and evaluates.
    async fn observe(&mut self, quote: &Quote, now: DateTime<Utc>) -> Result<Option<ExitTrigger>> {
        let before = self.position.clone();
        self.position.mark(quote);
        let stop = self
            .ctx
            .trailing
            .update(&self.position, self.position.current_bid)?;
        if stop != *self.position.trailing_stop() {
            debug!(
                position_id = %self.position.id,
                peak = %stop.peak_price(),
                stop = %stop.current_stop_price(),
                "trailing stop raised"
            );
        }
        self.position.set_trailing_stop(stop);
        // A tick that moved neither the book nor the stop is not written.
        let changed = self.position != before;
        self.position.touch_evaluated(now);
        if changed {
            self.persist().await;
        }

        let context = EvaluationContext::at(now)
            .with_fair_value(
                self.ctx
                    .fair_values
                    .fair_value(&self.position.market_id, self.position.side),
            )
            .with_circuit_breaker(self.ctx.breaker.is_tripped(now));

        self.ctx.evaluator.evaluate(
            &self.position,
            quote,
            self.position.trailing_stop(),
            &self.strategy,
            &context,
        )
    }

    /// Starts or pre-empts an execution. Returns true when the position must
    /// be re-evaluated right away.
    async fn dispatch(&mut self, trigger: ExitTrigger) -> bool {
        let Some((tier, condition)) = self.in_flight.as_ref().map(|f| (f.tier, f.condition))
        else {
            self.start_execution(trigger);
            return false;
        };

        if trigger.tier <= tier {
            debug!(
                position_id = %self.position.id,
                condition = trigger.condition.as_str(),
                in_flight = condition.as_str(),
                "trigger ignored while an exit is in flight"
            );
            return false;
        }

        info!(
            position_id = %self.position.id,
            condition = trigger.condition.as_str(),
            tier = trigger.tier.as_str(),
            preempted = condition.as_str(),
            "pre-empting in-flight exit"
        );
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.token.cancel();
            let joined = in_flight.handle.await;
            self.finish_execution(joined).await;
        }
        true
    }

    fn start_execution(&mut self, trigger: ExitTrigger) {
        let token = self.token.child_token();
        let tier = trigger.tier;
        let condition = trigger.condition;

        let executor = Arc::clone(&self.ctx.executor);
        let position = self.position.clone();
        let strategy = Arc::clone(&self.strategy);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            executor
                .execute(&position, &trigger, &strategy, task_token)
                .await
        });

        self.in_flight = Some(InFlight {
            tier,
            condition,
            token,
            handle,
        });
    }

    /// Applies an execution's fills to the position.
    async fn finish_execution(&mut self, joined: std::result::Result<ExitExecution, JoinError>) {
        let now = Utc::now();
        let execution = match joined {
            Ok(execution) => execution,
            Err(e) => {
                error!(position_id = %self.position.id, error = %e, "exit execution task failed");
                self.ctx.breaker.record_failure(now);
                return;
            }
        };
        let trigger = &execution.trigger;

        if execution.filled_quantity > 0 {
            let price = execution.avg_fill_price.unwrap_or(trigger.bid);
            match self.position.apply_fill(execution.filled_quantity, price) {
                Ok(realized) => self.ctx.breaker.record_success(realized, now),
                Err(e) => self.report(&e),
            }
            if let Some(stage) = trigger.partial_stage {
                self.position.partial_stages_completed =
                    self.position.partial_stages_completed.max(stage + 1);
            }
            if trigger.condition == ExitCondition::Rebalance {
                self.position.rebalance_requested = false;
            }
        } else if execution.outcome == ExitOutcome::Failed {
            self.ctx.breaker.record_failure(now);
        }
        self.persist().await;

        if !self.position.is_open() {
            info!(
                position_id = %self.position.id,
                market_id = %self.position.market_id,
                condition = trigger.condition.as_str(),
                realized_pnl = %self.position.realized_pnl,
                "position closed"
            );
        }
    }

    async fn close_externally(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.token.cancel();
            let joined = in_flight.handle.await;
            self.finish_execution(joined).await;
        }
        if self.position.is_open() {
            self.position.close();
            self.persist().await;
            info!(
                position_id = %self.position.id,
                market_id = %self.position.market_id,
                quantity = self.position.quantity,
                "position closed externally"
            );
        }
        self.publish();
    }

    fn report(&self, e: &ExitError) {
        if e.is_invariant_violation() {
            error!(
                position_id = %self.position.id,
                market_id = %self.position.market_id,
                error = %e,
                "invariant violation, tick aborted"
            );
            self.ctx.alerts.raise(OperatorAlert::invariant_violation(
                &self.position.id,
                &self.position.market_id,
                e.to_string(),
            ));
        } else {
            warn!(
                position_id = %self.position.id,
                class = ?e.class(),
                error = %e,
                "tick failed"
            );
        }
    }

    async fn persist(&self) {
        let store = &self.ctx.store;
        if let Err(e) = store.save_position(&self.position).await {
            warn!(position_id = %self.position.id, error = %e, "failed to persist position");
        }
        if let Err(e) = store
            .save_trailing_stop_state(&self.position.id, self.position.trailing_stop())
            .await
        {
            warn!(position_id = %self.position.id, error = %e, "failed to persist trailing stop");
        }
    }

    fn refresh_frequency(&mut self) {
        if self.last_tick_at.is_none() {
            return;
        }
        self.distance = threshold_distance(&self.position, self.strategy.params());
        let near = self.distance <= self.ctx.config.near_threshold_tolerance;
        let frequency = if near || self.in_flight.is_some() {
            Frequency::Urgent
        } else {
            Frequency::Normal
        };
        if frequency != self.frequency {
            debug!(
                position_id = %self.position.id,
                frequency = ?frequency,
                distance = %self.distance,
                "monitor frequency changed"
            );
        }
        self.frequency = frequency;
    }

    fn next_tick(&self) -> Instant {
        Instant::now() + self.ctx.config.interval(self.frequency)
    }

    fn publish(&self) {
        self.snapshot.send_replace(PositionSnapshot {
            position: self.position.clone(),
            frequency: self.frequency,
            threshold_distance: self.distance,
            executing: self.in_flight.as_ref().map(|f| f.tier),
            last_tick_at: self.last_tick_at,
        });
    }
}
