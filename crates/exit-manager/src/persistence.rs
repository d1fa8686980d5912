//! Persistence of positions, trailing stops and the exit audit trail.
//!
//! Every write is idempotent by key: positions and stops upsert by position
//! id, and exit attempts insert only when their id is new. A crash between
//! writes therefore never duplicates audit records on resume.
//!
//! Only open positions are kept in the live state. Saving a closed position
//! removes it and its stop, while its attempts stay in the audit trail.

use crate::error::Result;
use crate::executor::ExitAttempt;
use crate::position::Position;
use crate::trailing_stop::TrailingStopState;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Storage used by the exit engine.
#[async_trait]
pub trait ExitStore: Send + Sync {
    /// Upserts a position by id. A closed position leaves the live state.
    async fn save_position(&self, position: &Position) -> Result<()>;

    /// Upserts the trailing stop of a live position.
    async fn save_trailing_stop_state(
        &self,
        position_id: &str,
        state: &TrailingStopState,
    ) -> Result<()>;

    /// Inserts an attempt. Returns false if its id was already recorded.
    async fn append_exit_attempt(&self, attempt: &ExitAttempt) -> Result<bool>;

    /// Open positions, oldest first, with their latest trailing stops.
    async fn load_open_positions(&self) -> Result<Vec<Position>>;

    /// Every attempt recorded for a position, in insertion order.
    async fn exit_attempts(&self, position_id: &str) -> Result<Vec<ExitAttempt>>;
}

// =============================================================================
// Shared State
// =============================================================================

/// Audit trail of exit attempts, indexed by id.
#[derive(Debug, Default, Clone)]
struct AttemptLog {
    attempts: Vec<ExitAttempt>,
    ids: HashSet<String>,
}

impl AttemptLog {
    fn insert(&mut self, attempt: &ExitAttempt) -> bool {
        if !self.ids.insert(attempt.id.clone()) {
            return false;
        }
        self.attempts.push(attempt.clone());
        true
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn for_position(&self, position_id: &str) -> Vec<ExitAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.position_id == position_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    positions: BTreeMap<String, Position>,
    trailing_stops: BTreeMap<String, TrailingStopState>,
    #[serde(skip)]
    attempts: AttemptLog,
}

impl StoreState {
    /// Returns true when the live state changed.
    fn upsert_position(&mut self, position: &Position) -> bool {
        if !position.is_open() {
            self.trailing_stops.remove(&position.id);
            return self.positions.remove(&position.id).is_some();
        }
        if self.positions.get(&position.id) == Some(position) {
            return false;
        }
        self.positions.insert(position.id.clone(), position.clone());
        true
    }

    /// Returns true when the live state changed. Stops for positions that
    /// are closed or were never saved are ignored.
    fn upsert_trailing_stop(&mut self, position_id: &str, state: &TrailingStopState) -> bool {
        if !self.positions.contains_key(position_id) {
            return false;
        }
        if self.trailing_stops.get(position_id) == Some(state) {
            return false;
        }
        self.trailing_stops.insert(position_id.to_string(), *state);
        true
    }

    fn open_positions(&self) -> Vec<Position> {
        let mut open: Vec<Position> = self
            .positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .map(|mut p| {
                // Take whichever stop has ratcheted further.
                if let Some(saved) = self.trailing_stops.get(&p.id) {
                    if saved.peak_price() > p.trailing_stop().peak_price() {
                        p.set_trailing_stop(*saved);
                    }
                }
                p
            })
            .collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));
        open
    }
}

// =============================================================================
// InMemoryExitStore
// =============================================================================

/// Store for tests and deployments that do not need restart recovery.
#[derive(Debug, Default)]
pub struct InMemoryExitStore {
    state: Mutex<StoreState>,
}

impl InMemoryExitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExitStore for InMemoryExitStore {
    async fn save_position(&self, position: &Position) -> Result<()> {
        self.state.lock().upsert_position(position);
        Ok(())
    }

    async fn save_trailing_stop_state(
        &self,
        position_id: &str,
        state: &TrailingStopState,
    ) -> Result<()> {
        self.state.lock().upsert_trailing_stop(position_id, state);
        Ok(())
    }

    async fn append_exit_attempt(&self, attempt: &ExitAttempt) -> Result<bool> {
        Ok(self.state.lock().attempts.insert(attempt))
    }

    async fn load_open_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().open_positions())
    }

    async fn exit_attempts(&self, position_id: &str) -> Result<Vec<ExitAttempt>> {
        Ok(self.state.lock().attempts.for_position(position_id))
    }
}

// =============================================================================
// JsonFileExitStore
// =============================================================================

/// Store backed by a JSON snapshot of live positions plus a JSON-lines
/// attempt log next to it (`exits.json` and `exits.attempts.jsonl`).
///
/// Snapshot writes go to a sibling temp file that is then renamed over the
/// target, so a crash mid-write leaves the previous contents intact. The
/// snapshot is only rewritten when it actually changes. Attempts are
/// appended one per line; a torn final line is skipped on load. Trailing
/// stops are validated when the snapshot is loaded.
#[derive(Debug)]
pub struct JsonFileExitStore {
    path: PathBuf,
    attempts_path: PathBuf,
    state: tokio::sync::Mutex<StoreState>,
}

impl JsonFileExitStore {
    /// Opens the store at `path`, loading existing contents if present.
    ///
    /// # Errors
    /// Returns error if the snapshot exists but cannot be read or parsed, or
    /// the attempt log cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let attempts_path = path.with_extension("attempts.jsonl");
        let mut state: StoreState = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        state.attempts = Self::read_attempts(&attempts_path).await?;
        debug!(
            path = %path.display(),
            positions = state.positions.len(),
            attempts = state.attempts.attempts.len(),
            "exit store opened"
        );
        Ok(Self {
            path,
            attempts_path,
            state: tokio::sync::Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn attempts_path(&self) -> &Path {
        &self.attempts_path
    }

    async fn read_attempts(path: &Path) -> Result<AttemptLog> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AttemptLog::default()),
            Err(e) => return Err(e.into()),
        };
        let mut log = AttemptLog::default();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExitAttempt>(line) {
                Ok(attempt) => {
                    log.insert(&attempt);
                }
                Err(e) => warn!(
                    path = %path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping unreadable exit attempt"
                ),
            }
        }
        if !text.is_empty() && !text.ends_with('\n') {
            // Terminate a torn final line so the next append starts clean.
            let mut file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        Ok(log)
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    async fn persist(&self, state: &StoreState) -> Result<()> {
        Self::ensure_parent(&self.path).await?;
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn append_line(&self, attempt: &ExitAttempt) -> Result<()> {
        Self::ensure_parent(&self.attempts_path).await?;
        let mut line = serde_json::to_vec(attempt)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.attempts_path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ExitStore for JsonFileExitStore {
    async fn save_position(&self, position: &Position) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.upsert_position(position) {
            return Ok(());
        }
        self.persist(&state).await
    }

    async fn save_trailing_stop_state(
        &self,
        position_id: &str,
        trailing: &TrailingStopState,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.upsert_trailing_stop(position_id, trailing) {
            return Ok(());
        }
        self.persist(&state).await
    }

    async fn append_exit_attempt(&self, attempt: &ExitAttempt) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.attempts.contains(&attempt.id) {
            return Ok(false);
        }
        self.append_line(attempt).await?;
        Ok(state.attempts.insert(attempt))
    }

    async fn load_open_positions(&self) -> Result<Vec<Position>> {
        Ok(self.state.lock().await.open_positions())
    }

    async fn exit_attempts(&self, position_id: &str) -> Result<Vec<ExitAttempt>> {
        Ok(self.state.lock().await.attempts.for_position(position_id))
    }
}
