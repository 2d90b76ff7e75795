//! Read side of a run: session summary, per-ticker snapshots, recent
//! tool calls.
//!
//! `snapshot()` is copy-on-read and non-blocking in the ways that
//! matter: it never touches the interrupt gate's wait path and never
//! holds a worker's lock across stage execution — workers publish
//! whole-value ticker states, so readers only ever pay for a clone.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deskrun_core::{TickerHandle, TickerId, TickerState, ToolCallLog, ToolCallRecord};

use crate::config::RunMode;

/// Lifecycle state of the run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    /// Stop requested; waiting for outstanding workers to finish.
    Stopping,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Aggregated run-session state for polling consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub mode: Option<RunMode>,
    pub status: SessionStatus,
    pub tickers: Vec<TickerId>,
    pub max_parallel: usize,
    /// Completed loop iterations (1-based once the first batch finishes).
    pub iteration: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub next_scheduled_run: Option<DateTime<Utc>>,
    /// Tickers currently blocked in a paused checkpoint.
    pub paused_tickers: Vec<TickerId>,
}

impl Default for SessionSummary {
    fn default() -> Self {
        Self {
            mode: None,
            status: SessionStatus::Idle,
            tickers: Vec::new(),
            max_parallel: 0,
            iteration: 0,
            started_at: None,
            next_scheduled_run: None,
            paused_tickers: Vec::new(),
        }
    }
}

/// One coherent poll result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session: SessionSummary,
    pub tickers: BTreeMap<TickerId, TickerState>,
    pub recent_tool_calls: Vec<ToolCallRecord>,
}

/// Shared registry the workers write into and pollers read from.
#[derive(Debug)]
pub struct StatusBoard {
    session: Mutex<SessionSummary>,
    handles: RwLock<BTreeMap<TickerId, TickerHandle>>,
    log: ToolCallLog,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(ToolCallLog::default())
    }
}

impl StatusBoard {
    pub fn new(log: ToolCallLog) -> Self {
        Self {
            session: Mutex::new(SessionSummary::default()),
            handles: RwLock::new(BTreeMap::new()),
            log,
        }
    }

    pub fn log(&self) -> &ToolCallLog {
        &self.log
    }

    pub fn session(&self) -> SessionSummary {
        self.session.lock().unwrap().clone()
    }

    pub fn update_session(&self, update: impl FnOnce(&mut SessionSummary)) {
        let mut session = self.session.lock().unwrap();
        update(&mut session);
    }

    /// Replace the registry with fresh Pending states — each batch (and
    /// each loop iteration) starts its tickers over, no carry-over.
    pub fn seed_tickers(&self, tickers: &[TickerId]) -> BTreeMap<TickerId, TickerHandle> {
        let fresh: BTreeMap<TickerId, TickerHandle> = tickers
            .iter()
            .map(|t| {
                (
                    t.clone(),
                    TickerHandle::new(TickerState::pending(t.clone())),
                )
            })
            .collect();
        *self.handles.write().unwrap() = fresh.clone();
        fresh
    }

    pub fn ticker_states(&self) -> BTreeMap<TickerId, TickerState> {
        let handles = self.handles.read().unwrap();
        handles
            .iter()
            .map(|(t, h)| (t.clone(), h.snapshot()))
            .collect()
    }

    /// Copy-on-read view of everything a polling UI needs.
    pub fn snapshot(&self, recent_calls: usize) -> StatusSnapshot {
        StatusSnapshot {
            session: self.session(),
            tickers: self.ticker_states(),
            recent_tool_calls: self.log.recent(recent_calls),
        }
    }

    /// Wipe all per-run state (fresh-start reset).
    pub fn clear(&self) {
        *self.session.lock().unwrap() = SessionSummary::default();
        self.handles.write().unwrap().clear();
        self.log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskrun_core::TickerPhase;

    #[test]
    fn seeding_replaces_previous_states() {
        let board = StatusBoard::default();
        let first = board.seed_tickers(&[TickerId::new("NVDA")]);

        let mut done = first[&TickerId::new("NVDA")].snapshot();
        done.mark_done();
        first[&TickerId::new("NVDA")].publish(done);

        board.seed_tickers(&[TickerId::new("NVDA"), TickerId::new("AAPL")]);
        let states = board.ticker_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[&TickerId::new("NVDA")].phase, TickerPhase::Pending);
    }

    #[test]
    fn snapshot_reflects_worker_publishes() {
        let board = StatusBoard::default();
        let handles = board.seed_tickers(&[TickerId::new("NVDA")]);

        let mut state = handles[&TickerId::new("NVDA")].snapshot();
        state.mark_failed("boom");
        handles[&TickerId::new("NVDA")].publish(state);

        let snapshot = board.snapshot(10);
        assert_eq!(
            snapshot.tickers[&TickerId::new("NVDA")].phase,
            TickerPhase::Failed
        );
    }

    #[test]
    fn clear_resets_everything() {
        let board = StatusBoard::default();
        board.seed_tickers(&[TickerId::new("NVDA")]);
        board.update_session(|s| s.iteration = 7);
        board.clear();

        let snapshot = board.snapshot(10);
        assert_eq!(snapshot.session.iteration, 0);
        assert!(snapshot.tickers.is_empty());
        assert!(snapshot.recent_tool_calls.is_empty());
    }

    #[test]
    fn snapshot_is_serializable() {
        let board = StatusBoard::default();
        board.seed_tickers(&[TickerId::new("NVDA")]);
        let snapshot = board.snapshot(10);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("NVDA"));
    }
}
