//! Run driver: owns the session lifecycle (Idle → Running ⇄ Paused →
//! Stopping → Idle) and schedules batches over time in single, loop, or
//! market-hours mode.
//!
//! Control calls are synchronous and state-checked; the batches
//! themselves run on a detached session thread. Worker-level failures
//! never reach the driver's callers — only `InvalidState` misuse does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Local, Utc};
use thiserror::Error;

use deskrun_core::{
    InterruptGate, OrderExecutor, SleepOutcome, StageExecutor, TickerId, ToolCallLog,
};

use crate::config::{ConfigError, RunMode, SessionConfig};
use crate::market_hours;
use crate::scheduler::{run_batch, BatchResult};
use crate::status::{SessionStatus, StatusBoard, StatusSnapshot};

/// How many tool-call records a status snapshot carries.
const SNAPSHOT_RECENT_CALLS: usize = 50;

/// How often the market-hours loop re-checks the clock while outside a
/// window.
const MARKET_POLL: Duration = Duration::from_secs(30);

/// Driver API misuse or rejected configuration. Always synchronous; no
/// side effect occurred.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{op} not allowed while session is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionStatus,
    },
    #[error("no tickers provided")]
    NoTickers,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct DriverShared {
    gate: InterruptGate,
    board: StatusBoard,
    lifecycle: Mutex<SessionStatus>,
    lifecycle_changed: Condvar,
    executor: Arc<dyn StageExecutor>,
    orders: Arc<dyn OrderExecutor>,
    /// Generation counter: a stale session thread from a previous start
    /// must not flip a newer session back to Idle.
    generation: AtomicU64,
}

impl DriverShared {
    fn status(&self) -> SessionStatus {
        *self.lifecycle.lock().unwrap()
    }

    fn set_status(&self, status: SessionStatus) {
        *self.lifecycle.lock().unwrap() = status;
        self.lifecycle_changed.notify_all();
        self.board.update_session(|s| s.status = status);
    }
}

/// Orchestrates run sessions over the scheduler.
pub struct RunDriver {
    shared: Arc<DriverShared>,
    session_thread: Mutex<Option<JoinHandle<()>>>,
}

impl RunDriver {
    pub fn new(executor: Arc<dyn StageExecutor>, orders: Arc<dyn OrderExecutor>) -> Self {
        Self {
            shared: Arc::new(DriverShared {
                gate: InterruptGate::new(),
                board: StatusBoard::new(ToolCallLog::default()),
                lifecycle: Mutex::new(SessionStatus::Idle),
                lifecycle_changed: Condvar::new(),
                executor,
                orders,
                generation: AtomicU64::new(0),
            }),
            session_thread: Mutex::new(None),
        }
    }

    /// Begin a session. Rejected unless currently Idle.
    ///
    /// Performs an implicit reset first: leftover pause/stop flags from a
    /// previously interrupted run can never poison a fresh start.
    pub fn start(
        &self,
        tickers: &[TickerId],
        mode: RunMode,
        config: SessionConfig,
    ) -> Result<(), ControlError> {
        config.validate(Some(mode))?;
        let tickers = dedupe(tickers);
        if tickers.is_empty() {
            return Err(ControlError::NoTickers);
        }

        {
            let mut status = self.shared.lifecycle.lock().unwrap();
            if *status != SessionStatus::Idle {
                return Err(ControlError::InvalidState {
                    op: "start",
                    state: *status,
                });
            }
            *status = SessionStatus::Running;
        }
        self.shared.lifecycle_changed.notify_all();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.shared.gate.reset();
        self.shared.board.log().clear();
        self.shared.board.update_session(|s| {
            *s = crate::status::SessionSummary {
                mode: Some(mode),
                status: SessionStatus::Running,
                tickers: tickers.clone(),
                max_parallel: config.max_parallel,
                iteration: 0,
                started_at: Some(Utc::now()),
                next_scheduled_run: None,
                paused_tickers: Vec::new(),
            }
        });
        self.shared.board.seed_tickers(&tickers);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("deskrun-session".into())
            .spawn(move || {
                run_session(&shared, &tickers, mode, &config);
                if shared.generation.load(Ordering::SeqCst) == generation {
                    shared.set_status(SessionStatus::Idle);
                    shared
                        .board
                        .update_session(|s| s.next_scheduled_run = None);
                }
            })
            .expect("failed to spawn session thread");
        *self.session_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Pause all workers at their next checkpoint. Idempotent while
    /// paused; rejected when no session is active.
    pub fn pause(&self) -> Result<(), ControlError> {
        let mut status = self.shared.lifecycle.lock().unwrap();
        match *status {
            SessionStatus::Running => {
                self.shared.gate.request_pause();
                *status = SessionStatus::Paused;
                drop(status);
                self.shared.lifecycle_changed.notify_all();
                self.shared
                    .board
                    .update_session(|s| s.status = SessionStatus::Paused);
                Ok(())
            }
            SessionStatus::Paused => Ok(()),
            state => Err(ControlError::InvalidState { op: "pause", state }),
        }
    }

    /// Release paused workers. Idempotent while running; rejected when no
    /// session is active.
    pub fn resume(&self) -> Result<(), ControlError> {
        let mut status = self.shared.lifecycle.lock().unwrap();
        match *status {
            SessionStatus::Paused => {
                self.shared.gate.request_resume();
                *status = SessionStatus::Running;
                drop(status);
                self.shared.lifecycle_changed.notify_all();
                self.shared
                    .board
                    .update_session(|s| s.status = SessionStatus::Running);
                Ok(())
            }
            SessionStatus::Running => Ok(()),
            state => Err(ControlError::InvalidState { op: "resume", state }),
        }
    }

    /// Request a cooperative stop. Valid from Running or Paused (and a
    /// no-op while already Stopping); rejected when Idle.
    ///
    /// Resume-then-stop ordering guarantees workers blocked in a paused
    /// checkpoint wake up and observe the stop rather than deadlocking.
    pub fn stop(&self) -> Result<(), ControlError> {
        let mut status = self.shared.lifecycle.lock().unwrap();
        match *status {
            SessionStatus::Running | SessionStatus::Paused => {
                *status = SessionStatus::Stopping;
                drop(status);
                self.shared.lifecycle_changed.notify_all();
                self.shared
                    .board
                    .update_session(|s| s.status = SessionStatus::Stopping);
                self.shared.gate.request_resume();
                self.shared.gate.request_stop();
                Ok(())
            }
            SessionStatus::Stopping => Ok(()),
            state => Err(ControlError::InvalidState { op: "stop", state }),
        }
    }

    /// Clear all per-run state. Only valid from Idle.
    pub fn reset(&self) -> Result<(), ControlError> {
        let status = self.shared.status();
        if status != SessionStatus::Idle {
            return Err(ControlError::InvalidState {
                op: "reset",
                state: status,
            });
        }
        self.shared.gate.reset();
        self.shared.board.clear();
        Ok(())
    }

    /// Non-blocking, copy-on-read view for polling consumers.
    pub fn status(&self) -> StatusSnapshot {
        let mut snapshot = self.shared.board.snapshot(SNAPSHOT_RECENT_CALLS);
        snapshot.session.paused_tickers = self.shared.gate.paused_tickers();
        snapshot
    }

    /// Block until the session reaches Idle, up to `timeout`. Returns
    /// false on timeout. Used by embedding callers that want to join a
    /// single-mode run.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.lifecycle.lock().unwrap();
        while *status != SessionStatus::Idle {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .lifecycle_changed
                .wait_timeout(status, deadline - now)
                .unwrap();
            status = guard;
        }
        true
    }
}

fn dedupe(tickers: &[TickerId]) -> Vec<TickerId> {
    let mut seen = std::collections::BTreeSet::new();
    tickers
        .iter()
        .filter(|t| seen.insert((*t).clone()))
        .cloned()
        .collect()
}

fn run_session(
    shared: &DriverShared,
    tickers: &[TickerId],
    mode: RunMode,
    config: &SessionConfig,
) {
    match mode {
        RunMode::Single => {
            run_iteration(shared, tickers, config);
        }
        RunMode::Loop => loop {
            run_iteration(shared, tickers, config);
            if shared.gate.is_stopped() {
                break;
            }
            let interval = Duration::from_secs(config.loop_interval_secs);
            shared.board.update_session(|s| {
                s.next_scheduled_run =
                    Some(Utc::now() + ChronoDuration::seconds(config.loop_interval_secs as i64));
            });
            // Stop between iterations takes effect immediately instead of
            // waiting out the interval.
            if shared.gate.sleep(interval) == SleepOutcome::Interrupted {
                break;
            }
        },
        RunMode::MarketHours => {
            let tolerance = ChronoDuration::minutes(config.window_tolerance_mins);
            loop {
                if shared.gate.is_stopped() {
                    break;
                }
                let now = Local::now().naive_local();
                if market_hours::active_window(now, &config.market_hour_windows, tolerance)
                    .is_some()
                {
                    run_iteration(shared, tickers, config);
                    if shared.gate.is_stopped() {
                        break;
                    }
                    // Step past the current window so one window does not
                    // trigger twice.
                    let hold = tolerance
                        .to_std()
                        .unwrap_or(Duration::from_secs(300));
                    if shared.gate.sleep(hold) == SleepOutcome::Interrupted {
                        break;
                    }
                } else {
                    let next = market_hours::next_window(now, &config.market_hour_windows)
                        .map(|dt| {
                            let offset = dt - now;
                            Utc::now() + offset
                        });
                    shared
                        .board
                        .update_session(|s| s.next_scheduled_run = next);
                    if shared.gate.sleep(MARKET_POLL) == SleepOutcome::Interrupted {
                        break;
                    }
                }
            }
        }
    }
}

/// One batch over fresh ticker states.
fn run_iteration(
    shared: &DriverShared,
    tickers: &[TickerId],
    config: &SessionConfig,
) -> BatchResult {
    let handles = shared.board.seed_tickers(tickers);
    let result = run_batch(
        tickers,
        &handles,
        shared.executor.as_ref(),
        shared.orders.as_ref(),
        &shared.gate,
        shared.board.log(),
        config,
    );
    shared.board.update_session(|s| s.iteration += 1);
    result
}
