//! Process-wide pause/stop gate consulted at stage boundaries.
//!
//! Workers call [`InterruptGate::checkpoint`] between pipeline stages. A
//! pause blocks them there on a condvar (no polling); a stop wakes every
//! blocked worker and makes the checkpoint return `Stopped`. The gate is
//! global: pausing pauses all concurrent tickers at their next checkpoint.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::domain::TickerId;

/// Outcome of a stage-boundary checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Proceed to the next stage.
    Continue,
    /// A stop was requested; abandon the pipeline.
    Stopped,
}

/// Outcome of an interruptible sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed.
    Elapsed,
    /// A stop request cut the sleep short.
    Interrupted,
}

#[derive(Debug, Default)]
struct GateState {
    paused: bool,
    stopped: bool,
    /// Tickers currently blocked in a paused checkpoint.
    paused_tickers: BTreeSet<TickerId>,
}

/// Shared pause/stop signal pair with blocking checkpoint semantics.
#[derive(Debug, Default)]
pub struct InterruptGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl InterruptGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that all workers block at their next checkpoint. Idempotent.
    pub fn request_pause(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = true;
    }

    /// Release paused workers. Idempotent.
    pub fn request_resume(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        self.cond.notify_all();
    }

    /// Request a cooperative stop. Idempotent.
    ///
    /// Stop implies an implicit resume: the pause latch is released in the
    /// same critical section that marks the stop, so a worker blocked in a
    /// paused checkpoint wakes up and observes `Stopped` instead of
    /// sleeping forever.
    pub fn request_stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        state.stopped = true;
        self.cond.notify_all();
    }

    /// Clear all flags so a fresh run starts from a known-clean state.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        state.stopped = false;
        state.paused_tickers.clear();
        self.cond.notify_all();
    }

    /// Stage-boundary check. Never blocks when a stop is pending; blocks
    /// on the condvar while paused, re-checking stop first on every wake.
    pub fn checkpoint(&self, ticker: &TickerId) -> Checkpoint {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return Checkpoint::Stopped;
        }
        if state.paused {
            state.paused_tickers.insert(ticker.clone());
            while state.paused && !state.stopped {
                state = self.cond.wait(state).unwrap();
            }
            state.paused_tickers.remove(ticker);
            if state.stopped {
                return Checkpoint::Stopped;
            }
        }
        Checkpoint::Continue
    }

    /// Sleep that wakes early when a stop is requested.
    ///
    /// Used for stagger delays and loop-interval waits so a stop issued
    /// between batches takes effect without waiting out the interval. A
    /// pause does not extend the sleep; only checkpoints block on pause.
    pub fn sleep(&self, duration: Duration) -> SleepOutcome {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return SleepOutcome::Interrupted;
            }
            let now = Instant::now();
            if now >= deadline {
                return SleepOutcome::Elapsed;
            }
            let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Tickers currently blocked in a paused checkpoint.
    pub fn paused_tickers(&self) -> Vec<TickerId> {
        self.state
            .lock()
            .unwrap()
            .paused_tickers
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ticker(sym: &str) -> TickerId {
        TickerId::new(sym)
    }

    #[test]
    fn checkpoint_continues_when_idle() {
        let gate = InterruptGate::new();
        assert_eq!(gate.checkpoint(&ticker("NVDA")), Checkpoint::Continue);
    }

    #[test]
    fn checkpoint_returns_stopped_without_blocking() {
        let gate = InterruptGate::new();
        gate.request_stop();
        let start = Instant::now();
        assert_eq!(gate.checkpoint(&ticker("NVDA")), Checkpoint::Stopped);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn requests_are_idempotent() {
        let gate = InterruptGate::new();
        gate.request_pause();
        gate.request_pause();
        assert!(gate.is_paused());

        gate.request_resume();
        gate.request_resume();
        assert!(!gate.is_paused());

        gate.request_stop();
        gate.request_stop();
        assert!(gate.is_stopped());
        assert!(!gate.is_paused());
    }

    #[test]
    fn pause_blocks_until_resume() {
        let gate = Arc::new(InterruptGate::new());
        gate.request_pause();

        let worker_gate = Arc::clone(&gate);
        let handle = thread::spawn(move || worker_gate.checkpoint(&ticker("NVDA")));

        // Give the worker time to block, then confirm it is tracked.
        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());
        assert_eq!(gate.paused_tickers(), vec![ticker("NVDA")]);

        gate.request_resume();
        assert_eq!(handle.join().unwrap(), Checkpoint::Continue);
        assert!(gate.paused_tickers().is_empty());
    }

    #[test]
    fn stop_unblocks_paused_checkpoint_with_stopped() {
        let gate = Arc::new(InterruptGate::new());
        gate.request_pause();

        let worker_gate = Arc::clone(&gate);
        let handle = thread::spawn(move || worker_gate.checkpoint(&ticker("AAPL")));

        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());

        gate.request_stop();
        assert_eq!(handle.join().unwrap(), Checkpoint::Stopped);
    }

    #[test]
    fn stop_unblocks_all_paused_workers() {
        let gate = Arc::new(InterruptGate::new());
        gate.request_pause();

        let handles: Vec<_> = ["NVDA", "AAPL", "TSLA"]
            .into_iter()
            .map(|sym| {
                let g = Arc::clone(&gate);
                thread::spawn(move || g.checkpoint(&ticker(sym)))
            })
            .collect();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(gate.paused_tickers().len(), 3);

        gate.request_stop();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Checkpoint::Stopped);
        }
    }

    #[test]
    fn sleep_elapses_when_not_interrupted() {
        let gate = InterruptGate::new();
        let start = Instant::now();
        assert_eq!(
            gate.sleep(Duration::from_millis(50)),
            SleepOutcome::Elapsed
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn sleep_is_cut_short_by_stop() {
        let gate = Arc::new(InterruptGate::new());
        let sleeper = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let outcome = sleeper.sleep(Duration::from_secs(30));
            (outcome, start.elapsed())
        });

        thread::sleep(Duration::from_millis(100));
        gate.request_stop();

        let (outcome, elapsed) = handle.join().unwrap();
        assert_eq!(outcome, SleepOutcome::Interrupted);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn pause_does_not_extend_sleep() {
        let gate = InterruptGate::new();
        gate.request_pause();
        let start = Instant::now();
        assert_eq!(
            gate.sleep(Duration::from_millis(50)),
            SleepOutcome::Elapsed
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn reset_clears_leftover_flags() {
        let gate = InterruptGate::new();
        gate.request_pause();
        gate.request_stop();
        gate.reset();
        assert!(!gate.is_paused());
        assert!(!gate.is_stopped());
        assert_eq!(gate.checkpoint(&ticker("NVDA")), Checkpoint::Continue);
    }
}
