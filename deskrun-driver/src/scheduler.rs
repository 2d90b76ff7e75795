//! Bounded worker-pool scheduler for one batch of tickers.
//!
//! Builds a private rayon pool sized to `max_parallel` (never the global
//! pool), staggers ticker starts with a small random jitter, and always
//! waits for every submitted ticker to reach a terminal state. One
//! ticker's failure or stop never cancels its siblings.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use deskrun_core::{
    InterruptGate, OrderExecutor, StageExecutor, TickerHandle, TickerId, TickerState,
    ToolCallLog,
};

use crate::config::SessionConfig;
use crate::worker::run_ticker;

/// Everything one batch produced, keyed by ticker regardless of outcome.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub states: BTreeMap<TickerId, TickerState>,
    /// High-water mark of concurrently active workers — never exceeds
    /// the configured `max_parallel`.
    pub peak_parallel: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchResult {
    /// Tickers that finished with the given outcome.
    pub fn with_outcome(
        &self,
        outcome: deskrun_core::TerminalOutcome,
    ) -> Vec<&TickerId> {
        self.states
            .iter()
            .filter(|(_, s)| s.outcome == Some(outcome))
            .map(|(t, _)| t)
            .collect()
    }
}

/// Run one batch: at most `config.max_parallel` workers at a time, the
/// rest queued. Returns only after every ticker is terminal.
#[allow(clippy::too_many_arguments)]
pub fn run_batch(
    tickers: &[TickerId],
    handles: &BTreeMap<TickerId, TickerHandle>,
    executor: &dyn StageExecutor,
    orders: &dyn OrderExecutor,
    gate: &InterruptGate,
    log: &ToolCallLog,
    config: &SessionConfig,
) -> BatchResult {
    let started_at = Utc::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_parallel.max(1))
        .thread_name(|i| format!("deskrun-worker-{i}"))
        .build()
        .expect("failed to build worker pool");

    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(TickerId, TickerState)>();

    pool.scope(|scope| {
        for (index, ticker) in tickers.iter().enumerate() {
            let Some(handle) = handles.get(ticker) else {
                continue;
            };
            let tx = tx.clone();
            let active = &active;
            let peak = &peak;
            scope.spawn(move |_| {
                // Stagger starts so downstream APIs are not hit by the
                // whole batch at once. Interruptible: a stop request cuts
                // it short and the entry checkpoint does the rest.
                if index > 0 {
                    let jitter = stagger_delay(config);
                    if !jitter.is_zero() {
                        gate.sleep(jitter);
                    }
                }

                let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now_active, Ordering::SeqCst);

                let state = run_ticker(
                    ticker,
                    handle,
                    executor,
                    orders,
                    gate,
                    log,
                    &config.pipeline,
                );

                active.fetch_sub(1, Ordering::SeqCst);
                // The receiver outlives the scope; a send failure would
                // mean the batch was abandoned, which never happens.
                let _ = tx.send((ticker.clone(), state));
            });
        }
    });
    drop(tx);

    let states: BTreeMap<TickerId, TickerState> = rx.into_iter().collect();
    BatchResult {
        states,
        peak_parallel: peak.load(Ordering::SeqCst),
        started_at,
        finished_at: Utc::now(),
    }
}

fn stagger_delay(config: &SessionConfig) -> Duration {
    let (min_ms, max_ms) = (config.stagger.min_ms, config.stagger.max_ms);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let ms = if min_ms == max_ms {
        min_ms
    } else {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaggerRange;

    #[test]
    fn stagger_zero_range_is_zero() {
        let config = SessionConfig {
            stagger: StaggerRange { min_ms: 0, max_ms: 0 },
            ..SessionConfig::default()
        };
        assert_eq!(stagger_delay(&config), Duration::ZERO);
    }

    #[test]
    fn stagger_stays_in_bounds() {
        let config = SessionConfig {
            stagger: StaggerRange {
                min_ms: 10,
                max_ms: 20,
            },
            ..SessionConfig::default()
        };
        for _ in 0..50 {
            let delay = stagger_delay(&config);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(20));
        }
    }
}
