//! Append-only audit log of tool/LLM calls.
//!
//! Workers append one record per external step (and one per analyst
//! sub-call). Records are tagged with the ticker from the thread-scoped
//! binding, never from shared state, so concurrent workers cannot
//! mislabel each other's calls. Retention is a bounded ring: the oldest
//! records are dropped once the capacity is reached.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context;
use crate::domain::{Stage, TickerId};

/// How a recorded call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Success,
    Error,
    Timeout,
}

/// Immutable audit entry for one tool/LLM call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    /// Ticker from the calling thread's binding; `None` when the call
    /// happened outside a worker (should not occur in normal operation).
    pub ticker: Option<TickerId>,
    pub tool_name: String,
    pub inputs: BTreeMap<String, String>,
    pub output: String,
    pub duration_ms: u64,
    pub status: ToolCallStatus,
}

/// Default retention: matches a long interactive session without
/// unbounded growth.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

#[derive(Debug)]
struct LogInner {
    records: VecDeque<ToolCallRecord>,
    capacity: usize,
}

/// Shared, append-only tool-call log with bounded retention.
#[derive(Debug, Clone)]
pub struct ToolCallLog {
    inner: Arc<Mutex<LogInner>>,
}

impl Default for ToolCallLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl ToolCallLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                records: VecDeque::new(),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Append a record for a call made on the current thread. The ticker
    /// tag comes from the thread-scoped binding.
    pub fn record(
        &self,
        stage: Stage,
        tool_name: impl Into<String>,
        inputs: BTreeMap<String, String>,
        output: impl Into<String>,
        duration: Duration,
        status: ToolCallStatus,
    ) {
        self.append(ToolCallRecord {
            timestamp: Utc::now(),
            stage,
            ticker: context::current_ticker(),
            tool_name: tool_name.into(),
            inputs,
            output: output.into(),
            duration_ms: duration.as_millis() as u64,
            status,
        });
    }

    pub fn append(&self, record: ToolCallRecord) {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.len() == inner.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ToolCallRecord> {
        let inner = self.inner.lock().unwrap();
        let skip = inner.records.len().saturating_sub(n);
        inner.records.iter().skip(skip).cloned().collect()
    }

    /// All records for one ticker, in append (causal) order.
    pub fn for_ticker(&self, ticker: &TickerId) -> Vec<ToolCallRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .records
            .iter()
            .filter(|r| r.ticker.as_ref() == Some(ticker))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().records.clear();
    }
}
