//! Domain types for ticker analysis runs.
//!
//! A run processes each ticker through a fixed stage sequence:
//! `Analysts → Debate → TradePlan → RiskDebate → Decision → Execution`.
//! Execution is conditional (only when the decision is actionable and
//! auto-execute is enabled). `TickerState` accumulates one report per
//! completed stage, in stage order.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Identifiers ─────────────────────────────────────────────────────

/// A stock or crypto symbol — the unit of work one worker processes.
///
/// Normalized to uppercase on construction so `"nvda"` and `"NVDA"` key
/// the same state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickerId(String);

impl TickerId {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TickerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TickerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ─── Stages ──────────────────────────────────────────────────────────

/// One named step in a ticker's fixed analysis sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Analyst fan-out: one sub-analysis per configured analyst persona.
    Analysts,
    /// Bull/bear research debate over the analyst reports.
    Debate,
    /// Trader turns the debate verdict into a concrete plan.
    TradePlan,
    /// Risk committee (risky/safe/neutral) review of the plan.
    RiskDebate,
    /// Portfolio manager's final BUY/HOLD/SELL/SHORT call.
    Decision,
    /// Order placement. Entered only for actionable decisions with
    /// auto-execute enabled.
    Execution,
}

impl Stage {
    /// All stages in execution order.
    pub const ORDER: [Stage; 6] = [
        Stage::Analysts,
        Stage::Debate,
        Stage::TradePlan,
        Stage::RiskDebate,
        Stage::Decision,
        Stage::Execution,
    ];

    /// The stage that follows this one, ignoring the Execution gate
    /// (the pipeline decides whether Execution is actually entered).
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Analysts => Some(Stage::Debate),
            Stage::Debate => Some(Stage::TradePlan),
            Stage::TradePlan => Some(Stage::RiskDebate),
            Stage::RiskDebate => Some(Stage::Decision),
            Stage::Decision => Some(Stage::Execution),
            Stage::Execution => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Analysts => "analysts",
            Stage::Debate => "debate",
            Stage::TradePlan => "trade_plan",
            Stage::RiskDebate => "risk_debate",
            Stage::Decision => "decision",
            Stage::Execution => "execution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Analyst personas ────────────────────────────────────────────────

/// Analyst personas available for the Analysts stage fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analyst {
    Market,
    Options,
    Social,
    News,
    Fundamentals,
    Macro,
}

impl Analyst {
    pub const ALL: [Analyst; 6] = [
        Analyst::Market,
        Analyst::Options,
        Analyst::Social,
        Analyst::News,
        Analyst::Fundamentals,
        Analyst::Macro,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Analyst::Market => "market",
            Analyst::Options => "options",
            Analyst::Social => "social",
            Analyst::News => "news",
            Analyst::Fundamentals => "fundamentals",
            Analyst::Macro => "macro",
        }
    }

    /// Two-letter abbreviation used in compact progress displays.
    pub fn abbrev(self) -> &'static str {
        match self {
            Analyst::Market => "MA",
            Analyst::Options => "OP",
            Analyst::Social => "SA",
            Analyst::News => "NA",
            Analyst::Fundamentals => "FA",
            Analyst::Macro => "MC",
        }
    }
}

impl fmt::Display for Analyst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Analyst {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(Analyst::Market),
            "options" => Ok(Analyst::Options),
            "social" => Ok(Analyst::Social),
            "news" => Ok(Analyst::News),
            "fundamentals" => Ok(Analyst::Fundamentals),
            "macro" => Ok(Analyst::Macro),
            other => Err(format!("unknown analyst: '{other}'")),
        }
    }
}

/// Progress of one agent (analyst persona) within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

// ─── Decisions ───────────────────────────────────────────────────────

/// Final trade call produced by the Decision stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
    Short,
}

impl TradeAction {
    /// Hold is the only non-actionable decision; everything else may be
    /// forwarded to the broker.
    pub fn is_actionable(self) -> bool {
        !matches!(self, TradeAction::Hold)
    }

    /// Display label under the two action vocabularies: investment mode
    /// (shorts disabled) uses BUY/HOLD/SELL, trading mode uses
    /// LONG/NEUTRAL/SHORT.
    pub fn label(self, allow_shorts: bool) -> &'static str {
        match (self, allow_shorts) {
            (TradeAction::Buy, false) => "BUY",
            (TradeAction::Buy, true) => "LONG",
            (TradeAction::Hold, false) => "HOLD",
            (TradeAction::Hold, true) => "NEUTRAL",
            (TradeAction::Sell, _) => "SELL",
            (TradeAction::Short, _) => "SHORT",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(true))
    }
}

/// Structured decision extracted from the Decision stage's report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: TradeAction,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
}

/// Broker acknowledgement for an executed decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub action: TradeAction,
    /// Dollar notional submitted.
    pub notional: f64,
    pub submitted_at: DateTime<Utc>,
}

// ─── Stage reports ───────────────────────────────────────────────────

/// One analyst persona's section of the Analysts stage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystSection {
    pub analyst: Analyst,
    pub status: AgentStatus,
    pub text: String,
}

/// Output of one external step of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageReport {
    pub text: String,
    /// Populated only by the Decision stage.
    pub decision: Option<Decision>,
    /// Populated only by the Analysts stage; preserved even when the
    /// stage fails so partial analyst output stays inspectable.
    pub analyst_sections: Vec<AnalystSection>,
}

impl StageReport {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

// ─── Ticker state ────────────────────────────────────────────────────

/// Where a ticker currently is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "stage")]
pub enum TickerPhase {
    /// Submitted but not yet picked up by a worker.
    Pending,
    InStage(Stage),
    Done,
    Failed,
    Stopped,
}

/// How a ticker's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Decided,
    Stopped,
    Failed,
}

/// Full state of one ticker's run.
///
/// Single-writer: only the owning worker mutates this, and it publishes
/// whole-value snapshots through [`TickerHandle`]. Readers always see a
/// consistent (possibly slightly stale) copy, never a torn one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerState {
    pub ticker: TickerId,
    pub phase: TickerPhase,
    /// Per-stage reports in insertion order, which is stage order — the
    /// pipeline only ever appends the stage it just completed.
    pub reports: Vec<(Stage, StageReport)>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<TerminalOutcome>,
    pub decision: Option<Decision>,
    pub order: Option<OrderResult>,
    pub error: Option<String>,
}

impl TickerState {
    pub fn pending(ticker: TickerId) -> Self {
        Self {
            ticker,
            phase: TickerPhase::Pending,
            reports: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            outcome: None,
            decision: None,
            order: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            TickerPhase::Done | TickerPhase::Failed | TickerPhase::Stopped
        )
    }

    pub fn report_for(&self, stage: Stage) -> Option<&StageReport> {
        self.reports
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, r)| r)
    }

    /// Stages with a recorded report, in completion order.
    pub fn completed_stages(&self) -> Vec<Stage> {
        self.reports.iter().map(|(s, _)| *s).collect()
    }

    pub fn push_report(&mut self, stage: Stage, report: StageReport) {
        debug_assert!(
            self.reports.last().map_or(true, |(last, _)| *last < stage),
            "stage reports must be appended in stage order"
        );
        self.reports.push((stage, report));
    }

    pub fn mark_done(&mut self) {
        self.phase = TickerPhase::Done;
        self.outcome = Some(TerminalOutcome::Decided);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_stopped(&mut self) {
        self.phase = TickerPhase::Stopped;
        self.outcome = Some(TerminalOutcome::Stopped);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.phase = TickerPhase::Failed;
        self.outcome = Some(TerminalOutcome::Failed);
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Shared read handle to one ticker's state.
///
/// The owning worker replaces the whole state on every update; polling
/// readers clone it. The lock is held only for the copy, never across a
/// stage execution, so readers cannot stall the pipeline.
#[derive(Debug, Clone)]
pub struct TickerHandle {
    inner: Arc<RwLock<TickerState>>,
}

impl TickerHandle {
    pub fn new(state: TickerState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Replace-on-write: the single writer publishes a full new value.
    pub fn publish(&self, state: TickerState) {
        *self.inner.write().unwrap() = state;
    }

    /// Value copy of the current state.
    pub fn snapshot(&self) -> TickerState {
        self.inner.read().unwrap().clone()
    }
}
