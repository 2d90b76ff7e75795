//! Seams to the external collaborators: the LLM stage executor and the
//! brokerage order executor.
//!
//! The pipeline knows nothing about prompts, models, or data sources —
//! it hands an accumulated-state request to a [`StageExecutor`] and gets
//! back a report or an error. Order placement is the same shape at the
//! Execution stage.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Analyst, OrderResult, Stage, StageReport, TickerId, TradeAction};

/// Failure of a single stage's external step. Always ticker-scoped: the
/// worker records it on the ticker's state and siblings keep running.
#[derive(Debug, Error)]
pub enum StageError {
    /// A tool or LLM call inside the stage failed.
    #[error("tool call failed: {0}")]
    Tool(String),
    /// The executor returned output the pipeline cannot use (e.g. a
    /// Decision stage report with no extractable decision).
    #[error("malformed stage output: {0}")]
    Malformed(String),
    /// The stage exceeded its time budget.
    #[error("stage {stage} exceeded its {budget_secs}s budget")]
    Timeout { stage: Stage, budget_secs: u64 },
}

/// Failure placing an order at the Execution stage. Recorded on the
/// ticker's state without invalidating the decision itself.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("broker rejected order for {ticker}: {reason}")]
    Rejected { ticker: TickerId, reason: String },
    #[error("broker unreachable: {0}")]
    Unreachable(String),
}

/// Per-ticker pipeline configuration handed through to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Analyst personas to fan out to during the Analysts stage.
    pub analysts: Vec<Analyst>,
    /// Bull/bear debate rounds.
    pub debate_rounds: u32,
    /// Risk-committee discussion rounds.
    pub risk_rounds: u32,
    /// Trading vocabulary: LONG/NEUTRAL/SHORT instead of BUY/HOLD/SELL.
    pub allow_shorts: bool,
    /// Forward actionable decisions to the broker.
    pub auto_execute: bool,
    /// Run analyst sub-calls on scoped threads instead of sequentially.
    /// Sequential is the default so per-analyst progress lands in the
    /// status surface one section at a time.
    pub parallel_analysts: bool,
    /// Time budget for one external step.
    pub stage_timeout_secs: u64,
    /// Dollar notional per auto-executed order.
    pub order_notional: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysts: vec![
                Analyst::Market,
                Analyst::Social,
                Analyst::News,
                Analyst::Fundamentals,
            ],
            debate_rounds: 4,
            risk_rounds: 3,
            allow_shorts: false,
            auto_execute: false,
            parallel_analysts: false,
            stage_timeout_secs: 120,
            order_notional: 1_000.0,
        }
    }
}

/// One external step: the stage to run plus everything accumulated so far.
#[derive(Debug)]
pub struct StageRequest<'a> {
    pub stage: Stage,
    pub ticker: &'a TickerId,
    /// Reports from the stages already completed, in stage order.
    pub reports: &'a [(Stage, StageReport)],
    pub config: &'a PipelineConfig,
}

/// One analyst persona's sub-call within the Analysts stage.
#[derive(Debug)]
pub struct AnalystRequest<'a> {
    pub analyst: Analyst,
    pub ticker: &'a TickerId,
    pub config: &'a PipelineConfig,
}

/// External collaborator that performs the actual analysis/LLM work for
/// a stage. Opaque to the pipeline; retries and network timeouts are its
/// concern, not the pipeline's.
pub trait StageExecutor: Send + Sync {
    /// Run one stage to completion. Called for every stage except
    /// `Analysts` (which fans out through [`execute_analyst`]) and
    /// `Execution` (which goes to the [`OrderExecutor`]).
    ///
    /// [`execute_analyst`]: StageExecutor::execute_analyst
    fn execute_stage(&self, req: &StageRequest<'_>) -> Result<StageReport, StageError>;

    /// Run one analyst persona's sub-analysis.
    fn execute_analyst(&self, req: &AnalystRequest<'_>) -> Result<String, StageError>;
}

/// External collaborator invoked at the Execution stage.
pub trait OrderExecutor: Send + Sync {
    fn place_order(
        &self,
        ticker: &TickerId,
        action: TradeAction,
        notional: f64,
    ) -> Result<OrderResult, OrderError>;
}
