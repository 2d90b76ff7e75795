//! Deskrun Core — pipeline execution primitives for the multi-agent
//! trading assistant.
//!
//! This crate contains the per-ticker heart of the system:
//! - Domain types (tickers, stages, reports, decisions, ticker state)
//! - The process-wide interrupt gate (cooperative pause/resume/stop)
//! - The stage pipeline state machine with checkpoint semantics
//! - Executor seams for the LLM stage work and broker order placement
//! - Thread-scoped ticker binding and the tool-call audit log
//! - A scripted executor for tests and offline demo runs

pub mod context;
pub mod domain;
pub mod executor;
pub mod gate;
pub mod pipeline;
pub mod scripted;
pub mod toolcall;

pub use context::{current_ticker, TickerBinding};
pub use domain::{
    AgentStatus, Analyst, AnalystSection, Decision, OrderResult, Stage, StageReport,
    TerminalOutcome, TickerHandle, TickerId, TickerPhase, TickerState, TradeAction,
};
pub use executor::{
    AnalystRequest, OrderError, OrderExecutor, PipelineConfig, StageError, StageExecutor,
    StageRequest,
};
pub use gate::{Checkpoint, InterruptGate, SleepOutcome};
pub use pipeline::StagePipeline;
pub use scripted::{ScriptedBroker, ScriptedExecutor};
pub use toolcall::{ToolCallLog, ToolCallRecord, ToolCallStatus, DEFAULT_LOG_CAPACITY};
