//! One ticker's worker: binds the thread to the ticker, drives the
//! pipeline to a terminal state, and never propagates stage failures.

use deskrun_core::{
    InterruptGate, OrderExecutor, PipelineConfig, StageExecutor, StagePipeline, TickerBinding,
    TickerHandle, TickerId, TickerState, ToolCallLog,
};

/// Run one ticker's pipeline to completion (or interruption/failure).
///
/// The thread-scoped binding lets nested tool calls recover which ticker
/// they belong to; the RAII guard clears it on every exit path so a
/// reused pool thread never carries a stale association.
#[allow(clippy::too_many_arguments)]
pub fn run_ticker(
    ticker: &TickerId,
    handle: &TickerHandle,
    executor: &dyn StageExecutor,
    orders: &dyn OrderExecutor,
    gate: &InterruptGate,
    log: &ToolCallLog,
    config: &PipelineConfig,
) -> TickerState {
    let _binding = TickerBinding::bind(ticker.clone());
    StagePipeline::new(executor, orders, gate, log, config).run(ticker, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskrun_core::{
        current_ticker, ScriptedBroker, ScriptedExecutor, Stage, TerminalOutcome,
    };

    fn setup(ticker: &str) -> (TickerId, TickerHandle) {
        let id = TickerId::new(ticker);
        let handle = TickerHandle::new(TickerState::pending(id.clone()));
        (id, handle)
    }

    #[test]
    fn worker_returns_terminal_state_and_clears_binding() {
        let (id, handle) = setup("NVDA");
        let executor = ScriptedExecutor::new();
        let broker = ScriptedBroker::new();
        let gate = InterruptGate::new();
        let log = ToolCallLog::default();

        let state = run_ticker(
            &id,
            &handle,
            &executor,
            &broker,
            &gate,
            &log,
            &PipelineConfig::default(),
        );

        assert_eq!(state.outcome, Some(TerminalOutcome::Decided));
        assert!(current_ticker().is_none());
        // The handle saw the same terminal state the caller got.
        assert_eq!(handle.snapshot().outcome, state.outcome);
    }

    #[test]
    fn worker_swallows_stage_failures() {
        let (id, handle) = setup("NVDA");
        let executor = ScriptedExecutor::new().fail_ticker_at("NVDA", Stage::Debate);
        let broker = ScriptedBroker::new();
        let gate = InterruptGate::new();
        let log = ToolCallLog::default();

        let state = run_ticker(
            &id,
            &handle,
            &executor,
            &broker,
            &gate,
            &log,
            &PipelineConfig::default(),
        );

        assert_eq!(state.outcome, Some(TerminalOutcome::Failed));
        assert!(current_ticker().is_none());
    }

    #[test]
    fn tool_records_are_tagged_through_the_binding() {
        let (id, handle) = setup("NVDA");
        let executor = ScriptedExecutor::new();
        let broker = ScriptedBroker::new();
        let gate = InterruptGate::new();
        let log = ToolCallLog::default();

        run_ticker(
            &id,
            &handle,
            &executor,
            &broker,
            &gate,
            &log,
            &PipelineConfig::default(),
        );

        assert!(!log.for_ticker(&id).is_empty());
        assert!(log
            .recent(usize::MAX)
            .iter()
            .all(|r| r.ticker.as_ref() == Some(&id)));
    }
}
