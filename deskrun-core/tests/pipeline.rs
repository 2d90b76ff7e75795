//! Integration tests for the stage pipeline state machine.
//!
//! Scripted-executor runs: stage ordering, execution gating, failure
//! recording, timeout conversion, and analyst fan-out behavior.

use deskrun_core::{
    AgentStatus, Analyst, InterruptGate, OrderExecutor, PipelineConfig, ScriptedBroker,
    ScriptedExecutor, Stage, StagePipeline, StageExecutor, StageReport, TerminalOutcome,
    TickerHandle, TickerId, TickerPhase, TickerState, ToolCallLog, ToolCallStatus,
};

fn run_one(
    ticker: &str,
    executor: &dyn StageExecutor,
    broker: &dyn OrderExecutor,
    config: &PipelineConfig,
    gate: &InterruptGate,
    log: &ToolCallLog,
) -> TickerState {
    let id = TickerId::new(ticker);
    let handle = TickerHandle::new(TickerState::pending(id.clone()));
    StagePipeline::new(executor, broker, gate, log, config).run(&id, &handle)
}

fn default_setup() -> (ScriptedExecutor, ScriptedBroker, InterruptGate, ToolCallLog) {
    (
        ScriptedExecutor::new(),
        ScriptedBroker::new(),
        InterruptGate::new(),
        ToolCallLog::default(),
    )
}

// Scripted decisions by symbol byte-sum: TSLA → Buy, AAPL → Sell,
// NVDA → Hold. The tests below rely on these fixed outcomes.

#[test]
fn completed_run_has_reports_in_exact_stage_order() {
    let (executor, broker, gate, log) = default_setup();
    let config = PipelineConfig::default();

    let state = run_one("TSLA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.phase, TickerPhase::Done);
    assert_eq!(state.outcome, Some(TerminalOutcome::Decided));
    assert_eq!(
        state.completed_stages(),
        vec![
            Stage::Analysts,
            Stage::Debate,
            Stage::TradePlan,
            Stage::RiskDebate,
            Stage::Decision,
        ]
    );
    assert!(state.decision.is_some());
    assert!(state.completed_at.is_some());
    assert!(state.error.is_none());
}

#[test]
fn hold_decision_skips_execution_even_with_auto_execute() {
    let (executor, broker, gate, log) = default_setup();
    let config = PipelineConfig {
        auto_execute: true,
        ..PipelineConfig::default()
    };

    let state = run_one("NVDA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.outcome, Some(TerminalOutcome::Decided));
    assert!(state.report_for(Stage::Execution).is_none());
    assert!(state.order.is_none());
    assert!(broker.placed_orders().is_empty());
}

#[test]
fn actionable_decision_with_auto_execute_places_an_order() {
    let (executor, broker, gate, log) = default_setup();
    let config = PipelineConfig {
        auto_execute: true,
        order_notional: 2_500.0,
        ..PipelineConfig::default()
    };

    let state = run_one("TSLA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.outcome, Some(TerminalOutcome::Decided));
    assert!(state.report_for(Stage::Execution).is_some());
    let order = state.order.expect("order should have been placed");
    assert_eq!(order.notional, 2_500.0);
    assert_eq!(broker.placed_orders().len(), 1);
}

#[test]
fn auto_execute_disabled_never_reaches_the_broker() {
    let (executor, broker, gate, log) = default_setup();
    let config = PipelineConfig::default();

    let state = run_one("TSLA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.outcome, Some(TerminalOutcome::Decided));
    assert!(broker.placed_orders().is_empty());
    assert!(state.order.is_none());
}

#[test]
fn broker_rejection_is_recorded_without_invalidating_the_decision() {
    let (executor, _, gate, log) = default_setup();
    let broker = ScriptedBroker::rejecting();
    let config = PipelineConfig {
        auto_execute: true,
        ..PipelineConfig::default()
    };

    let state = run_one("TSLA", &executor, &broker, &config, &gate, &log);

    // The decision stands; only the execution attempt is recorded as failed.
    assert_eq!(state.outcome, Some(TerminalOutcome::Decided));
    assert!(state.decision.is_some());
    assert!(state.order.is_none());
    let exec_report = state
        .report_for(Stage::Execution)
        .expect("execution report should exist");
    assert!(exec_report.text.contains("order placement failed"));
    assert!(state.error.as_deref().unwrap_or("").contains("rejected"));
}

#[test]
fn stage_failure_truncates_the_run_and_preserves_earlier_reports() {
    let (_, broker, gate, log) = default_setup();
    let executor = ScriptedExecutor::new().fail_ticker_at("NVDA", Stage::TradePlan);
    let config = PipelineConfig::default();

    let state = run_one("NVDA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.phase, TickerPhase::Failed);
    assert_eq!(state.outcome, Some(TerminalOutcome::Failed));
    assert_eq!(
        state.completed_stages(),
        vec![Stage::Analysts, Stage::Debate]
    );
    assert!(state.error.as_deref().unwrap_or("").contains("injected"));
}

#[test]
fn over_budget_stage_fails_as_timeout() {
    let (_, broker, gate, log) = default_setup();
    let executor =
        ScriptedExecutor::new().with_stage_delay(std::time::Duration::from_millis(20));
    let config = PipelineConfig {
        stage_timeout_secs: 0,
        ..PipelineConfig::default()
    };

    let state = run_one("NVDA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.outcome, Some(TerminalOutcome::Failed));
    assert!(state.error.as_deref().unwrap_or("").contains("budget"));
    // The stage did finish its work; the report survives the timeout.
    assert_eq!(state.completed_stages(), vec![Stage::Analysts]);
    assert!(state.report_for(Stage::Analysts).is_some());

    let timeouts: Vec<_> = log
        .recent(100)
        .into_iter()
        .filter(|r| r.status == ToolCallStatus::Timeout)
        .collect();
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].stage, Stage::Analysts);
}

#[test]
fn failed_analyst_preserves_completed_sections() {
    let (_, broker, gate, log) = default_setup();
    let executor = ScriptedExecutor::new().fail_analyst("NVDA", Analyst::News);
    let config = PipelineConfig {
        analysts: vec![
            Analyst::Market,
            Analyst::Social,
            Analyst::News,
            Analyst::Fundamentals,
        ],
        parallel_analysts: false,
        ..PipelineConfig::default()
    };

    let state = run_one("NVDA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.outcome, Some(TerminalOutcome::Failed));
    let report = state
        .report_for(Stage::Analysts)
        .expect("partial analyst report should be preserved");
    let statuses: Vec<_> = report
        .analyst_sections
        .iter()
        .map(|s| (s.analyst, s.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (Analyst::Market, AgentStatus::Completed),
            (Analyst::Social, AgentStatus::Completed),
            (Analyst::News, AgentStatus::Error),
            (Analyst::Fundamentals, AgentStatus::Pending),
        ]
    );
}

#[test]
fn parallel_analysts_complete_all_sections() {
    let (executor, broker, gate, log) = default_setup();
    let config = PipelineConfig {
        analysts: Analyst::ALL.to_vec(),
        parallel_analysts: true,
        ..PipelineConfig::default()
    };

    let state = run_one("NVDA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.outcome, Some(TerminalOutcome::Decided));
    let report = state.report_for(Stage::Analysts).unwrap();
    assert_eq!(report.analyst_sections.len(), Analyst::ALL.len());
    assert!(report
        .analyst_sections
        .iter()
        .all(|s| s.status == AgentStatus::Completed));
}

#[test]
fn parallel_analyst_failure_still_fails_the_stage() {
    let (_, broker, gate, log) = default_setup();
    let executor = ScriptedExecutor::new().fail_analyst("NVDA", Analyst::Social);
    let config = PipelineConfig {
        analysts: vec![Analyst::Market, Analyst::Social, Analyst::News],
        parallel_analysts: true,
        ..PipelineConfig::default()
    };

    let state = run_one("NVDA", &executor, &broker, &config, &gate, &log);

    assert_eq!(state.outcome, Some(TerminalOutcome::Failed));
    let report = state.report_for(Stage::Analysts).unwrap();
    // Siblings of the failed analyst still ran to completion.
    assert_eq!(
        report
            .analyst_sections
            .iter()
            .filter(|s| s.status == AgentStatus::Completed)
            .count(),
        2
    );
}

#[test]
fn tool_log_records_every_external_step_in_causal_order() {
    let (executor, broker, gate, log) = default_setup();
    let config = PipelineConfig::default();

    // run_one installs no binding; wrap with one the way a worker does.
    let id = TickerId::new("TSLA");
    let handle = TickerHandle::new(TickerState::pending(id.clone()));
    {
        let _binding = deskrun_core::TickerBinding::bind(id.clone());
        StagePipeline::new(&executor, &broker, &gate, &log, &config).run(&id, &handle);
    }

    let stage_records: Vec<_> = log
        .for_ticker(&id)
        .into_iter()
        .filter(|r| r.tool_name.starts_with("stage:"))
        .map(|r| r.stage)
        .collect();
    assert_eq!(
        stage_records,
        vec![
            Stage::Analysts,
            Stage::Debate,
            Stage::TradePlan,
            Stage::RiskDebate,
            Stage::Decision,
        ]
    );
    // Plus one record per analyst sub-call.
    let analyst_records = log
        .for_ticker(&id)
        .into_iter()
        .filter(|r| r.tool_name.starts_with("analyst:"))
        .count();
    assert_eq!(analyst_records, config.analysts.len());
}

// A decision stage that forgets to attach a structured decision.
struct NoDecisionExecutor;

impl StageExecutor for NoDecisionExecutor {
    fn execute_stage(
        &self,
        req: &deskrun_core::StageRequest<'_>,
    ) -> Result<StageReport, deskrun_core::StageError> {
        Ok(StageReport::text(format!("free-form text for {}", req.ticker)))
    }

    fn execute_analyst(
        &self,
        req: &deskrun_core::AnalystRequest<'_>,
    ) -> Result<String, deskrun_core::StageError> {
        Ok(format!("{} section", req.analyst))
    }
}

#[test]
fn decision_stage_without_decision_is_a_malformed_failure() {
    let (_, broker, gate, log) = default_setup();
    let config = PipelineConfig::default();

    let state = run_one("NVDA", &NoDecisionExecutor, &broker, &config, &gate, &log);

    assert_eq!(state.outcome, Some(TerminalOutcome::Failed));
    assert!(state
        .error
        .as_deref()
        .unwrap_or("")
        .contains("no decision"));
    // Stages before the malformed decision are preserved.
    assert_eq!(
        state.completed_stages(),
        vec![
            Stage::Analysts,
            Stage::Debate,
            Stage::TradePlan,
            Stage::RiskDebate,
        ]
    );
}
