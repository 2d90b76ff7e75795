//! Stage pipeline state machine for a single ticker.
//!
//! Drives the fixed stage sequence, one external step per stage, with an
//! interrupt checkpoint after every completed stage. Stops preserve the
//! reports already computed; failures are recorded on the ticker's state
//! and never propagate past the worker.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::context::TickerBinding;
use crate::domain::{
    AgentStatus, AnalystSection, Stage, StageReport, TickerHandle, TickerId, TickerPhase,
    TickerState,
};
use crate::executor::{
    AnalystRequest, OrderExecutor, PipelineConfig, StageExecutor, StageRequest,
};
use crate::gate::{Checkpoint, InterruptGate};
use crate::toolcall::{ToolCallLog, ToolCallStatus};

/// Internal failure of one step, with any partial output worth keeping.
struct StepFailure {
    error: crate::executor::StageError,
    partial: Option<StageReport>,
}

/// One ticker's pipeline run: executor seams, gate, audit log, config.
pub struct StagePipeline<'a> {
    executor: &'a dyn StageExecutor,
    orders: &'a dyn OrderExecutor,
    gate: &'a InterruptGate,
    log: &'a ToolCallLog,
    config: &'a PipelineConfig,
}

impl<'a> StagePipeline<'a> {
    pub fn new(
        executor: &'a dyn StageExecutor,
        orders: &'a dyn OrderExecutor,
        gate: &'a InterruptGate,
        log: &'a ToolCallLog,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            executor,
            orders,
            gate,
            log,
            config,
        }
    }

    /// Run the pipeline to a terminal state, publishing every completed
    /// stage through `handle` so polling readers see incremental progress.
    pub fn run(&self, ticker: &TickerId, handle: &TickerHandle) -> TickerState {
        let mut state = TickerState::pending(ticker.clone());
        state.started_at = Utc::now();

        // Entry checkpoint: a stop issued while this ticker was still
        // queued (or a pause in effect) is honored before any work.
        if self.gate.checkpoint(ticker) == Checkpoint::Stopped {
            state.mark_stopped();
            handle.publish(state.clone());
            return state;
        }

        let mut stage = Stage::Analysts;
        loop {
            state.phase = TickerPhase::InStage(stage);
            handle.publish(state.clone());

            if stage == Stage::Execution {
                self.run_execution(&mut state);
                state.mark_done();
                handle.publish(state.clone());
                return state;
            }

            let started = Instant::now();
            let mut result = self.run_step(stage, &state);
            let elapsed = started.elapsed();

            let budget = Duration::from_secs(self.config.stage_timeout_secs);
            if elapsed > budget {
                // An over-budget success still produced a report; keep it
                // as the failed stage's partial output.
                let partial = match result {
                    Err(failure) => failure.partial,
                    Ok(report) => Some(report),
                };
                result = Err(StepFailure {
                    error: crate::executor::StageError::Timeout {
                        stage,
                        budget_secs: self.config.stage_timeout_secs,
                    },
                    partial,
                });
            }

            match result {
                Ok(report) => {
                    self.record_step(stage, &state, elapsed, Ok(&report));

                    if stage == Stage::Decision {
                        match &report.decision {
                            Some(decision) => state.decision = Some(decision.clone()),
                            None => {
                                let error = crate::executor::StageError::Malformed(format!(
                                    "decision stage produced no decision for {ticker}"
                                ));
                                state.mark_failed(error.to_string());
                                handle.publish(state.clone());
                                return state;
                            }
                        }
                    }

                    state.push_report(stage, report);
                    handle.publish(state.clone());

                    match self.next_stage(stage, &state) {
                        None => {
                            state.mark_done();
                            handle.publish(state.clone());
                            return state;
                        }
                        Some(next) => {
                            if self.gate.checkpoint(ticker) == Checkpoint::Stopped {
                                state.mark_stopped();
                                handle.publish(state.clone());
                                return state;
                            }
                            stage = next;
                        }
                    }
                }
                Err(failure) => {
                    self.record_step_error(stage, &state, elapsed, &failure.error);
                    if let Some(partial) = failure.partial {
                        state.push_report(stage, partial);
                    }
                    state.mark_failed(failure.error.to_string());
                    handle.publish(state.clone());
                    return state;
                }
            }
        }
    }

    fn run_step(&self, stage: Stage, state: &TickerState) -> Result<StageReport, StepFailure> {
        match stage {
            Stage::Analysts => self.run_analysts(state),
            Stage::Execution => unreachable!("execution handled by run_execution"),
            _ => {
                let req = StageRequest {
                    stage,
                    ticker: &state.ticker,
                    reports: &state.reports,
                    config: self.config,
                };
                self.executor.execute_stage(&req).map_err(|error| StepFailure {
                    error,
                    partial: None,
                })
            }
        }
    }

    /// Analyst fan-out: one sub-call per configured persona, sequential
    /// or on scoped threads. Completed sections are preserved in the
    /// stage report even when the stage as a whole fails.
    fn run_analysts(&self, state: &TickerState) -> Result<StageReport, StepFailure> {
        let analysts = &self.config.analysts;
        let mut sections: Vec<AnalystSection> = analysts
            .iter()
            .map(|a| AnalystSection {
                analyst: *a,
                status: AgentStatus::Pending,
                text: String::new(),
            })
            .collect();
        let mut first_error = None;

        if self.config.parallel_analysts {
            let outcomes: Vec<Result<String, crate::executor::StageError>> =
                std::thread::scope(|scope| {
                    let handles: Vec<_> = analysts
                        .iter()
                        .map(|analyst| {
                            let ticker = state.ticker.clone();
                            scope.spawn(move || {
                                let _binding = TickerBinding::bind(ticker.clone());
                                let started = Instant::now();
                                let req = AnalystRequest {
                                    analyst: *analyst,
                                    ticker: &ticker,
                                    config: self.config,
                                };
                                let result = self.executor.execute_analyst(&req);
                                self.record_analyst(*analyst, &ticker, started.elapsed(), &result);
                                result
                            })
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| {
                            h.join().unwrap_or_else(|_| {
                                Err(crate::executor::StageError::Tool(
                                    "analyst sub-analysis panicked".into(),
                                ))
                            })
                        })
                        .collect()
                });

            for (section, outcome) in sections.iter_mut().zip(outcomes) {
                match outcome {
                    Ok(text) => {
                        section.status = AgentStatus::Completed;
                        section.text = text;
                    }
                    Err(error) => {
                        section.status = AgentStatus::Error;
                        section.text = error.to_string();
                        first_error.get_or_insert(error);
                    }
                }
            }
        } else {
            for (i, analyst) in analysts.iter().enumerate() {
                sections[i].status = AgentStatus::InProgress;
                let started = Instant::now();
                let req = AnalystRequest {
                    analyst: *analyst,
                    ticker: &state.ticker,
                    config: self.config,
                };
                let result = self.executor.execute_analyst(&req);
                self.record_analyst(*analyst, &state.ticker, started.elapsed(), &result);
                match result {
                    Ok(text) => {
                        sections[i].status = AgentStatus::Completed;
                        sections[i].text = text;
                    }
                    Err(error) => {
                        sections[i].status = AgentStatus::Error;
                        sections[i].text = error.to_string();
                        first_error = Some(error);
                        break;
                    }
                }
            }
        }

        let completed = sections
            .iter()
            .filter(|s| s.status == AgentStatus::Completed)
            .count();
        let report = StageReport {
            text: format!("{completed}/{} analyst reports completed", analysts.len()),
            decision: None,
            analyst_sections: sections,
        };

        match first_error {
            None => Ok(report),
            Some(error) => Err(StepFailure {
                error,
                partial: Some(report),
            }),
        }
    }

    /// Order placement. A broker failure is recorded on the state but
    /// does not retroactively invalidate the decision — the ticker still
    /// completes as Decided.
    fn run_execution(&self, state: &mut TickerState) {
        let Some(decision) = state.decision.clone() else {
            return;
        };
        let notional = self.config.order_notional;
        let started = Instant::now();
        let mut inputs = BTreeMap::new();
        inputs.insert("action".to_string(), decision.action.to_string());
        inputs.insert("notional".to_string(), format!("{notional:.2}"));

        match self
            .orders
            .place_order(&state.ticker, decision.action, notional)
        {
            Ok(order) => {
                self.log.record(
                    Stage::Execution,
                    "broker:place_order",
                    inputs,
                    format!("order {} accepted", order.order_id),
                    started.elapsed(),
                    ToolCallStatus::Success,
                );
                state.push_report(
                    Stage::Execution,
                    StageReport::text(format!(
                        "submitted {} {} for ${notional:.2} (order {})",
                        decision.action, state.ticker, order.order_id
                    )),
                );
                state.order = Some(order);
            }
            Err(error) => {
                self.log.record(
                    Stage::Execution,
                    "broker:place_order",
                    inputs,
                    error.to_string(),
                    started.elapsed(),
                    ToolCallStatus::Error,
                );
                state.push_report(
                    Stage::Execution,
                    StageReport::text(format!("order placement failed: {error}")),
                );
                state.error = Some(error.to_string());
            }
        }
    }

    fn next_stage(&self, stage: Stage, state: &TickerState) -> Option<Stage> {
        match stage {
            Stage::Decision => {
                let actionable = state
                    .decision
                    .as_ref()
                    .is_some_and(|d| d.action.is_actionable());
                (actionable && self.config.auto_execute).then_some(Stage::Execution)
            }
            Stage::Execution => None,
            other => other.next(),
        }
    }

    fn record_step(
        &self,
        stage: Stage,
        state: &TickerState,
        elapsed: Duration,
        result: Result<&StageReport, &crate::executor::StageError>,
    ) {
        let inputs = self.step_inputs(state);
        match result {
            Ok(report) => self.log.record(
                stage,
                format!("stage:{stage}"),
                inputs,
                report.text.clone(),
                elapsed,
                ToolCallStatus::Success,
            ),
            Err(error) => {
                let status = match error {
                    crate::executor::StageError::Timeout { .. } => ToolCallStatus::Timeout,
                    _ => ToolCallStatus::Error,
                };
                self.log.record(
                    stage,
                    format!("stage:{stage}"),
                    inputs,
                    error.to_string(),
                    elapsed,
                    status,
                );
            }
        }
    }

    fn record_step_error(
        &self,
        stage: Stage,
        state: &TickerState,
        elapsed: Duration,
        error: &crate::executor::StageError,
    ) {
        self.record_step(stage, state, elapsed, Err(error));
    }

    fn record_analyst(
        &self,
        analyst: crate::domain::Analyst,
        ticker: &TickerId,
        elapsed: Duration,
        result: &Result<String, crate::executor::StageError>,
    ) {
        let mut inputs = BTreeMap::new();
        inputs.insert("ticker".to_string(), ticker.to_string());
        inputs.insert("analyst".to_string(), analyst.to_string());
        match result {
            Ok(text) => self.log.record(
                Stage::Analysts,
                format!("analyst:{}", analyst.abbrev()),
                inputs,
                text.clone(),
                elapsed,
                ToolCallStatus::Success,
            ),
            Err(error) => self.log.record(
                Stage::Analysts,
                format!("analyst:{}", analyst.abbrev()),
                inputs,
                error.to_string(),
                elapsed,
                ToolCallStatus::Error,
            ),
        }
    }

    fn step_inputs(&self, state: &TickerState) -> BTreeMap<String, String> {
        let mut inputs = BTreeMap::new();
        inputs.insert("ticker".to_string(), state.ticker.to_string());
        inputs.insert(
            "debate_rounds".to_string(),
            self.config.debate_rounds.to_string(),
        );
        inputs.insert(
            "risk_rounds".to_string(),
            self.config.risk_rounds.to_string(),
        );
        inputs
    }
}
