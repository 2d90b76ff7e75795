//! Deterministic offline executor for tests and demo runs.
//!
//! Produces canned per-stage reports and a decision derived from the
//! ticker symbol, with configurable per-stage delay, failure injection,
//! and a completion hook tests use to coordinate pause/stop timing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::domain::{
    Analyst, Decision, OrderResult, Stage, StageReport, TickerId, TradeAction,
};
use crate::executor::{
    AnalystRequest, OrderError, OrderExecutor, StageError, StageExecutor, StageRequest,
};

type StageHook = dyn Fn(&TickerId, Stage) + Send + Sync;

/// Scripted stage executor: same symbol, same reports, every run.
#[derive(Default)]
pub struct ScriptedExecutor {
    stage_delay: Duration,
    fail_at: Mutex<HashMap<TickerId, Stage>>,
    fail_analyst_at: Mutex<HashMap<TickerId, Analyst>>,
    on_stage_complete: Option<Arc<StageHook>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated work per external step.
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    /// Make the given ticker's run fail when it reaches `stage`.
    pub fn fail_ticker_at(self, ticker: impl Into<TickerId>, stage: Stage) -> Self {
        self.fail_at.lock().unwrap().insert(ticker.into(), stage);
        self
    }

    /// Make one analyst sub-call fail for the given ticker.
    pub fn fail_analyst(self, ticker: impl Into<TickerId>, analyst: Analyst) -> Self {
        self.fail_analyst_at
            .lock()
            .unwrap()
            .insert(ticker.into(), analyst);
        self
    }

    /// Called after each successfully completed step, before the pipeline
    /// reaches its next checkpoint. For the Analysts stage the hook fires
    /// once per analyst sub-call (with `Stage::Analysts`), since that
    /// stage has no single stage-level call. Tests use this to issue
    /// pause/stop at exact stage boundaries.
    pub fn on_stage_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TickerId, Stage) + Send + Sync + 'static,
    {
        self.on_stage_complete = Some(Arc::new(hook));
        self
    }

    /// Deterministic decision for a symbol: spreads tickers across the
    /// action space so multi-ticker demos show a mix of calls.
    pub fn scripted_decision(ticker: &TickerId, allow_shorts: bool) -> Decision {
        let seed: u64 = ticker.as_str().bytes().map(u64::from).sum();
        let action = match (seed % 4, allow_shorts) {
            (0, _) => TradeAction::Buy,
            (1, _) => TradeAction::Hold,
            (2, _) => TradeAction::Sell,
            (3, true) => TradeAction::Short,
            (3, false) => TradeAction::Sell,
            _ => unreachable!(),
        };
        Decision {
            action,
            confidence: 0.5 + (seed % 50) as f64 / 100.0,
            reasoning: format!("scripted consensus for {ticker}"),
        }
    }

    fn simulate_work(&self) {
        if !self.stage_delay.is_zero() {
            std::thread::sleep(self.stage_delay);
        }
    }

    fn injected_failure(&self, ticker: &TickerId, stage: Stage) -> Option<StageError> {
        let fail_at = self.fail_at.lock().unwrap();
        (fail_at.get(ticker) == Some(&stage))
            .then(|| StageError::Tool(format!("injected failure at {stage} for {ticker}")))
    }
}

impl StageExecutor for ScriptedExecutor {
    fn execute_stage(&self, req: &StageRequest<'_>) -> Result<StageReport, StageError> {
        self.simulate_work();
        if let Some(error) = self.injected_failure(req.ticker, req.stage) {
            return Err(error);
        }

        let report = match req.stage {
            Stage::Debate => StageReport::text(format!(
                "bull/bear debate over {} rounds favors a {} stance on {}",
                req.config.debate_rounds,
                Self::scripted_decision(req.ticker, req.config.allow_shorts)
                    .action
                    .label(req.config.allow_shorts),
                req.ticker
            )),
            Stage::TradePlan => StageReport::text(format!(
                "trade plan for {}: scale in over two sessions, review at close",
                req.ticker
            )),
            Stage::RiskDebate => StageReport::text(format!(
                "risk committee ({} rounds) accepts the plan for {}",
                req.config.risk_rounds, req.ticker
            )),
            Stage::Decision => {
                let decision =
                    Self::scripted_decision(req.ticker, req.config.allow_shorts);
                StageReport {
                    text: format!(
                        "final call on {}: {} (confidence {:.2})",
                        req.ticker,
                        decision.action.label(req.config.allow_shorts),
                        decision.confidence
                    ),
                    decision: Some(decision),
                    analyst_sections: Vec::new(),
                }
            }
            other => StageReport::text(format!("scripted {other} report for {}", req.ticker)),
        };

        if let Some(hook) = &self.on_stage_complete {
            hook(req.ticker, req.stage);
        }
        Ok(report)
    }

    fn execute_analyst(&self, req: &AnalystRequest<'_>) -> Result<String, StageError> {
        self.simulate_work();
        {
            let fail = self.fail_analyst_at.lock().unwrap();
            if fail.get(req.ticker) == Some(&req.analyst) {
                return Err(StageError::Tool(format!(
                    "injected {} analyst failure for {}",
                    req.analyst, req.ticker
                )));
            }
        }
        if let Some(hook) = &self.on_stage_complete {
            hook(req.ticker, Stage::Analysts);
        }
        Ok(format!(
            "{} analyst report for {}: no anomalies in scripted data",
            req.analyst, req.ticker
        ))
    }
}

/// In-memory broker: accepts everything unless told to reject, and keeps
/// the orders it received for assertions.
#[derive(Default)]
pub struct ScriptedBroker {
    reject_all: bool,
    next_id: AtomicU64,
    placed: Mutex<Vec<OrderResult>>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject_all: true,
            ..Self::default()
        }
    }

    pub fn placed_orders(&self) -> Vec<OrderResult> {
        self.placed.lock().unwrap().clone()
    }
}

impl OrderExecutor for ScriptedBroker {
    fn place_order(
        &self,
        ticker: &TickerId,
        action: TradeAction,
        notional: f64,
    ) -> Result<OrderResult, OrderError> {
        if self.reject_all {
            return Err(OrderError::Rejected {
                ticker: ticker.clone(),
                reason: "scripted rejection".into(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let order = OrderResult {
            order_id: format!("scripted-{id}"),
            action,
            notional,
            submitted_at: Utc::now(),
        };
        self.placed.lock().unwrap().push(order.clone());
        Ok(order)
    }
}
