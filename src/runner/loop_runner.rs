//! Loop controller implementation - executes a stage until its output passes.
//!
//! The LoopController drives one stage through execute -> validate -> decide,
//! retrying with a corrected input until the CRITICAL gates pass or the
//! iteration budget is spent.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use super::cancel::CancelToken;
use super::correction::CorrectionBlock;
use super::executor::StageExecutor;
use super::state::{IterationTimer, LoopState, LoopStatus};
use crate::audit::{AuditEmitter, AuditSink, UsageMeter, UsageSnapshot};
use crate::catalog::{CriteriaCatalog, StageCriteria};
use crate::error::Result;
use crate::validation::{
    Severity, StageValidationReport, StateProvider, ValidationContext, ValidationDispatcher, ValidationResult,
};

/// Check name used for the synthetic report of an attempt whose executor raised.
pub const EXECUTION_CHECK: &str = "execution";

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Result of one controller invocation.
///
/// Domain-level failures never surface as errors; they show up here with
/// `success == false`.
#[derive(Debug, Clone)]
pub struct LoopRun {
    pub success: bool,
    pub final_output: Option<Value>,
    pub state: LoopState,
}

/// Configuration for the LoopController.
#[derive(Debug, Clone)]
pub struct LoopControllerConfig {
    /// Iteration ceiling; falls back to the catalog default when unset
    pub max_iterations: Option<u32>,
    /// Fixed pause before retrying
    pub retry_delay: Duration,
}

impl Default for LoopControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Per-invocation options.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Overrides the controller's iteration ceiling
    pub max_iterations: Option<u32>,
    /// Abandons the loop when cancelled
    pub cancel: Option<CancelToken>,
    /// Context facts visible to `external_state` gates
    pub facts: Map<String, Value>,
    /// Meter counting only this invocation's external calls
    pub usage: Option<Arc<dyn UsageMeter>>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("max_iterations", &self.max_iterations)
            .field("cancel", &self.cancel)
            .field("facts", &self.facts)
            .field("usage", &self.usage.as_ref().map(|meter| meter.snapshot()))
            .finish()
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn fact(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    /// Meter the invocation with `meter`. It must count this invocation's
    /// calls alone; give each run its own [`crate::audit::CostLedger::child`].
    pub fn usage(mut self, meter: Arc<dyn UsageMeter>) -> Self {
        self.usage = Some(meter);
        self
    }
}

/// LoopController runs one stage with criteria-driven retries.
///
/// Each iteration:
/// 1. Calls the executor with the current input
/// 2. Validates the output against the stage's catalog entry
/// 3. On success: completes with the output
/// 4. On critical failure with budget left: attaches a correction block to the
///    original input and tries again after a short pause
/// 5. On critical failure at the ceiling: fails with a summary
///
/// Executor errors are retried with the same input. A controller holds no
/// per-invocation state, so one instance can serve concurrent invocations.
pub struct LoopController {
    criteria: StageCriteria,
    default_max_iterations: u32,
    config: LoopControllerConfig,
    emitter: AuditEmitter,
    state_provider: Option<Arc<dyn StateProvider>>,
}

impl LoopController {
    /// Create a controller for `stage_name`. Unknown stages fail here, before
    /// anything runs.
    pub fn new(catalog: &CriteriaCatalog, stage_name: &str) -> Result<Self> {
        Self::with_config(catalog, stage_name, LoopControllerConfig::default())
    }

    /// Create a controller with custom configuration.
    pub fn with_config(catalog: &CriteriaCatalog, stage_name: &str, config: LoopControllerConfig) -> Result<Self> {
        let criteria = catalog.stage(stage_name)?.clone();
        Ok(Self {
            criteria,
            default_max_iterations: catalog.default_max_iterations(),
            config,
            emitter: AuditEmitter::default(),
            state_provider: None,
        })
    }

    /// Forward loop summaries to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.emitter = AuditEmitter::new(sink);
        self
    }

    /// Ask `provider` for external state facts before each validation.
    pub fn with_state_provider(mut self, provider: Arc<dyn StateProvider>) -> Self {
        self.state_provider = Some(provider);
        self
    }

    pub fn stage_name(&self) -> &str {
        &self.criteria.name
    }

    /// Iteration ceiling used when the invocation does not override it.
    pub fn max_iterations(&self) -> u32 {
        self.config.max_iterations.unwrap_or(self.default_max_iterations)
    }

    /// Run the stage with default options.
    pub async fn run<E>(&self, executor: &E, input: Value) -> LoopRun
    where
        E: StageExecutor + ?Sized,
    {
        self.run_with_options(executor, input, RunOptions::default()).await
    }

    /// Run the stage until it passes, fails, runs out of budget, or is cancelled.
    pub async fn run_with_options<E>(&self, executor: &E, input: Value, options: RunOptions) -> LoopRun
    where
        E: StageExecutor + ?Sized,
    {
        let max_iterations = options.max_iterations.unwrap_or_else(|| self.max_iterations());
        let cancel = options.cancel.clone().unwrap_or_default();
        let usage = options.usage.as_deref();
        let mut state = LoopState::new(&self.criteria.name, max_iterations, self.criteria.evaluators.clone());
        log::info!(
            "Loop {}: starting stage '{}' (max {} iteration(s))",
            state.loop_id(),
            self.criteria.name,
            max_iterations
        );

        let original_input = input;
        let mut current_input = original_input.clone();

        for iteration in 1..=max_iterations {
            state.begin_iteration(iteration);
            let timer = IterationTimer::start(iteration, &self.criteria.name, usage_snapshot(usage));

            let executed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = executor.execute(&current_input, iteration) => Some(result),
            };

            let output = match executed {
                None => {
                    self.record_execution_failure(&mut state, timer, usage, "cancelled while executing");
                    self.cancel_loop(&mut state);
                    break;
                }
                Some(Err(err)) => {
                    log::warn!(
                        "Loop {}: executor failed on iteration {}/{}: {}",
                        state.loop_id(),
                        iteration,
                        max_iterations,
                        err
                    );
                    let retry = self.record_execution_failure(&mut state, timer, usage, err.message());
                    if !retry {
                        let last_output = state.last_stage_output().cloned();
                        state.finish(LoopStatus::Failed, last_output, Some(err.message().to_string()));
                        break;
                    }
                    // Same input next time: an execution error says nothing about the input.
                    if !self.pause(&cancel).await {
                        self.cancel_loop(&mut state);
                        break;
                    }
                    continue;
                }
                Some(Ok(output)) => output,
            };

            state.transition(LoopStatus::Validating);
            let ctx = self.context_for(iteration, max_iterations, &timer, usage, &options.facts, &output);
            let report = ValidationDispatcher::validate_criteria(&self.criteria, &output, &ctx);
            let passed = report.passed();
            let retry = report.retry_required();

            let correction = retry.then(|| CorrectionBlock::from_report(iteration + 1, &output, &report));
            let failure_summary = (!passed && !retry).then(|| summarize_failure(&self.criteria.name, &report));
            log_report(state.loop_id(), &report);

            state.record_output(output.clone());
            state.record_report(report);
            state.record_metrics(timer.seal(usage_snapshot(usage), passed, retry, None));

            if passed {
                state.finish(LoopStatus::Completed, Some(output), None);
                break;
            }

            if let Some(correction) = correction {
                current_input = match correction.attach(&original_input) {
                    Ok(corrected) => corrected,
                    Err(err) => {
                        log::error!("Loop {}: could not attach correction: {}", state.loop_id(), err);
                        state.finish(
                            LoopStatus::Failed,
                            Some(output),
                            Some(format!("Could not attach correction: {}", err)),
                        );
                        break;
                    }
                };
                state.transition(LoopStatus::Retrying);
                if !self.pause(&cancel).await {
                    self.cancel_loop(&mut state);
                    break;
                }
                continue;
            }

            state.finish(LoopStatus::Failed, Some(output), failure_summary);
            break;
        }

        if !state.status().is_terminal() {
            let last_output = state.last_stage_output().cloned();
            state.finish(
                LoopStatus::MaxIterations,
                last_output,
                Some(format!(
                    "Iteration budget of {} exhausted without passing validation",
                    max_iterations
                )),
            );
        }

        log::info!(
            "Loop {}: stage '{}' finished with {} after {} iteration(s)",
            state.loop_id(),
            self.criteria.name,
            state.status(),
            state.current_iteration()
        );
        self.emitter.emit(&state).await;

        LoopRun {
            success: state.status() == LoopStatus::Completed,
            final_output: state.final_result().cloned(),
            state,
        }
    }

    fn context_for(
        &self,
        iteration: u32,
        max_iterations: u32,
        timer: &IterationTimer,
        usage: Option<&dyn UsageMeter>,
        facts: &Map<String, Value>,
        output: &Value,
    ) -> ValidationContext {
        let mut ctx = ValidationContext::new(iteration, max_iterations)
            .with_duration_seconds(timer.elapsed_seconds())
            .with_facts(facts.clone());
        if let Some(meter) = usage {
            ctx = ctx.with_external_calls(timer.usage_since_start(meter.snapshot()).external_calls);
        }
        if let Some(provider) = &self.state_provider {
            ctx = ctx.with_facts(provider.facts(&self.criteria.name, output));
        }
        ctx
    }

    /// Record a synthetic report and sealed metrics for an attempt that produced
    /// no output. Returns whether budget remains for another attempt.
    fn record_execution_failure(
        &self,
        state: &mut LoopState,
        timer: IterationTimer,
        usage: Option<&dyn UsageMeter>,
        message: &str,
    ) -> bool {
        let iteration = state.current_iteration();
        let result = ValidationResult::fail(
            EXECUTION_CHECK,
            Severity::Critical,
            format!("Executor failed: {}", message),
            chrono::Utc::now(),
        );
        let report = StageValidationReport::new(&self.criteria.name, iteration, state.max_iterations(), vec![result]);
        let retry = report.retry_required();
        state.record_report(report);
        state.record_metrics(timer.seal(usage_snapshot(usage), false, retry, Some(message.to_string())));
        retry
    }

    fn cancel_loop(&self, state: &mut LoopState) {
        log::info!("Loop {}: cancelled on iteration {}", state.loop_id(), state.current_iteration());
        let last_output = state.last_stage_output().cloned();
        state.finish(LoopStatus::Cancelled, last_output, Some("Loop cancelled".to_string()));
    }

    /// Wait out the retry delay. Returns false if cancelled meanwhile.
    async fn pause(&self, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if self.config.retry_delay.is_zero() {
            return true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.retry_delay) => true,
        }
    }
}

fn usage_snapshot(usage: Option<&dyn UsageMeter>) -> UsageSnapshot {
    usage.map(|meter| meter.snapshot()).unwrap_or_default()
}

fn log_report(loop_id: &str, report: &StageValidationReport) {
    if report.passed() {
        log::info!(
            "Loop {}: iteration {} passed ({} warning(s))",
            loop_id,
            report.iteration(),
            report.warnings().len()
        );
    } else {
        let names: Vec<&str> = report.critical_failures().iter().map(|r| r.check_name.as_str()).collect();
        log::info!(
            "Loop {}: iteration {} failed critical checks [{}], retry: {}",
            loop_id,
            report.iteration(),
            names.join(", "),
            report.retry_required()
        );
    }
}

fn summarize_failure(stage_name: &str, report: &StageValidationReport) -> String {
    let failures: Vec<String> = report
        .critical_failures()
        .iter()
        .map(|r| format!("{} ({})", r.check_name, r.message))
        .collect();
    format!(
        "Stage '{}' failed {} critical check(s) on iteration {}: {}",
        stage_name,
        failures.len(),
        report.iteration(),
        failures.join("; ")
    )
}
