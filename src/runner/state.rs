//! Loop state - the single-writer aggregate for one controller invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::UsageSnapshot;
use crate::id::generate_loop_id;
use crate::validation::StageValidationReport;

/// Status of a loop invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopStatus {
    /// Created, no iteration started yet
    Initializing,
    /// Executor call in flight
    Running,
    /// Output being checked
    Validating,
    /// Waiting before the next attempt
    Retrying,
    /// Validation passed
    Completed,
    /// Definitive failure
    Failed,
    /// Ran out of iteration budget without a definitive outcome
    MaxIterations,
    /// Abandoned through a cancel token
    Cancelled,
}

impl LoopStatus {
    /// Returns true if the loop cannot continue from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopStatus::Completed | LoopStatus::Failed | LoopStatus::MaxIterations | LoopStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: LoopStatus) -> bool {
        use LoopStatus::{Cancelled, Completed, Failed, Initializing, MaxIterations, Retrying, Running, Validating};
        match (self, next) {
            (Initializing, Running | MaxIterations | Cancelled) => true,
            (Running, Running | Validating | Failed | Cancelled) => true,
            (Validating, Completed | Retrying | Failed) => true,
            (Retrying, Running | Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Initializing => "INITIALIZING",
            LoopStatus::Running => "RUNNING",
            LoopStatus::Validating => "VALIDATING",
            LoopStatus::Retrying => "RETRYING",
            LoopStatus::Completed => "COMPLETED",
            LoopStatus::Failed => "FAILED",
            LoopStatus::MaxIterations => "MAX_ITERATIONS",
            LoopStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sealed metrics for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationMetrics {
    pub iteration: u32,
    pub stage_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub external_call_count: u64,
    pub cost_estimate: f64,
    pub validation_passed: bool,
    pub retry_required: bool,
    /// Executor error for this attempt, if it raised.
    pub execution_error: Option<String>,
}

/// An attempt in progress. Sealing it consumes the timer, so metrics cannot
/// change once recorded.
#[derive(Debug)]
pub struct IterationTimer {
    iteration: u32,
    stage_name: String,
    started_at: DateTime<Utc>,
    started: std::time::Instant,
    usage_before: UsageSnapshot,
}

impl IterationTimer {
    pub fn start(iteration: u32, stage_name: impl Into<String>, usage_before: UsageSnapshot) -> Self {
        Self {
            iteration,
            stage_name: stage_name.into(),
            started_at: Utc::now(),
            started: std::time::Instant::now(),
            usage_before,
        }
    }

    /// Seconds since the attempt started.
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Usage consumed since the attempt started.
    pub fn usage_since_start(&self, usage_now: UsageSnapshot) -> UsageSnapshot {
        usage_now.since(&self.usage_before)
    }

    pub fn seal(
        self,
        usage_now: UsageSnapshot,
        validation_passed: bool,
        retry_required: bool,
        execution_error: Option<String>,
    ) -> IterationMetrics {
        let usage = usage_now.since(&self.usage_before);
        IterationMetrics {
            iteration: self.iteration,
            stage_name: self.stage_name,
            started_at: self.started_at,
            completed_at: Utc::now(),
            duration_seconds: self.started.elapsed().as_secs_f64(),
            external_call_count: usage.external_calls,
            cost_estimate: usage.cost,
            validation_passed,
            retry_required,
            execution_error,
        }
    }
}

/// Root aggregate for one invocation of the loop controller.
///
/// Only the controller mutates it, and only until `completed_at` is set.
#[derive(Debug, Clone, Serialize)]
pub struct LoopState {
    loop_id: String,
    status: LoopStatus,
    current_iteration: u32,
    max_iterations: u32,
    stage_name: String,
    last_stage_output: Option<Value>,
    validation_history: Vec<StageValidationReport>,
    iteration_metrics: Vec<IterationMetrics>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    final_result: Option<Value>,
    error_message: Option<String>,
    pending_evaluators: Vec<String>,
}

impl LoopState {
    pub fn new(stage_name: impl Into<String>, max_iterations: u32, pending_evaluators: Vec<String>) -> Self {
        let stage_name = stage_name.into();
        Self {
            loop_id: generate_loop_id(&stage_name),
            status: LoopStatus::Initializing,
            current_iteration: 0,
            max_iterations,
            stage_name,
            last_stage_output: None,
            validation_history: Vec::new(),
            iteration_metrics: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            final_result: None,
            error_message: None,
            pending_evaluators,
        }
    }

    pub fn loop_id(&self) -> &str {
        &self.loop_id
    }

    pub fn status(&self) -> LoopStatus {
        self.status
    }

    pub fn current_iteration(&self) -> u32 {
        self.current_iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn last_stage_output(&self) -> Option<&Value> {
        self.last_stage_output.as_ref()
    }

    pub fn validation_history(&self) -> &[StageValidationReport] {
        &self.validation_history
    }

    pub fn iteration_metrics(&self) -> &[IterationMetrics] {
        &self.iteration_metrics
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn final_result(&self) -> Option<&Value> {
        self.final_result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Evaluators to run once actual outcome data is available.
    pub fn pending_evaluators(&self) -> &[String] {
        &self.pending_evaluators
    }

    pub fn is_sealed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Latest report, if any iteration ran.
    pub fn last_report(&self) -> Option<&StageValidationReport> {
        self.validation_history.last()
    }

    /// Wall-clock seconds from start to completion (or now).
    pub fn duration_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub(crate) fn transition(&mut self, next: LoopStatus) {
        if self.is_sealed() {
            log::warn!("Loop {}: ignoring transition to {} after completion", self.loop_id, next);
            return;
        }
        debug_assert!(
            self.status.can_transition_to(next),
            "invalid transition {} -> {}",
            self.status,
            next
        );
        log::debug!("Loop {}: {} -> {}", self.loop_id, self.status, next);
        self.status = next;
    }

    pub(crate) fn begin_iteration(&mut self, iteration: u32) {
        self.transition(LoopStatus::Running);
        self.current_iteration = iteration;
    }

    pub(crate) fn record_output(&mut self, output: Value) {
        if !self.is_sealed() {
            self.last_stage_output = Some(output);
        }
    }

    pub(crate) fn record_report(&mut self, report: StageValidationReport) {
        if !self.is_sealed() {
            self.validation_history.push(report);
        }
    }

    pub(crate) fn record_metrics(&mut self, metrics: IterationMetrics) {
        if !self.is_sealed() {
            self.iteration_metrics.push(metrics);
        }
    }

    /// Move to a terminal status and seal the state.
    pub(crate) fn finish(&mut self, status: LoopStatus, final_result: Option<Value>, error_message: Option<String>) {
        debug_assert!(status.is_terminal(), "finish with non-terminal status {}", status);
        self.transition(status);
        if self.is_sealed() {
            return;
        }
        self.final_result = final_result;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
    }
}
