//! Loop summary record pushed to audit sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::{IterationMetrics, LoopState, LoopStatus};

/// Pass/fail counts for one iteration's report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCounts {
    pub iteration: u32,
    pub passed: usize,
    pub failed: usize,
    pub critical_failed: usize,
}

/// Summary of a finished loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSummary {
    pub loop_id: String,
    pub stage_name: String,
    pub status: LoopStatus,
    pub iteration_count: u32,
    pub total_cost: f64,
    pub total_external_calls: u64,
    pub duration_seconds: f64,
    pub validation_passed: bool,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub per_iteration_metrics: Vec<IterationMetrics>,
    pub validation_counts: Vec<ValidationCounts>,
    pub pending_evaluators: Vec<String>,
}

impl LoopSummary {
    pub fn from_state(state: &LoopState) -> Self {
        let metrics = state.iteration_metrics();
        let validation_counts = state
            .validation_history()
            .iter()
            .map(|report| ValidationCounts {
                iteration: report.iteration(),
                passed: report.passed_count(),
                failed: report.failed_count(),
                critical_failed: report.critical_failures().len(),
            })
            .collect();

        Self {
            loop_id: state.loop_id().to_string(),
            stage_name: state.stage_name().to_string(),
            status: state.status(),
            iteration_count: state.current_iteration(),
            total_cost: metrics.iter().map(|m| m.cost_estimate).sum(),
            total_external_calls: metrics.iter().map(|m| m.external_call_count).sum(),
            duration_seconds: state.duration_seconds(),
            validation_passed: state.last_report().is_some_and(|r| r.passed()),
            error_message: state.error_message().map(str::to_string),
            started_at: state.started_at(),
            completed_at: state.completed_at(),
            per_iteration_metrics: metrics.to_vec(),
            validation_counts,
            pending_evaluators: state.pending_evaluators().to_vec(),
        }
    }
}
