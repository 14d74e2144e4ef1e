//! Validation dispatcher.
//!
//! Routes a stage output through every required-output presence check, every
//! declared gate, and the optional performance budget, then folds the results
//! into a [`StageValidationReport`].

use std::sync::Arc;

use serde_json::Value;

use super::checks::Check;
use super::context::ValidationContext;
use super::result::{Severity, StageValidationReport, ValidationResult};
use crate::catalog::{CriteriaCatalog, PerformanceBudget, StageCriteria};
use crate::error::Result;

/// Check name for the presence check of a required output.
pub fn required_check_name(field: &str) -> String {
    format!("required:{}", field)
}

pub const DURATION_CHECK: &str = "performance:duration";
pub const EXTERNAL_CALLS_CHECK: &str = "performance:external_calls";

/// Validates stage outputs against a shared, read-only catalog.
#[derive(Debug, Clone)]
pub struct ValidationDispatcher {
    catalog: Arc<CriteriaCatalog>,
}

impl ValidationDispatcher {
    pub fn new(catalog: Arc<CriteriaCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &CriteriaCatalog {
        &self.catalog
    }

    /// Validate `output` for `stage_name`.
    ///
    /// Only an unknown stage is an error. Bad data always yields failed results.
    pub fn validate(&self, stage_name: &str, output: &Value, ctx: &ValidationContext) -> Result<StageValidationReport> {
        let criteria = self.catalog.stage(stage_name)?;
        Ok(Self::validate_criteria(criteria, output, ctx))
    }

    /// Validate against already-resolved criteria.
    pub fn validate_criteria(criteria: &StageCriteria, output: &Value, ctx: &ValidationContext) -> StageValidationReport {
        let mut results = Vec::with_capacity(criteria.required_outputs.len() + criteria.gates.len() + 2);

        for field in &criteria.required_outputs {
            let check = Check::Presence { field: field.clone() };
            results.push(check.evaluate(&required_check_name(field), Severity::Critical, output, ctx));
        }

        for gate in &criteria.gates {
            let severity = Severity::from_critical(gate.critical);
            results.push(gate.check.evaluate(&gate.name, severity, output, ctx));
        }

        if let Some(budget) = &criteria.performance {
            results.extend(performance_results(budget, ctx));
        }

        for result in &results {
            tracing::debug!(
                stage = %criteria.name,
                check = %result.check_name,
                passed = result.passed,
                severity = %result.severity,
                "Check evaluated"
            );
        }

        let report = StageValidationReport::new(&criteria.name, ctx.iteration(), ctx.max_iterations(), results);
        log::debug!(
            "Stage '{}' iteration {}: {}/{} checks passed, critical passed: {}",
            criteria.name,
            report.iteration(),
            report.passed_count(),
            report.results().len(),
            report.all_critical_passed()
        );
        report
    }
}

fn performance_results(budget: &PerformanceBudget, ctx: &ValidationContext) -> Vec<ValidationResult> {
    let now = ctx.now();
    let mut results = Vec::new();

    if let Some(limit) = budget.max_duration_seconds {
        let result = match ctx.duration_seconds() {
            None => ValidationResult::pass(DURATION_CHECK, Severity::Info, "Duration not measured", now),
            Some(actual) if actual <= limit => ValidationResult::pass(
                DURATION_CHECK,
                Severity::Warning,
                format!("Took {:.2}s (budget {:.2}s)", actual, limit),
                now,
            ),
            Some(actual) => ValidationResult::fail(
                DURATION_CHECK,
                Severity::Warning,
                format!("Took {:.2}s, over the {:.2}s budget", actual, limit),
                now,
            ),
        };
        let result = result.with_detail("limit", limit);
        results.push(match ctx.duration_seconds() {
            Some(actual) => result.with_detail("actual", actual),
            None => result,
        });
    }

    if let Some(limit) = budget.max_external_calls {
        let result = match ctx.external_calls() {
            None => ValidationResult::pass(EXTERNAL_CALLS_CHECK, Severity::Info, "External calls not measured", now),
            Some(actual) if actual <= limit => ValidationResult::pass(
                EXTERNAL_CALLS_CHECK,
                Severity::Warning,
                format!("Made {} external call(s) (budget {})", actual, limit),
                now,
            ),
            Some(actual) => ValidationResult::fail(
                EXTERNAL_CALLS_CHECK,
                Severity::Warning,
                format!("Made {} external call(s), over the budget of {}", actual, limit),
                now,
            ),
        };
        let result = result.with_detail("limit", limit);
        results.push(match ctx.external_calls() {
            Some(actual) => result.with_detail("actual", actual),
            None => result,
        });
    }

    results
}
