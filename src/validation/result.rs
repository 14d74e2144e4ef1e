//! Validation results and per-iteration reports.
//!
//! A `ValidationResult` is produced by exactly one check. A
//! `StageValidationReport` aggregates every result for one iteration and derives
//! the pass/retry decision from the CRITICAL results alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How much a failed check matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Blocks success; triggers a retry.
    Critical,
    /// Reported only.
    Warning,
    /// Reported only.
    Info,
}

impl Severity {
    /// Severity implied by a gate's `critical` flag.
    pub fn from_critical(critical: bool) -> Self {
        if critical { Severity::Critical } else { Severity::Warning }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Check name, unique within a report.
    pub check_name: String,

    /// Whether the check passed.
    pub passed: bool,

    /// Severity of the check.
    pub severity: Severity,

    /// Human-readable message.
    pub message: String,

    /// Structured payload (expected/actual values, counts, ...).
    pub details: Map<String, Value>,

    /// Evaluation time taken from the validation context clock.
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    /// Create a passing result.
    pub fn pass(
        check_name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            passed: true,
            severity,
            message: message.into(),
            details: Map::new(),
            timestamp,
        }
    }

    /// Create a failing result.
    pub fn fail(
        check_name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            passed: false,
            severity,
            message: message.into(),
            details: Map::new(),
            timestamp,
        }
    }

    /// Attach a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// True when this result blocks success.
    pub fn is_critical_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Critical
    }
}

/// Aggregate of all check results for one iteration.
///
/// The derived fields are computed once in [`StageValidationReport::new`] and the
/// report is read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageValidationReport {
    stage_name: String,
    iteration: u32,
    results: Vec<ValidationResult>,
    all_critical_passed: bool,
    retry_required: bool,
    retry_instructions: Option<String>,
}

impl StageValidationReport {
    /// Build a report, deriving the gating fields from `results`.
    ///
    /// `max_iterations` is the loop's iteration ceiling; a retry is only
    /// required while `iteration < max_iterations`.
    pub fn new(
        stage_name: impl Into<String>,
        iteration: u32,
        max_iterations: u32,
        results: Vec<ValidationResult>,
    ) -> Self {
        let all_critical_passed = !results.iter().any(ValidationResult::is_critical_failure);
        let retry_required = !all_critical_passed && iteration < max_iterations;
        let retry_instructions = if all_critical_passed {
            None
        } else {
            Some(render_instructions(iteration, &results))
        };

        Self {
            stage_name: stage_name.into(),
            iteration,
            results,
            all_critical_passed,
            retry_required,
            retry_instructions,
        }
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    /// The report's success predicate: no CRITICAL result failed.
    pub fn passed(&self) -> bool {
        self.all_critical_passed
    }

    pub fn all_critical_passed(&self) -> bool {
        self.all_critical_passed
    }

    pub fn retry_required(&self) -> bool {
        self.retry_required
    }

    pub fn retry_instructions(&self) -> Option<&str> {
        self.retry_instructions.as_deref()
    }

    /// Failed CRITICAL results, in report order.
    pub fn critical_failures(&self) -> Vec<&ValidationResult> {
        self.results.iter().filter(|r| r.is_critical_failure()).collect()
    }

    /// Failed non-critical results.
    pub fn warnings(&self) -> Vec<&ValidationResult> {
        self.results
            .iter()
            .filter(|r| !r.passed && r.severity != Severity::Critical)
            .collect()
    }

    /// Look up a result by check name.
    pub fn result(&self, check_name: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.check_name == check_name)
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }
}

fn render_instructions(iteration: u32, results: &[ValidationResult]) -> String {
    let failures: Vec<&ValidationResult> = results.iter().filter(|r| r.is_critical_failure()).collect();
    let mut out = format!(
        "Iteration {} failed {} critical check(s). Fix the following before resubmitting:\n",
        iteration,
        failures.len()
    );
    for failure in failures {
        out.push_str(&format!("- {}: {}\n", failure.check_name, failure.message));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_severity_serializes_uppercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        assert_eq!(Severity::Warning.to_string(), "WARNING");
    }

    #[test]
    fn test_severity_from_critical() {
        assert_eq!(Severity::from_critical(true), Severity::Critical);
        assert_eq!(Severity::from_critical(false), Severity::Warning);
    }

    #[test]
    fn test_result_with_detail() {
        let result = ValidationResult::fail("range", Severity::Critical, "out of range", at())
            .with_detail("min", 0)
            .with_detail("actual", -3);
        assert!(!result.passed);
        assert_eq!(result.details["min"], 0);
        assert_eq!(result.details["actual"], -3);
        assert!(result.is_critical_failure());
    }

    #[test]
    fn test_report_passes_with_only_warning_failures() {
        let report = StageValidationReport::new(
            "score",
            1,
            5,
            vec![
                ValidationResult::pass("a", Severity::Critical, "ok", at()),
                ValidationResult::fail("b", Severity::Warning, "meh", at()),
                ValidationResult::fail("c", Severity::Info, "fyi", at()),
            ],
        );
        assert!(report.passed());
        assert!(!report.retry_required());
        assert!(report.retry_instructions().is_none());
        assert_eq!(report.warnings().len(), 2);
    }

    #[test]
    fn test_report_critical_failure_requires_retry_within_budget() {
        let report = StageValidationReport::new(
            "score",
            2,
            3,
            vec![ValidationResult::fail("a", Severity::Critical, "missing", at())],
        );
        assert!(!report.passed());
        assert!(report.retry_required());
        let instructions = report.retry_instructions().unwrap();
        assert!(instructions.contains("Iteration 2"));
        assert!(instructions.contains("- a: missing"));
    }

    #[test]
    fn test_report_no_retry_at_ceiling() {
        let report = StageValidationReport::new(
            "score",
            3,
            3,
            vec![ValidationResult::fail("a", Severity::Critical, "missing", at())],
        );
        assert!(!report.passed());
        assert!(!report.retry_required());
    }

    #[test]
    fn test_report_counts_and_lookup() {
        let report = StageValidationReport::new(
            "score",
            1,
            3,
            vec![
                ValidationResult::pass("a", Severity::Critical, "ok", at()),
                ValidationResult::fail("b", Severity::Critical, "bad", at()),
            ],
        );
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.critical_failures().len(), 1);
        assert_eq!(report.result("b").unwrap().message, "bad");
        assert!(report.result("zzz").is_none());
    }
}
