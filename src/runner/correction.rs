//! Retry-input correction.
//!
//! A retried attempt receives the original input plus a correction block that
//! describes why the previous attempt failed. How the executor uses it is up to
//! the executor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::validation::{Severity, StageValidationReport};

/// Key under which the correction block is attached to the input record.
pub const CORRECTION_KEY: &str = "_correction";

/// Key wrapping a non-object original input.
pub const WRAPPED_INPUT_KEY: &str = "input";

/// A failed CRITICAL check, as handed back to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCheck {
    pub name: String,
    pub message: String,
    pub severity: Severity,
}

/// Diagnostic data attached to a retried input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionBlock {
    /// Iteration the corrected input is for.
    pub iteration: u32,
    /// Output of the failing attempt.
    pub previous_output: Value,
    /// CRITICAL failures of the failing attempt's report, in report order.
    pub failed_checks: Vec<FailedCheck>,
    pub instructions: Option<String>,
}

impl CorrectionBlock {
    /// Build the block for `next_iteration` from the failing attempt.
    pub fn from_report(next_iteration: u32, previous_output: &Value, report: &StageValidationReport) -> Self {
        let failed_checks = report
            .critical_failures()
            .into_iter()
            .map(|r| FailedCheck {
                name: r.check_name.clone(),
                message: r.message.clone(),
                severity: r.severity,
            })
            .collect();

        Self {
            iteration: next_iteration,
            previous_output: previous_output.clone(),
            failed_checks,
            instructions: report.retry_instructions().map(str::to_string),
        }
    }

    /// The original input with this block attached.
    ///
    /// Object inputs get the block under [`CORRECTION_KEY`]; any other input is
    /// wrapped under [`WRAPPED_INPUT_KEY`] first. A stale block on the original
    /// is replaced. Fails only if the block cannot be encoded as JSON.
    pub fn attach(&self, original: &Value) -> Result<Value> {
        let mut record = match original {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert(WRAPPED_INPUT_KEY.to_string(), other.clone());
                map
            }
        };
        record.insert(CORRECTION_KEY.to_string(), serde_json::to_value(self)?);
        Ok(Value::Object(record))
    }

    /// Read a correction block back out of an executor input.
    pub fn extract(input: &Value) -> Option<Self> {
        input
            .get(CORRECTION_KEY)
            .and_then(|block| serde_json::from_value(block.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationResult;
    use chrono::Utc;
    use serde_json::json;

    fn failing_report() -> StageValidationReport {
        let now = Utc::now();
        StageValidationReport::new(
            "scrape",
            1,
            3,
            vec![
                ValidationResult::fail("required:title", Severity::Critical, "missing", now),
                ValidationResult::fail("tone", Severity::Warning, "too casual", now),
                ValidationResult::pass("unique", Severity::Critical, "ok", now),
            ],
        )
    }

    #[test]
    fn test_from_report_keeps_only_critical_failures() {
        let block = CorrectionBlock::from_report(2, &json!({"x": 1}), &failing_report());
        assert_eq!(block.iteration, 2);
        assert_eq!(block.previous_output, json!({"x": 1}));
        assert_eq!(
            block.failed_checks,
            vec![FailedCheck {
                name: "required:title".to_string(),
                message: "missing".to_string(),
                severity: Severity::Critical,
            }]
        );
        assert!(block.instructions.unwrap().contains("required:title"));
    }

    #[test]
    fn test_attach_preserves_original_fields() {
        let block = CorrectionBlock::from_report(2, &json!({}), &failing_report());
        let corrected = block.attach(&json!({"query": "bids", "_correction": "stale"})).unwrap();
        assert_eq!(corrected["query"], "bids");
        assert_eq!(corrected[CORRECTION_KEY]["iteration"], 2);
        assert_eq!(corrected[CORRECTION_KEY]["failed_checks"][0]["severity"], "CRITICAL");
    }

    #[test]
    fn test_attach_wraps_non_object_input() {
        let block = CorrectionBlock::from_report(2, &json!({}), &failing_report());
        let corrected = block.attach(&json!("raw query")).unwrap();
        assert_eq!(corrected[WRAPPED_INPUT_KEY], "raw query");
        assert!(corrected.get(CORRECTION_KEY).is_some());
    }

    #[test]
    fn test_extract() {
        let block = CorrectionBlock::from_report(3, &json!({"y": 2}), &failing_report());
        let corrected = block.attach(&json!({})).unwrap();
        assert_eq!(CorrectionBlock::extract(&corrected), Some(block));
        assert_eq!(CorrectionBlock::extract(&json!({"plain": true})), None);
    }

    #[test]
    fn test_attached_block_is_never_null() {
        let previous = json!({"nested": {"list": [1.5, null, "x"]}, "quote": "say \"hi\""});
        let block = CorrectionBlock::from_report(2, &previous, &failing_report());
        let corrected = block.attach(&json!(42)).unwrap();
        let attached = &corrected[CORRECTION_KEY];
        assert!(attached.is_object());
        assert_eq!(attached["previous_output"], previous);
        assert_eq!(CorrectionBlock::extract(&corrected), Some(block));
    }
}
