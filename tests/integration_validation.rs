//! Catalog and dispatcher integration tests
//!
//! Loads catalogs from disk and validates stage outputs end to end, without a
//! loop controller.

use serde_json::json;
use stageloop::catalog::CriteriaCatalog;
use stageloop::error::StageLoopError;
use stageloop::validation::{Severity, ValidationContext, ValidationDispatcher, required_check_name};
use std::sync::Arc;
use tempfile::TempDir;

fn dispatcher(yaml: &str) -> ValidationDispatcher {
    ValidationDispatcher::new(Arc::new(CriteriaCatalog::parse(yaml).unwrap()))
}

fn ctx() -> ValidationContext {
    ValidationContext::new(1, 3)
}

fn pricing_catalog(tolerance: u32) -> String {
    format!(
        r#"
stages:
  pricing:
    required_outputs: [total]
    quality_gates:
      total_matches:
        check: formula_equality
        field: total
        formula:
          op: sum
          fields: [base, fee]
        tolerance: {}
        critical: true
"#,
        tolerance
    )
}

/// A total 100 short of its recomputed value fails at tolerance 100 and passes at 200.
#[test]
fn test_formula_tolerance_boundary() {
    let output = json!({"base": 10000, "fee": 100, "total": 10000});

    let report = dispatcher(&pricing_catalog(100)).validate("pricing", &output, &ctx()).unwrap();
    let result = report.result("total_matches").unwrap();
    assert!(!result.passed);
    assert_eq!(result.severity, Severity::Critical);
    assert!(!report.passed());

    let report = dispatcher(&pricing_catalog(200)).validate("pricing", &output, &ctx()).unwrap();
    assert!(report.result("total_matches").unwrap().passed);
    assert!(report.passed());
}

/// A ratio of 0.80 earns BID; an output claiming REVIEW fails and names both labels.
#[test]
fn test_classification_mismatch_names_both_labels() {
    let dispatcher = dispatcher(
        r#"
stages:
  bid_decision:
    required_outputs: [decision]
    quality_gates:
      decision_matches_ratio:
        check: threshold_classification
        ratio_field: winRatio
        label_field: decision
        thresholds:
          BID: 0.75
          REVIEW: 0.60
        critical: true
"#,
    );

    let report = dispatcher
        .validate("bid_decision", &json!({"winRatio": 0.80, "decision": "REVIEW"}), &ctx())
        .unwrap();
    let result = report.result("decision_matches_ratio").unwrap();
    assert!(!result.passed);
    assert_eq!(result.severity, Severity::Critical);
    assert!(result.message.contains("REVIEW"));
    assert!(result.message.contains("BID"));

    let report = dispatcher
        .validate("bid_decision", &json!({"winRatio": 0.80, "decision": "BID"}), &ctx())
        .unwrap();
    assert!(report.passed());
}

#[test]
fn test_only_critical_failures_gate_success() {
    let dispatcher = dispatcher(
        r#"
stages:
  listing:
    required_outputs: [title]
    quality_gates:
      status_known:
        check: enumeration
        field: status
        allowed: [open, closed]
      no_lorem:
        check: forbidden_terms
        terms: [lorem ipsum]
      mystery:
        check: sentiment_score
    performance:
      max_duration_seconds: 10
"#,
    );

    let output = json!({"title": "lorem ipsum dolor", "status": "pending"});
    let report = dispatcher.validate("listing", &output, &ctx()).unwrap();

    assert!(report.passed());
    assert!(!report.retry_required());
    assert!(report.retry_instructions().is_none());
    assert_eq!(report.warnings().len(), 2);

    let mystery = report.result("mystery").unwrap();
    assert!(mystery.passed);
    assert_eq!(mystery.severity, Severity::Info);
}

#[test]
fn test_report_order_required_then_gates() {
    let dispatcher = dispatcher(
        r#"
stages:
  scrape:
    required_outputs: [items, source]
    quality_gates:
      zeta:
        check: unique
        field: items
      alpha:
        check: presence
        field: fetchedAt
"#,
    );

    let report = dispatcher.validate("scrape", &json!({"items": [1, 2]}), &ctx()).unwrap();
    let names: Vec<&str> = report.results().iter().map(|r| r.check_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            required_check_name("items").as_str(),
            required_check_name("source").as_str(),
            "zeta",
            "alpha",
        ]
    );
    assert!(!report.passed());
    assert!(report.retry_required());
}

#[test]
fn test_load_json_catalog_from_disk() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("criteria.json");
    std::fs::write(
        &path,
        serde_json::to_string_pretty(&json!({
            "defaults": {"maxIterations": 4},
            "stages": {
                "scrape": {
                    "requiredOutputs": ["items"],
                    "qualityGates": {
                        "listing_id": {"check_type": "pattern", "field": "id", "pattern": "^L-\\d+$", "isCritical": true}
                    }
                }
            }
        }))
        .unwrap(),
    )
    .unwrap();

    let catalog = CriteriaCatalog::load(&path).unwrap();
    assert_eq!(catalog.default_max_iterations(), 4);
    let gate = catalog.stage("scrape").unwrap().gate("listing_id").unwrap();
    assert!(gate.critical);

    let dispatcher = ValidationDispatcher::new(Arc::new(catalog));
    let ok = dispatcher
        .validate("scrape", &json!({"items": [], "id": "L-42"}), &ctx())
        .unwrap();
    assert!(ok.passed());
    let bad = dispatcher
        .validate("scrape", &json!({"items": [], "id": "X-42"}), &ctx())
        .unwrap();
    assert!(!bad.passed());
}

#[test]
fn test_load_rejects_bad_regex() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("criteria.yml");
    std::fs::write(
        &path,
        r#"
stages:
  scrape:
    quality_gates:
      broken:
        check: pattern
        field: id
        pattern: "(["
"#,
    )
    .unwrap();

    let err = CriteriaCatalog::load(&path).unwrap_err();
    assert!(matches!(err, StageLoopError::Catalog(_)));
}

#[test]
fn test_unknown_stage_rejected() {
    let dispatcher = dispatcher(&pricing_catalog(1));
    let err = dispatcher.validate("appraisal", &json!({}), &ctx()).unwrap_err();
    assert!(matches!(err, StageLoopError::UnknownStage(_)));
}

#[test]
fn test_validation_is_repeatable() {
    let dispatcher = dispatcher(&pricing_catalog(1));
    let output = json!({"base": 1, "fee": 2, "total": 3});
    let ctx = ctx().at(chrono::Utc::now());
    let first = dispatcher.validate("pricing", &output, &ctx).unwrap();
    let second = dispatcher.validate("pricing", &output, &ctx).unwrap();
    assert_eq!(first, second);
}
