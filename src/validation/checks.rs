//! Validation check library.
//!
//! Every gate in the catalog compiles into one [`Check`] variant carrying its
//! typed parameters. Evaluation is pure: it reads the stage output, the static
//! parameters, and the [`ValidationContext`], and never fails. Malformed data
//! turns into a failed [`ValidationResult`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::context::ValidationContext;
use super::result::{Severity, ValidationResult};

/// Default absolute tolerance for `formula_equality` gates.
pub const FORMULA_TOLERANCE: f64 = 0.01;

/// Label used by `threshold_classification` when the ratio clears no threshold.
pub const DEFAULT_CLASSIFICATION_LABEL: &str = "NONE";

/// Numeric type a `type_range` gate coerces to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericType {
    Integer,
    #[default]
    Float,
}

/// Fixed formulas a `formula_equality` gate can recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Formula {
    Sum { fields: Vec<String> },
    Product { fields: Vec<String> },
    Difference { minuend: String, subtrahend: String },
    Ratio { numerator: String, denominator: String },
}

impl Formula {
    /// Recompute the expected value from the output's fields.
    pub fn evaluate(&self, output: &Value) -> Result<f64, String> {
        match self {
            Formula::Sum { fields } => fields
                .iter()
                .try_fold(0.0, |acc, f| -> Result<f64, String> { Ok(acc + operand(output, f)?) }),
            Formula::Product { fields } => fields
                .iter()
                .try_fold(1.0, |acc, f| -> Result<f64, String> { Ok(acc * operand(output, f)?) }),
            Formula::Difference { minuend, subtrahend } => Ok(operand(output, minuend)? - operand(output, subtrahend)?),
            Formula::Ratio { numerator, denominator } => {
                let d = operand(output, denominator)?;
                if d == 0.0 {
                    return Err(format!("denominator '{}' is zero", denominator));
                }
                Ok(operand(output, numerator)? / d)
            }
        }
    }

    /// Human-readable rendering, e.g. `base + fee`.
    pub fn describe(&self) -> String {
        match self {
            Formula::Sum { fields } => fields.join(" + "),
            Formula::Product { fields } => fields.join(" * "),
            Formula::Difference { minuend, subtrahend } => format!("{} - {}", minuend, subtrahend),
            Formula::Ratio { numerator, denominator } => format!("{} / {}", numerator, denominator),
        }
    }
}

fn operand(output: &Value, field: &str) -> Result<f64, String> {
    let value = present(output, field).ok_or_else(|| format!("operand '{}' is missing", field))?;
    as_number(value).ok_or_else(|| format!("operand '{}' is not numeric: {}", field, value))
}

/// Where a `threshold_classification` gate reads its ratio from.
#[derive(Debug, Clone, PartialEq)]
pub enum RatioSource {
    Field(String),
    Quotient { numerator: String, denominator: String },
}

impl RatioSource {
    fn resolve(&self, output: &Value) -> Result<f64, String> {
        match self {
            RatioSource::Field(field) => operand(output, field),
            RatioSource::Quotient { numerator, denominator } => Formula::Ratio {
                numerator: numerator.clone(),
                denominator: denominator.clone(),
            }
            .evaluate(output),
        }
    }
}

/// One check kind with its typed parameters.
#[derive(Debug, Clone)]
pub enum Check {
    Presence {
        field: String,
    },
    Pattern {
        field: String,
        regex: Regex,
    },
    Unique {
        field: String,
    },
    FutureDate {
        field: String,
    },
    SourceAttribution {
        expected: String,
    },
    TypeRange {
        field: String,
        numeric_type: NumericType,
        min: Option<f64>,
    },
    Enumeration {
        field: String,
        allowed: Vec<Value>,
    },
    NumericRange {
        field: String,
        min: f64,
        max: f64,
    },
    FormulaEquality {
        field: String,
        formula: Formula,
        tolerance: f64,
    },
    ThresholdClassification {
        ratio: RatioSource,
        label_field: String,
        /// Sorted by threshold, highest first.
        thresholds: Vec<(String, f64)>,
        default_label: String,
    },
    FileExists {
        field: String,
    },
    ForbiddenTerms {
        terms: Vec<String>,
    },
    ExternalState {
        key: String,
        expected: Value,
    },
    /// Declared kind this library does not know.
    Unimplemented {
        kind: String,
    },
}

#[derive(Deserialize)]
struct FieldParams {
    field: String,
}

#[derive(Deserialize)]
struct PatternParams {
    field: String,
    pattern: String,
}

#[derive(Deserialize)]
struct SourceParams {
    expected: String,
}

#[derive(Deserialize)]
struct TypeRangeParams {
    field: String,
    #[serde(rename = "type", default)]
    numeric_type: NumericType,
    min: Option<f64>,
}

#[derive(Deserialize)]
struct EnumerationParams {
    field: String,
    allowed: Vec<Value>,
}

#[derive(Deserialize)]
struct RangeParams {
    field: String,
    min: f64,
    max: f64,
}

#[derive(Deserialize)]
struct FormulaParams {
    field: String,
    formula: Formula,
    tolerance: Option<f64>,
}

#[derive(Deserialize)]
struct ThresholdParams {
    ratio_field: Option<String>,
    numerator: Option<String>,
    denominator: Option<String>,
    label_field: String,
    thresholds: BTreeMap<String, f64>,
    default_label: Option<String>,
}

#[derive(Deserialize)]
struct ForbiddenParams {
    terms: Vec<String>,
}

#[derive(Deserialize)]
struct ExternalStateParams {
    key: String,
    expected: Option<Value>,
}

fn parse<T: DeserializeOwned>(kind: &str, params: &Map<String, Value>) -> Result<T, String> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| format!("invalid '{}' parameters: {}", kind, e))
}

impl Check {
    /// Compile a check from its kind name and raw parameters.
    ///
    /// Unknown kinds compile to [`Check::Unimplemented`]; known kinds with
    /// malformed parameters are an error.
    pub fn compile(kind: &str, params: &Map<String, Value>) -> Result<Self, String> {
        let check = match kind {
            "presence" => {
                let p: FieldParams = parse(kind, params)?;
                Check::Presence { field: p.field }
            }
            "pattern" => {
                let p: PatternParams = parse(kind, params)?;
                let regex = Regex::new(&p.pattern).map_err(|e| format!("invalid regex '{}': {}", p.pattern, e))?;
                Check::Pattern { field: p.field, regex }
            }
            "unique" => {
                let p: FieldParams = parse(kind, params)?;
                Check::Unique { field: p.field }
            }
            "future_date" => {
                let p: FieldParams = parse(kind, params)?;
                Check::FutureDate { field: p.field }
            }
            "source_attribution" => {
                let p: SourceParams = parse(kind, params)?;
                if p.expected.trim().is_empty() {
                    return Err("'expected' source must not be empty".to_string());
                }
                Check::SourceAttribution { expected: p.expected }
            }
            "type_range" => {
                let p: TypeRangeParams = parse(kind, params)?;
                Check::TypeRange {
                    field: p.field,
                    numeric_type: p.numeric_type,
                    min: p.min,
                }
            }
            "enumeration" => {
                let p: EnumerationParams = parse(kind, params)?;
                if p.allowed.is_empty() {
                    return Err("'allowed' must list at least one value".to_string());
                }
                Check::Enumeration {
                    field: p.field,
                    allowed: p.allowed,
                }
            }
            "numeric_range" => {
                let p: RangeParams = parse(kind, params)?;
                if p.min > p.max {
                    return Err(format!("min {} is greater than max {}", p.min, p.max));
                }
                Check::NumericRange {
                    field: p.field,
                    min: p.min,
                    max: p.max,
                }
            }
            "formula_equality" => {
                let p: FormulaParams = parse(kind, params)?;
                if matches!(&p.formula, Formula::Sum { fields } | Formula::Product { fields } if fields.is_empty()) {
                    return Err("formula needs at least one field".to_string());
                }
                let tolerance = p.tolerance.unwrap_or(FORMULA_TOLERANCE);
                if tolerance.is_nan() || tolerance <= 0.0 {
                    return Err(format!("tolerance must be positive, got {}", tolerance));
                }
                Check::FormulaEquality {
                    field: p.field,
                    formula: p.formula,
                    tolerance,
                }
            }
            "threshold_classification" => {
                let p: ThresholdParams = parse(kind, params)?;
                let ratio = match (p.ratio_field, p.numerator, p.denominator) {
                    (Some(field), None, None) => RatioSource::Field(field),
                    (None, Some(numerator), Some(denominator)) => RatioSource::Quotient { numerator, denominator },
                    _ => return Err("specify either 'ratio_field' or both 'numerator' and 'denominator'".to_string()),
                };
                if p.thresholds.is_empty() {
                    return Err("'thresholds' must not be empty".to_string());
                }
                let mut thresholds: Vec<(String, f64)> = p.thresholds.into_iter().collect();
                thresholds.sort_by(|a, b| b.1.total_cmp(&a.1));
                Check::ThresholdClassification {
                    ratio,
                    label_field: p.label_field,
                    thresholds,
                    default_label: p.default_label.unwrap_or_else(|| DEFAULT_CLASSIFICATION_LABEL.to_string()),
                }
            }
            "file_exists" => {
                let p: FieldParams = parse(kind, params)?;
                Check::FileExists { field: p.field }
            }
            "forbidden_terms" => {
                let p: ForbiddenParams = parse(kind, params)?;
                Check::ForbiddenTerms { terms: p.terms }
            }
            "external_state" => {
                let p: ExternalStateParams = parse(kind, params)?;
                Check::ExternalState {
                    key: p.key,
                    expected: p.expected.unwrap_or(Value::Bool(true)),
                }
            }
            other => Check::Unimplemented { kind: other.to_string() },
        };
        Ok(check)
    }

    /// Kind name as written in the catalog.
    pub fn kind(&self) -> &str {
        match self {
            Check::Presence { .. } => "presence",
            Check::Pattern { .. } => "pattern",
            Check::Unique { .. } => "unique",
            Check::FutureDate { .. } => "future_date",
            Check::SourceAttribution { .. } => "source_attribution",
            Check::TypeRange { .. } => "type_range",
            Check::Enumeration { .. } => "enumeration",
            Check::NumericRange { .. } => "numeric_range",
            Check::FormulaEquality { .. } => "formula_equality",
            Check::ThresholdClassification { .. } => "threshold_classification",
            Check::FileExists { .. } => "file_exists",
            Check::ForbiddenTerms { .. } => "forbidden_terms",
            Check::ExternalState { .. } => "external_state",
            Check::Unimplemented { kind } => kind,
        }
    }

    /// Run the check against a stage output.
    pub fn evaluate(&self, name: &str, severity: Severity, output: &Value, ctx: &ValidationContext) -> ValidationResult {
        let judge = Judge {
            name,
            severity,
            now: ctx.now(),
        };
        match self {
            Check::Presence { field } => check_presence(&judge, output, field),
            Check::Pattern { field, regex } => check_pattern(&judge, output, field, regex),
            Check::Unique { field } => check_unique(&judge, output, field),
            Check::FutureDate { field } => check_future_date(&judge, output, field),
            Check::SourceAttribution { expected } => check_source(&judge, output, expected),
            Check::TypeRange {
                field,
                numeric_type,
                min,
            } => check_type_range(&judge, output, field, *numeric_type, *min),
            Check::Enumeration { field, allowed } => check_enumeration(&judge, output, field, allowed),
            Check::NumericRange { field, min, max } => check_numeric_range(&judge, output, field, *min, *max),
            Check::FormulaEquality {
                field,
                formula,
                tolerance,
            } => check_formula(&judge, output, field, formula, *tolerance),
            Check::ThresholdClassification {
                ratio,
                label_field,
                thresholds,
                default_label,
            } => check_classification(&judge, output, ratio, label_field, thresholds, default_label),
            Check::FileExists { field } => check_file_exists(&judge, output, field),
            Check::ForbiddenTerms { terms } => check_forbidden_terms(&judge, output, terms),
            Check::ExternalState { key, expected } => check_external_state(&judge, ctx, key, expected),
            Check::Unimplemented { kind } => ValidationResult::pass(
                name,
                Severity::Info,
                format!("Check kind '{}' is not implemented; skipped", kind),
                ctx.now(),
            )
            .with_detail("kind", kind.as_str()),
        }
    }
}

/// Builds results stamped with one check's name, severity and clock.
struct Judge<'a> {
    name: &'a str,
    severity: Severity,
    now: DateTime<Utc>,
}

impl Judge<'_> {
    fn pass(&self, message: impl Into<String>) -> ValidationResult {
        ValidationResult::pass(self.name, self.severity, message, self.now)
    }

    fn fail(&self, message: impl Into<String>) -> ValidationResult {
        ValidationResult::fail(self.name, self.severity, message, self.now)
    }

    fn missing(&self, field: &str) -> ValidationResult {
        self.fail(format!("Field '{}' is missing or null", field))
            .with_detail("field", field)
    }
}

/// Resolve a dotted path (`a.b.0.c`) inside an output record.
pub fn lookup<'a>(output: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(output, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Like [`lookup`], treating `null` as absent.
pub fn present<'a>(output: &'a Value, path: &str) -> Option<&'a Value> {
    lookup(output, path).filter(|v| !v.is_null())
}

/// Numeric coercion: numbers, and strings that parse as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn check_presence(judge: &Judge, output: &Value, field: &str) -> ValidationResult {
    match present(output, field) {
        Some(_) => judge.pass(format!("Field '{}' is present", field)).with_detail("field", field),
        None => judge.missing(field),
    }
}

fn check_pattern(judge: &Judge, output: &Value, field: &str, regex: &Regex) -> ValidationResult {
    let Some(value) = present(output, field) else {
        return judge.missing(field);
    };
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let total = items.len();
    let matched = items
        .iter()
        .filter(|v| scalar_text(v).is_some_and(|s| regex.is_match(&s)))
        .count();

    let result = if total > 0 && matched == total {
        judge.pass(format!("{}/{} value(s) of '{}' match {}", matched, total, field, regex.as_str()))
    } else {
        judge.fail(format!("{}/{} value(s) of '{}' match {}", matched, total, field, regex.as_str()))
    };
    result
        .with_detail("field", field)
        .with_detail("pattern", regex.as_str())
        .with_detail("matched", matched)
        .with_detail("total", total)
}

fn check_unique(judge: &Judge, output: &Value, field: &str) -> ValidationResult {
    let Some(value) = present(output, field) else {
        return judge.missing(field);
    };
    let Value::Array(items) = value else {
        return judge
            .fail(format!("Field '{}' is not a list", field))
            .with_detail("field", field);
    };

    let mut seen = HashSet::new();
    let mut duplicates: Vec<Value> = Vec::new();
    for item in items {
        let key = item.to_string();
        if !seen.insert(key) && !duplicates.contains(item) {
            duplicates.push(item.clone());
        }
    }

    if duplicates.is_empty() {
        judge
            .pass(format!("All {} value(s) of '{}' are unique", items.len(), field))
            .with_detail("field", field)
    } else {
        let listed: Vec<String> = duplicates.iter().map(|d| d.to_string()).collect();
        judge
            .fail(format!("Field '{}' has duplicate value(s): {}", field, listed.join(", ")))
            .with_detail("field", field)
            .with_detail("duplicates", Value::Array(duplicates))
    }
}

/// Parse an ISO-8601-like timestamp; date-only and naive values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn check_future_date(judge: &Judge, output: &Value, field: &str) -> ValidationResult {
    let Some(value) = present(output, field) else {
        return judge.missing(field);
    };
    let Some(text) = value.as_str() else {
        return judge
            .fail(format!("Field '{}' is not a date string: {}", field, value))
            .with_detail("field", field);
    };
    let Some(parsed) = parse_timestamp(text) else {
        return judge
            .fail(format!("Field '{}' is not a valid date: '{}'", field, text))
            .with_detail("field", field)
            .with_detail("value", text);
    };

    let result = if parsed > judge.now {
        judge.pass(format!("Date '{}' is in the future", text))
    } else {
        judge.fail(format!("Date '{}' is not in the future (evaluated at {})", text, judge.now.to_rfc3339()))
    };
    result
        .with_detail("field", field)
        .with_detail("value", text)
        .with_detail("evaluated_at", judge.now.to_rfc3339())
}

fn check_source(judge: &Judge, output: &Value, expected: &str) -> ValidationResult {
    let source = ["source", "dataSource"]
        .iter()
        .find_map(|field| present(output, field).and_then(Value::as_str));
    let Some(source) = source else {
        return judge
            .fail("Output has no 'source' or 'dataSource' field")
            .with_detail("expected", expected);
    };

    let result = if source.to_lowercase().contains(&expected.to_lowercase()) {
        judge.pass(format!("Source '{}' attributes '{}'", source, expected))
    } else {
        judge.fail(format!("Source '{}' does not mention '{}'", source, expected))
    };
    result.with_detail("expected", expected).with_detail("actual", source)
}

fn check_type_range(
    judge: &Judge,
    output: &Value,
    field: &str,
    numeric_type: NumericType,
    min: Option<f64>,
) -> ValidationResult {
    let Some(value) = present(output, field) else {
        return judge.missing(field);
    };
    let coerced = as_number(value).filter(|n| numeric_type == NumericType::Float || n.fract() == 0.0);
    let Some(number) = coerced else {
        return judge
            .fail(format!("Field '{}' cannot be coerced to {:?}: {}", field, numeric_type, value))
            .with_detail("field", field)
            .with_detail("value", value.clone());
    };

    match min {
        Some(min) if number < min => judge
            .fail(format!("Field '{}' = {} is below minimum {}", field, number, min))
            .with_detail("field", field)
            .with_detail("actual", number)
            .with_detail("min", min),
        _ => judge
            .pass(format!("Field '{}' = {} is a valid {:?}", field, number, numeric_type))
            .with_detail("field", field)
            .with_detail("actual", number),
    }
}

fn check_enumeration(judge: &Judge, output: &Value, field: &str, allowed: &[Value]) -> ValidationResult {
    let Some(value) = present(output, field) else {
        return judge.missing(field);
    };
    let result = if allowed.contains(value) {
        judge.pass(format!("Field '{}' = {} is allowed", field, value))
    } else {
        let listed: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
        judge.fail(format!("Field '{}' = {} is not one of [{}]", field, value, listed.join(", ")))
    };
    result
        .with_detail("field", field)
        .with_detail("actual", value.clone())
        .with_detail("allowed", Value::Array(allowed.to_vec()))
}

fn check_numeric_range(judge: &Judge, output: &Value, field: &str, min: f64, max: f64) -> ValidationResult {
    let Some(value) = present(output, field) else {
        return judge.missing(field);
    };
    let Some(number) = as_number(value) else {
        return judge
            .fail(format!("Field '{}' is not numeric: {}", field, value))
            .with_detail("field", field);
    };

    let result = if (min..=max).contains(&number) {
        judge.pass(format!("Field '{}' = {} is within [{}, {}]", field, number, min, max))
    } else {
        judge.fail(format!("Field '{}' = {} is outside [{}, {}]", field, number, min, max))
    };
    result
        .with_detail("field", field)
        .with_detail("actual", number)
        .with_detail("min", min)
        .with_detail("max", max)
}

fn check_formula(judge: &Judge, output: &Value, field: &str, formula: &Formula, tolerance: f64) -> ValidationResult {
    let expected = match formula.evaluate(output) {
        Ok(expected) => expected,
        Err(reason) => {
            return judge
                .fail(format!("Cannot recompute '{}' = {}: {}", field, formula.describe(), reason))
                .with_detail("field", field)
                .with_detail("formula", formula.describe());
        }
    };
    let actual = match present(output, field).map(as_number) {
        Some(Some(actual)) => actual,
        Some(None) => {
            return judge
                .fail(format!("Field '{}' is not numeric", field))
                .with_detail("field", field);
        }
        None => return judge.missing(field),
    };

    let difference = (actual - expected).abs();
    let result = if difference < tolerance {
        judge.pass(format!("'{}' = {} matches {} = {}", field, actual, formula.describe(), expected))
    } else {
        judge.fail(format!(
            "'{}' = {} differs from {} = {} by {} (tolerance {})",
            field,
            actual,
            formula.describe(),
            expected,
            difference,
            tolerance
        ))
    };
    result
        .with_detail("field", field)
        .with_detail("formula", formula.describe())
        .with_detail("expected", expected)
        .with_detail("actual", actual)
        .with_detail("difference", difference)
        .with_detail("tolerance", tolerance)
}

/// Label for `ratio`: the highest threshold it reaches, else `default_label`.
pub fn classify<'a>(ratio: f64, thresholds: &'a [(String, f64)], default_label: &'a str) -> &'a str {
    thresholds
        .iter()
        .find(|(_, threshold)| ratio >= *threshold)
        .map(|(label, _)| label.as_str())
        .unwrap_or(default_label)
}

fn check_classification(
    judge: &Judge,
    output: &Value,
    ratio: &RatioSource,
    label_field: &str,
    thresholds: &[(String, f64)],
    default_label: &str,
) -> ValidationResult {
    let ratio = match ratio.resolve(output) {
        Ok(ratio) => ratio,
        Err(reason) => {
            return judge
                .fail(format!("Cannot compute classification ratio: {}", reason))
                .with_detail("label_field", label_field);
        }
    };
    let Some(actual) = present(output, label_field) else {
        return judge.missing(label_field);
    };
    let actual = scalar_text(actual).unwrap_or_else(|| actual.to_string());
    let expected = classify(ratio, thresholds, default_label);

    let result = if actual == expected {
        judge.pass(format!("Classification '{}' matches ratio {:.4}", actual, ratio))
    } else {
        judge.fail(format!(
            "Classification mismatch: actual '{}', expected '{}' for ratio {:.4}",
            actual, expected, ratio
        ))
    };
    result
        .with_detail("ratio", ratio)
        .with_detail("expected", expected)
        .with_detail("actual", actual)
}

fn check_file_exists(judge: &Judge, output: &Value, field: &str) -> ValidationResult {
    let Some(value) = present(output, field) else {
        return judge.missing(field);
    };
    let Some(path) = value.as_str() else {
        return judge
            .fail(format!("Field '{}' is not a path string", field))
            .with_detail("field", field);
    };

    let result = if Path::new(path).exists() {
        judge.pass(format!("File '{}' exists", path))
    } else {
        judge.fail(format!("File '{}' does not exist", path))
    };
    result.with_detail("field", field).with_detail("path", path)
}

fn check_forbidden_terms(judge: &Judge, output: &Value, terms: &[String]) -> ValidationResult {
    // Serialized text escapes quotes, backslashes and control characters, so
    // raw string leaves and keys are scanned as well.
    let text = output.to_string();
    let mut leaves = Vec::new();
    collect_text(output, &mut leaves);
    let found: Vec<Value> = terms
        .iter()
        .filter(|term| !term.is_empty())
        .filter(|term| text.contains(term.as_str()) || leaves.iter().any(|leaf| leaf.contains(term.as_str())))
        .map(|term| Value::String(term.clone()))
        .collect();

    if found.is_empty() {
        judge.pass(format!("None of {} forbidden term(s) found", terms.len()))
    } else {
        let listed: Vec<&str> = found.iter().filter_map(Value::as_str).collect();
        judge
            .fail(format!("Output contains forbidden term(s): {}", listed.join(", ")))
            .with_detail("found", Value::Array(found))
    }
}

fn collect_text<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, out)),
        Value::Object(map) => {
            for (key, item) in map {
                out.push(key);
                collect_text(item, out);
            }
        }
        _ => {}
    }
}

fn check_external_state(judge: &Judge, ctx: &ValidationContext, key: &str, expected: &Value) -> ValidationResult {
    match ctx.state(key) {
        Some(actual) if actual == expected => judge
            .pass(format!("External state '{}' = {}", key, actual))
            .with_detail("key", key),
        Some(actual) => judge
            .fail(format!("External state '{}' = {}, expected {}", key, actual, expected))
            .with_detail("key", key)
            .with_detail("expected", expected.clone())
            .with_detail("actual", actual.clone()),
        None => judge
            .fail(format!("No external state recorded for '{}'", key))
            .with_detail("key", key)
            .with_detail("expected", expected.clone()),
    }
}
