//! Catalog document model and compilation.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StageLoopError};
use crate::validation::Check;

/// Iteration ceiling used when neither the catalog nor the caller sets one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Prefixes the dispatcher reserves for the check names it generates.
const RESERVED_PREFIXES: &[&str] = &["required:", "performance:", "execution"];

/// Catalog-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogDefaults {
    /// Default iteration ceiling for every stage.
    #[serde(alias = "maxIterations")]
    pub max_iterations: u32,
}

impl Default for CatalogDefaults {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Optional performance budget for a stage. Exceeding it only warns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceBudget {
    #[serde(alias = "maxDurationSeconds")]
    pub max_duration_seconds: Option<f64>,

    #[serde(alias = "maxExternalCalls")]
    pub max_external_calls: Option<u64>,
}

/// A named, compiled gate.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub name: String,
    pub check: Check,
    pub critical: bool,
}

/// Compiled criteria for one stage.
#[derive(Debug, Clone)]
pub struct StageCriteria {
    pub name: String,
    pub required_outputs: Vec<String>,
    /// Gates in declaration order.
    pub gates: Vec<QualityGate>,
    pub performance: Option<PerformanceBudget>,
    /// Post-hoc evaluators, run later once outcome data exists.
    pub evaluators: Vec<String>,
}

impl StageCriteria {
    pub fn gate(&self, name: &str) -> Option<&QualityGate> {
        self.gates.iter().find(|g| g.name == name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogDocument {
    defaults: CatalogDefaults,
    stages: BTreeMap<String, StageDocument>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StageDocument {
    #[serde(alias = "requiredOutputs")]
    required_outputs: Vec<String>,

    // Mapping keeps declaration order.
    #[serde(alias = "qualityGates")]
    quality_gates: serde_yaml::Mapping,

    performance: Option<PerformanceBudget>,

    evaluators: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GateDocument {
    #[serde(alias = "check_type")]
    check: String,

    #[serde(default, alias = "isCritical")]
    critical: bool,

    #[serde(flatten)]
    params: Map<String, Value>,
}

/// The full catalog, keyed by stage name.
#[derive(Debug, Clone)]
pub struct CriteriaCatalog {
    defaults: CatalogDefaults,
    stages: BTreeMap<String, StageCriteria>,
}

impl CriteriaCatalog {
    /// Load and compile a catalog file.
    ///
    /// An unreadable file is an IO error; anything wrong with its content is a
    /// catalog error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let catalog = Self::parse(&content)
            .map_err(|e| StageLoopError::Catalog(format!("{}: {}", path.display(), e)))?;
        log::info!(
            "Loaded criteria catalog from {} ({} stage(s))",
            path.display(),
            catalog.stages.len()
        );
        Ok(catalog)
    }

    /// Parse and compile a catalog document. JSON is accepted as YAML.
    pub fn parse(content: &str) -> Result<Self> {
        let document: CatalogDocument =
            serde_yaml::from_str(content).map_err(|e| StageLoopError::Catalog(e.to_string()))?;
        Self::compile(document)
    }

    fn compile(document: CatalogDocument) -> Result<Self> {
        if document.defaults.max_iterations == 0 {
            return Err(StageLoopError::Catalog("defaults.max_iterations must be > 0".to_string()));
        }
        if document.stages.is_empty() {
            return Err(StageLoopError::Catalog("catalog declares no stages".to_string()));
        }

        let mut stages = BTreeMap::new();
        for (name, stage) in document.stages {
            let criteria = compile_stage(&name, stage)?;
            stages.insert(name, criteria);
        }

        Ok(Self {
            defaults: document.defaults,
            stages,
        })
    }

    /// Criteria for `name`; an unknown stage is a configuration error.
    pub fn stage(&self, name: &str) -> Result<&StageCriteria> {
        self.stages
            .get(name)
            .ok_or_else(|| StageLoopError::UnknownStage(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageCriteria> {
        self.stages.values()
    }

    pub fn default_max_iterations(&self) -> u32 {
        self.defaults.max_iterations
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

fn compile_stage(stage: &str, document: StageDocument) -> Result<StageCriteria> {
    let err = |msg: String| StageLoopError::Catalog(format!("stage '{}': {}", stage, msg));

    let mut seen = HashSet::new();
    for field in &document.required_outputs {
        if field.trim().is_empty() {
            return Err(err("required output names must not be empty".to_string()));
        }
        if !seen.insert(field.as_str()) {
            return Err(err(format!("required output '{}' is listed twice", field)));
        }
    }

    let mut gates = Vec::with_capacity(document.quality_gates.len());
    for (key, value) in document.quality_gates {
        let Some(name) = key.as_str().map(str::to_string) else {
            return Err(err(format!("gate names must be strings, got {:?}", key)));
        };
        if RESERVED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            return Err(err(format!("gate name '{}' uses a reserved prefix", name)));
        }
        let gate: GateDocument =
            serde_yaml::from_value(value).map_err(|e| err(format!("gate '{}': {}", name, e)))?;
        let check = Check::compile(&gate.check, &gate.params).map_err(|e| err(format!("gate '{}': {}", name, e)))?;
        if let Check::Unimplemented { kind } = &check {
            log::warn!("Stage '{}' gate '{}' uses unimplemented check kind '{}'", stage, name, kind);
        }
        gates.push(QualityGate {
            name,
            check,
            critical: gate.critical,
        });
    }

    if let Some(budget) = &document.performance {
        if budget.max_duration_seconds.is_some_and(|s| s.is_nan() || s < 0.0) {
            return Err(err("performance.max_duration_seconds must be >= 0".to_string()));
        }
    }

    Ok(StageCriteria {
        name: stage.to_string(),
        required_outputs: document.required_outputs,
        gates,
        performance: document.performance,
        evaluators: document.evaluators,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CATALOG: &str = r#"
defaults:
  max_iterations: 4
stages:
  scrape:
    required_outputs: [caseNumbers, source]
    quality_gates:
      unique_cases:
        check: unique
        field: caseNumbers
        critical: true
      from_sam:
        check: source_attribution
        expected: sam.gov
      sentiment:
        check: sentiment
    performance:
      max_duration_seconds: 30
      max_external_calls: 10
    evaluators: [win_rate]
  score:
    requiredOutputs: [score]
    qualityGates:
      in_range:
        check: numeric_range
        field: score
        min: 0
        max: 100
        isCritical: true
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = CriteriaCatalog::parse(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.default_max_iterations(), 4);
        assert_eq!(catalog.stage_names().collect::<Vec<_>>(), vec!["scrape", "score"]);

        let scrape = catalog.stage("scrape").unwrap();
        assert_eq!(scrape.required_outputs, vec!["caseNumbers", "source"]);
        let names: Vec<&str> = scrape.gates.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["unique_cases", "from_sam", "sentiment"]);
        assert!(scrape.gate("unique_cases").unwrap().critical);
        assert!(!scrape.gate("from_sam").unwrap().critical);
        assert_eq!(scrape.gate("sentiment").unwrap().check.kind(), "sentiment");
        assert_eq!(scrape.performance.as_ref().unwrap().max_external_calls, Some(10));
        assert_eq!(scrape.evaluators, vec!["win_rate"]);
    }

    #[test]
    fn test_camel_case_aliases() {
        let catalog = CriteriaCatalog::parse(CATALOG).unwrap();
        let score = catalog.stage("score").unwrap();
        assert_eq!(score.required_outputs, vec!["score"]);
        assert!(score.gate("in_range").unwrap().critical);
    }

    #[test]
    fn test_json_catalog() {
        let json = r#"{"stages": {"s": {"required_outputs": ["a"]}}}"#;
        let catalog = CriteriaCatalog::parse(json).unwrap();
        assert!(catalog.contains("s"));
        assert_eq!(catalog.default_max_iterations(), DEFAULT_MAX_ITERATIONS);
    }

    #[test]
    fn test_unknown_stage_is_config_error() {
        let catalog = CriteriaCatalog::parse(CATALOG).unwrap();
        let err = catalog.stage("nope").unwrap_err();
        assert!(matches!(err, StageLoopError::UnknownStage(ref s) if s == "nope"));
    }

    #[test]
    fn test_malformed_gate_is_catalog_error() {
        let yaml = r#"
stages:
  s:
    quality_gates:
      bad:
        check: pattern
        field: x
        pattern: "(["
"#;
        let err = CriteriaCatalog::parse(yaml).unwrap_err();
        assert!(matches!(err, StageLoopError::Catalog(_)));
        assert!(err.to_string().contains("gate 'bad'"));
    }

    #[test]
    fn test_reserved_gate_name_rejected() {
        let yaml = r#"
stages:
  s:
    quality_gates:
      "required:x":
        check: presence
        field: x
"#;
        assert!(CriteriaCatalog::parse(yaml).is_err());
    }

    #[test]
    fn test_duplicate_required_output_rejected() {
        let yaml = "stages:\n  s:\n    required_outputs: [a, a]\n";
        assert!(CriteriaCatalog::parse(yaml).is_err());
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(CriteriaCatalog::parse("stages: {}").is_err());
        assert!(CriteriaCatalog::parse("defaults:\n  max_iterations: 0\nstages:\n  s: {}\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let catalog = CriteriaCatalog::load(file.path()).unwrap();
        assert!(catalog.contains("scrape"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = CriteriaCatalog::load("/no/such/catalog.yml").unwrap_err();
        assert!(matches!(err, StageLoopError::Io(_)));
    }
}
