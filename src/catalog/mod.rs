//! Criteria catalog - declarative per-stage success criteria.
//!
//! The catalog is loaded once (YAML or JSON), compiled into typed gates, and is
//! read-only afterwards. It can be shared freely between concurrent loops.

mod criteria;

pub use criteria::{
    CatalogDefaults, CriteriaCatalog, DEFAULT_MAX_ITERATIONS, PerformanceBudget, QualityGate, StageCriteria,
};
