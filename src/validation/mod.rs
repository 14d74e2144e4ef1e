//! Validation system - check library, dispatcher, and reports.
//!
//! Gates are declared in the criteria catalog and compiled into [`Check`]
//! variants. The [`ValidationDispatcher`] runs them against a stage output and
//! aggregates a [`StageValidationReport`] whose success depends only on
//! CRITICAL results.

pub mod checks;
pub mod context;
pub mod dispatcher;
pub mod result;

pub use checks::{Check, FORMULA_TOLERANCE, Formula, NumericType, RatioSource};
pub use context::{StateProvider, StaticStateProvider, ValidationContext};
pub use dispatcher::{DURATION_CHECK, EXTERNAL_CALLS_CHECK, ValidationDispatcher, required_check_name};
pub use result::{Severity, StageValidationReport, ValidationResult};
