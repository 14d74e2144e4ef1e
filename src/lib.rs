//! Stageloop - criteria-driven retry loops for pipeline stages.
//!
//! Stageloop runs a pipeline stage, checks its output against declarative
//! success criteria, and retries with a correction block describing what went
//! wrong until the critical criteria pass or the iteration budget runs out.

pub mod audit;
pub mod catalog;
pub mod error;
pub mod id;
pub mod runner;
pub mod validation;

pub use error::{Result, StageLoopError};
