//! Loop runner module - drives a stage until its output passes validation.
//!
//! This module provides the controller side of the engine:
//! - LoopController for executing one stage with criteria-driven retries
//! - LoopState and IterationMetrics describing an invocation
//! - CorrectionBlock for feeding failures back into the next attempt
//! - ControllerRegistry for sharing one controller per stage
//! - CommandExecutor for stages implemented as shell commands

mod cancel;
mod command;
mod correction;
mod executor;
mod loop_runner;
mod registry;
mod state;

pub use cancel::CancelToken;
pub use command::{CommandConfig, CommandExecutor, ITERATION_ENV};
pub use correction::{CORRECTION_KEY, CorrectionBlock, FailedCheck, WRAPPED_INPUT_KEY};
pub use executor::{AsyncFnExecutor, ExecutionError, FnExecutor, StageExecutor};
pub use loop_runner::{
    DEFAULT_RETRY_DELAY_MS, EXECUTION_CHECK, LoopController, LoopControllerConfig, LoopRun, RunOptions,
};
pub use registry::ControllerRegistry;
pub use state::{IterationMetrics, IterationTimer, LoopState, LoopStatus};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let status = LoopStatus::Initializing;
        assert!(!status.is_terminal());
        assert_eq!(LoopControllerConfig::default().max_iterations, None);
    }
}
