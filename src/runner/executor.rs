//! Stage executor contract.
//!
//! The business logic of a stage lives outside this crate. The controller only
//! needs something that turns an input record and an iteration number into an
//! output record.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error raised by a stage executor. Recoverable: the controller retries it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Executes one attempt of a stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run the stage. `iteration` starts at 1.
    ///
    /// On retries after a validation failure, `input` carries a correction
    /// block (see [`crate::runner::CorrectionBlock::extract`]).
    async fn execute(&self, input: &Value, iteration: u32) -> Result<Value, ExecutionError>;
}

/// Adapter for synchronous closures.
///
/// The closure runs on tokio's blocking pool, so a slow call neither stalls
/// other loops nor keeps the controller from abandoning it on cancel.
pub struct FnExecutor<F> {
    func: Arc<F>,
}

impl<F> FnExecutor<F>
where
    F: Fn(&Value, u32) -> Result<Value, ExecutionError> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func: Arc::new(func) }
    }
}

#[async_trait]
impl<F> StageExecutor for FnExecutor<F>
where
    F: Fn(&Value, u32) -> Result<Value, ExecutionError> + Send + Sync + 'static,
{
    async fn execute(&self, input: &Value, iteration: u32) -> Result<Value, ExecutionError> {
        let func = Arc::clone(&self.func);
        let input = input.clone();
        tokio::task::spawn_blocking(move || func(&input, iteration))
            .await
            .map_err(|e| ExecutionError::new(format!("executor task failed: {}", e)))?
    }
}

/// Adapter for closures returning a future.
pub struct AsyncFnExecutor<F> {
    func: F,
}

impl<F, Fut> AsyncFnExecutor<F>
where
    F: Fn(Value, u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> StageExecutor for AsyncFnExecutor<F>
where
    F: Fn(Value, u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    async fn execute(&self, input: &Value, iteration: u32) -> Result<Value, ExecutionError> {
        (self.func)(input.clone(), iteration).await
    }
}
