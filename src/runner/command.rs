//! Command executor - runs a stage as a shell command.
//!
//! The stage input is written to the command's stdin as JSON and its stdout is
//! parsed as the stage output.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::executor::{ExecutionError, StageExecutor};

/// Environment variable carrying the 1-based iteration number.
pub const ITERATION_ENV: &str = "STAGELOOP_ITERATION";

/// Configuration for a command executor
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// The command to execute
    pub command: String,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
    /// Working directory, inherited when unset
    pub working_dir: Option<PathBuf>,
    /// Timeout in milliseconds (default: 300000)
    pub timeout_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            env: Vec::new(),
            working_dir: None,
            timeout_ms: 300_000,
        }
    }
}

impl CommandConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }
}

/// Stage executor backed by `sh -c`.
pub struct CommandExecutor {
    config: CommandConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    pub fn simple(command: impl Into<String>) -> Self {
        Self::new(CommandConfig::new(command))
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }

    async fn spawn(&self, stdin_payload: Vec<u8>, iteration: u32) -> std::io::Result<std::process::Output> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.config.command);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd.env(ITERATION_ENV, iteration.to_string());
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take();
        // Feed stdin while stdout drains, or a filter blocks on a full pipe.
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // Commands that ignore their input may exit before reading it.
                if let Err(e) = stdin.write_all(&stdin_payload).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
                // Dropping stdin lets the command see EOF.
            }
            Ok(())
        };
        let exchange = async move {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output
        };

        let timeout = tokio::time::Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("Command timed out after {}ms", self.config.timeout_ms),
            )),
        }
    }
}

#[async_trait]
impl StageExecutor for CommandExecutor {
    async fn execute(&self, input: &Value, iteration: u32) -> Result<Value, ExecutionError> {
        let payload = serde_json::to_vec(input).map_err(|e| ExecutionError::new(format!("encode input: {}", e)))?;
        let output = self
            .spawn(payload, iteration)
            .await
            .map_err(|e| ExecutionError::new(format!("'{}': {}", self.config.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutionError::new(format!(
                "'{}' exited with {:?}: {}",
                self.config.command,
                output.status.code(),
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExecutionError::new(format!("'{}' produced invalid JSON: {}", self.config.command, e)))
    }
}
