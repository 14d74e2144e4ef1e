//! Best-effort forwarding of loop summaries.

use std::sync::Arc;

use super::sink::{AuditSink, NullAuditSink};
use super::summary::LoopSummary;
use crate::runner::LoopState;

/// Builds summaries from finished loops and hands them to a sink.
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Summarize `state` and forward it.
    ///
    /// Returns whether the sink accepted the summary; a rejection is logged
    /// and otherwise ignored.
    pub async fn emit(&self, state: &LoopState) -> bool {
        let summary = LoopSummary::from_state(state);
        match self.sink.record(&summary).await {
            Ok(()) => {
                log::debug!("Loop {}: summary recorded by {} sink", summary.loop_id, self.sink.name());
                true
            }
            Err(e) => {
                log::warn!(
                    "Loop {}: {} sink failed to record summary: {}",
                    summary.loop_id,
                    self.sink.name(),
                    e
                );
                false
            }
        }
    }
}

impl Default for AuditEmitter {
    fn default() -> Self {
        Self::new(Arc::new(NullAuditSink))
    }
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter").field("sink", &self.sink.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::error::{Result, StageLoopError};
    use crate::runner::{IterationTimer, LoopStatus};
    use crate::audit::UsageSnapshot;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _summary: &LoopSummary) -> Result<()> {
            Err(StageLoopError::Sink("database unavailable".to_string()))
        }
    }

    fn finished_state() -> LoopState {
        let mut state = LoopState::new("scrape", 3, vec!["win_rate".to_string()]);
        state.begin_iteration(1);
        let timer = IterationTimer::start(1, "scrape", UsageSnapshot::default());
        state.record_output(json!({"ok": true}));
        state.transition(LoopStatus::Validating);
        state.record_metrics(timer.seal(
            UsageSnapshot {
                external_calls: 4,
                cost: 0.02,
            },
            true,
            false,
            None,
        ));
        state.finish(LoopStatus::Completed, Some(json!({"ok": true})), None);
        state
    }

    #[tokio::test]
    async fn test_emit_records_summary() {
        let sink = Arc::new(MemoryAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone());
        assert!(emitter.emit(&finished_state()).await);

        let summaries = sink.summaries();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.status, LoopStatus::Completed);
        assert_eq!(summary.iteration_count, 1);
        assert_eq!(summary.total_external_calls, 4);
        assert!((summary.total_cost - 0.02).abs() < 1e-9);
        assert_eq!(summary.per_iteration_metrics.len(), 1);
        assert_eq!(summary.pending_evaluators, vec!["win_rate"]);
    }

    #[tokio::test]
    async fn test_emit_swallows_sink_failure() {
        let emitter = AuditEmitter::new(Arc::new(FailingSink));
        let state = finished_state();
        assert!(!emitter.emit(&state).await);
        assert_eq!(state.status(), LoopStatus::Completed);
    }
}
