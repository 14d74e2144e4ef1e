//! Metrics and audit emission.
//!
//! After a loop reaches a terminal status, the [`AuditEmitter`] condenses its
//! state into a [`LoopSummary`] and forwards it to an [`AuditSink`] on a
//! best-effort basis. Sink failures are logged and never reach the caller.

mod emitter;
mod sink;
mod summary;
mod usage;

pub use emitter::AuditEmitter;
pub use sink::{AuditSink, JsonlAuditSink, LogAuditSink, MemoryAuditSink, NullAuditSink};
pub use summary::{LoopSummary, ValidationCounts};
pub use usage::{CostLedger, UsageMeter, UsageSnapshot};
