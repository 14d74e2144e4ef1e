//! Usage accounting for external calls made by stage executors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Cost is stored in millionths so it can live in an atomic counter.
const COST_SCALE: f64 = 1_000_000.0;

/// Point-in-time usage totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub external_calls: u64,
    pub cost: f64,
}

impl UsageSnapshot {
    /// Usage accumulated between `earlier` and `self`.
    pub fn since(&self, earlier: &UsageSnapshot) -> UsageSnapshot {
        UsageSnapshot {
            external_calls: self.external_calls.saturating_sub(earlier.external_calls),
            cost: (self.cost - earlier.cost).max(0.0),
        }
    }
}

/// Source of external-call and cost totals, typically the call-routing layer.
pub trait UsageMeter: Send + Sync {
    fn snapshot(&self) -> UsageSnapshot;
}

/// Lock-free usage counters safe for concurrent increments.
///
/// A child ledger counts only its own calls and forwards each one to its
/// parent, so one invocation can be metered apart from a process-wide total.
#[derive(Debug, Default)]
pub struct CostLedger {
    calls: AtomicU64,
    cost_micros: AtomicU64,
    parent: Option<Arc<CostLedger>>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh ledger whose calls also roll up into `parent`.
    pub fn child(parent: &Arc<CostLedger>) -> Self {
        Self {
            parent: Some(Arc::clone(parent)),
            ..Default::default()
        }
    }

    /// Record one external call and its cost.
    pub fn record_call(&self, cost: f64) {
        let micros = (cost.max(0.0) * COST_SCALE).round() as u64;
        let mut ledger = Some(self);
        while let Some(current) = ledger {
            current.calls.fetch_add(1, Ordering::Relaxed);
            current.cost_micros.fetch_add(micros, Ordering::Relaxed);
            ledger = current.parent.as_deref();
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn total_cost(&self) -> f64 {
        self.cost_micros.load(Ordering::Relaxed) as f64 / COST_SCALE
    }
}

impl UsageMeter for CostLedger {
    fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            external_calls: self.total_calls(),
            cost: self.total_cost(),
        }
    }
}
