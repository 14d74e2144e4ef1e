//! Controller registry - one shared controller per stage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::loop_runner::{LoopController, LoopControllerConfig};
use crate::audit::{AuditSink, NullAuditSink};
use crate::catalog::CriteriaCatalog;
use crate::error::Result;
use crate::validation::StateProvider;

/// Lazily builds controllers and hands out the same instance per stage.
///
/// Controllers are stateless between invocations, so sharing one across
/// concurrent callers is safe. Usage metering is per invocation and is passed
/// through `RunOptions`, never shared here.
pub struct ControllerRegistry {
    catalog: Arc<CriteriaCatalog>,
    config: LoopControllerConfig,
    sink: Arc<dyn AuditSink>,
    state_provider: Option<Arc<dyn StateProvider>>,
    controllers: Mutex<HashMap<String, Arc<LoopController>>>,
}

impl ControllerRegistry {
    pub fn new(catalog: Arc<CriteriaCatalog>) -> Self {
        Self::with_config(catalog, LoopControllerConfig::default())
    }

    pub fn with_config(catalog: Arc<CriteriaCatalog>, config: LoopControllerConfig) -> Self {
        Self {
            catalog,
            config,
            sink: Arc::new(NullAuditSink),
            state_provider: None,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    /// Sink given to every controller built from now on.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_state_provider(mut self, provider: Arc<dyn StateProvider>) -> Self {
        self.state_provider = Some(provider);
        self
    }

    pub fn catalog(&self) -> &CriteriaCatalog {
        &self.catalog
    }

    /// Return the controller for `stage_name`, building it on first use.
    ///
    /// Fails with `UnknownStage` if the catalog has no such stage; nothing is
    /// cached in that case.
    pub fn get_or_create(&self, stage_name: &str) -> Result<Arc<LoopController>> {
        let mut controllers = self.controllers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(controller) = controllers.get(stage_name) {
            return Ok(Arc::clone(controller));
        }

        let mut controller = LoopController::with_config(&self.catalog, stage_name, self.config.clone())?
            .with_sink(Arc::clone(&self.sink));
        if let Some(provider) = &self.state_provider {
            controller = controller.with_state_provider(Arc::clone(provider));
        }

        log::debug!("Created controller for stage '{}'", stage_name);
        let controller = Arc::new(controller);
        controllers.insert(stage_name.to_string(), Arc::clone(&controller));
        Ok(controller)
    }

    /// Number of controllers built so far.
    pub fn len(&self) -> usize {
        self.controllers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
