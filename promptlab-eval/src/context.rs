//! Shared process-wide handles for an evaluation run.

use crate::registry::{DatasetRegistry, InMemoryRegistry};
use crate::telemetry::TelemetryClient;
use std::sync::Arc;

/// Telemetry and dataset handles, built once and passed by reference.
///
/// Both handles only ever receive appends and flushes, so one context can
/// be shared across concurrent evaluations.
#[derive(Clone)]
pub struct EvalContext {
    pub telemetry: Arc<TelemetryClient>,
    pub registry: Arc<dyn DatasetRegistry>,
}

impl EvalContext {
    pub fn new(telemetry: Arc<TelemetryClient>, registry: Arc<dyn DatasetRegistry>) -> Self {
        Self {
            telemetry,
            registry,
        }
    }

    /// Context backed entirely by memory (used in tests and dry runs).
    pub fn in_memory(project: impl Into<String>) -> Self {
        Self::new(
            Arc::new(TelemetryClient::in_memory(project)),
            Arc::new(InMemoryRegistry::new()),
        )
    }
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}
