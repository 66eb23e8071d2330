//! Controller module for Service reconciliation
//!
//! This module contains the controller loop, the desired-state extraction
//! from Service annotations, the endpoint-service diff and the finalizer
//! lifecycle.

pub mod annotations;
pub mod desired;
pub mod diff;
pub mod finalizers;
pub mod metrics;
mod reconciler;
pub mod store;

pub use finalizers::{Finalizer, FinalizerState, MarkerSet};
pub use reconciler::{
    run_controller, ControllerOptions, ControllerState, ReconcileOutcome, ServiceReconciler,
};
pub use store::{KubeServiceStore, ServiceStore};

/// Default annotation prefix
pub const DEFAULT_ANNOTATION_PREFIX: &str = "cloud.sap";

/// Settings shared by every reconcile
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Prefix qualifying every annotation key and the finalizer
    pub annotation_prefix: String,
    /// Network used when a Service has no network-id annotation
    pub network_id: String,
}

impl ControllerConfig {
    pub fn new(annotation_prefix: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            annotation_prefix: annotation_prefix.into(),
            network_id: network_id.into(),
        }
    }
}
