//! Prometheus metrics for the Archer operator
//!
//! # Exported metrics
//! - `archer_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `archer_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `archer_broker_operations_total` (counter): mutating Archer calls labeled by operation.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Controller label value
pub const CONTROLLER_NAME: &str = "archer";

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, see [`crate::Error::kind`]
    pub kind: String,
}

/// Labels for Archer API calls
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// "create", "update" or "delete"
    pub operation: String,
}

pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> =
    Lazy::new(|| {
        fn reconcile_histogram() -> Histogram {
            // 5ms .. ~40s
            Histogram::new(exponential_buckets(0.005, 2.0, 14))
        }
        Family::new_with_constructor(reconcile_histogram)
    });

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static BROKER_OPERATIONS_TOTAL: Lazy<Family<OperationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "archer_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "archer_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "archer_broker_operations",
        "Total number of mutating Archer API calls",
        BROKER_OPERATIONS_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(seconds: f64) {
    let labels = ReconcileLabels {
        controller: CONTROLLER_NAME.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(kind: &str) {
    let labels = ErrorLabels {
        controller: CONTROLLER_NAME.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Count a create/update/delete sent to Archer.
pub fn inc_broker_operation(operation: &str) {
    let labels = OperationLabels {
        operation: operation.to_string(),
    };
    BROKER_OPERATIONS_TOTAL.get_or_create(&labels).inc();
}

/// Render the registry in the Prometheus text format.
pub fn encode_registry() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
