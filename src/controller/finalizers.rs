//! Finalizer handling for tracked Services
//!
//! The finalizer keeps a Service around after deletion was requested until
//! its endpoint service has been removed from Archer:
//! 1. `Untracked` -> `Tracked` when a tracked Service is first reconciled
//! 2. `Tracked` -> `Cleaning` once the deletion timestamp appears
//! 3. `Cleaning` -> `Released` after cleanup, which lets Kubernetes finish
//!    the deletion

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Where an object stands with respect to our finalizer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    /// No marker, not being deleted
    Untracked,
    /// Marker present, not being deleted
    Tracked,
    /// Marker present, deletion requested: cleanup must run
    Cleaning,
    /// No marker, deletion requested: nothing holds the object back
    Released,
}

/// A set of finalizer markers plus the deletion flag of its owner
pub trait MarkerSet {
    fn has_marker(&self, marker: &str) -> bool;

    /// Returns `true` if the marker was not present before.
    fn add_marker(&mut self, marker: &str) -> bool;

    /// Returns `true` if the marker was present before.
    fn remove_marker(&mut self, marker: &str) -> bool;

    fn deletion_requested(&self) -> bool;
}

impl MarkerSet for ObjectMeta {
    fn has_marker(&self, marker: &str) -> bool {
        self.finalizers
            .as_ref()
            .map(|f| f.iter().any(|m| m == marker))
            .unwrap_or(false)
    }

    fn add_marker(&mut self, marker: &str) -> bool {
        if self.has_marker(marker) {
            return false;
        }
        self.finalizers
            .get_or_insert_with(Vec::new)
            .push(marker.to_string());
        true
    }

    fn remove_marker(&mut self, marker: &str) -> bool {
        if !self.has_marker(marker) {
            return false;
        }
        if let Some(finalizers) = self.finalizers.as_mut() {
            finalizers.retain(|m| m != marker);
        }
        true
    }

    fn deletion_requested(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// The operator's finalizer token and its transitions
#[derive(Clone, Debug)]
pub struct Finalizer {
    marker: String,
}

impl Finalizer {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn state<M: MarkerSet>(&self, obj: &M) -> FinalizerState {
        match (obj.has_marker(&self.marker), obj.deletion_requested()) {
            (false, false) => FinalizerState::Untracked,
            (true, false) => FinalizerState::Tracked,
            (true, true) => FinalizerState::Cleaning,
            (false, true) => FinalizerState::Released,
        }
    }

    /// `Untracked` -> `Tracked`. Returns `true` when the object changed and
    /// has to be persisted.
    pub fn register<M: MarkerSet>(&self, obj: &mut M) -> bool {
        match self.state(obj) {
            FinalizerState::Untracked => obj.add_marker(&self.marker),
            _ => false,
        }
    }

    /// `Cleaning` -> `Released`. Returns `true` when the object changed and
    /// has to be persisted.
    pub fn release<M: MarkerSet>(&self, obj: &mut M) -> bool {
        match self.state(obj) {
            FinalizerState::Cleaning => obj.remove_marker(&self.marker),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    const MARKER: &str = "cloud.sap/finalizer";

    fn meta(finalizers: &[&str], deleting: bool) -> ObjectMeta {
        ObjectMeta {
            finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
            deletion_timestamp: deleting.then(|| Time(Utc::now())),
            ..Default::default()
        }
    }

    #[test]
    fn test_states() {
        let finalizer = Finalizer::new(MARKER);
        assert_eq!(finalizer.state(&ObjectMeta::default()), FinalizerState::Untracked);
        assert_eq!(finalizer.state(&meta(&["other/finalizer"], false)), FinalizerState::Untracked);
        assert_eq!(finalizer.state(&meta(&[MARKER], false)), FinalizerState::Tracked);
        assert_eq!(finalizer.state(&meta(&[MARKER], true)), FinalizerState::Cleaning);
        assert_eq!(finalizer.state(&meta(&[], true)), FinalizerState::Released);
    }

    #[test]
    fn test_register_is_idempotent() {
        let finalizer = Finalizer::new(MARKER);
        let mut obj = meta(&["other/finalizer"], false);

        assert!(finalizer.register(&mut obj));
        assert_eq!(finalizer.state(&obj), FinalizerState::Tracked);
        assert!(!finalizer.register(&mut obj));
        assert_eq!(
            obj.finalizers,
            Some(vec!["other/finalizer".to_string(), MARKER.to_string()])
        );
    }

    #[test]
    fn test_register_skips_objects_being_deleted() {
        let finalizer = Finalizer::new(MARKER);
        let mut obj = meta(&[], true);
        assert!(!finalizer.register(&mut obj));
        assert_eq!(finalizer.state(&obj), FinalizerState::Released);
    }

    #[test]
    fn test_release_only_from_cleaning() {
        let finalizer = Finalizer::new(MARKER);

        let mut tracked = meta(&[MARKER], false);
        assert!(!finalizer.release(&mut tracked));
        assert_eq!(finalizer.state(&tracked), FinalizerState::Tracked);

        let mut cleaning = meta(&["other/finalizer", MARKER], true);
        assert!(finalizer.release(&mut cleaning));
        assert_eq!(finalizer.state(&cleaning), FinalizerState::Released);
        assert_eq!(cleaning.finalizers, Some(vec!["other/finalizer".to_string()]));
        assert!(!finalizer.release(&mut cleaning));
    }
}
