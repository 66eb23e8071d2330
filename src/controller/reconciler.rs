//! Main reconciler for Services published through Archer
//!
//! [`ServiceReconciler`] holds the decision logic and only talks to the outside
//! world through [`ServiceStore`] and [`EndpointBroker`]. [`run_controller`]
//! drives it from the kube-rs runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, EventSource, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, ObjectMeta, PostParams},
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::annotations::{get_annotation, get_annotation_bool, set_annotation, AnnotationKeys};
use super::desired::{correlation_tags, desired_endpoint_service};
use super::diff::service_equal;
use super::finalizers::{Finalizer, FinalizerState};
use super::metrics;
use super::store::ServiceStore;
use super::ControllerConfig;
use crate::broker::{EndpointBroker, EndpointService, ServiceUpdatable};
use crate::error::{Error, Result};

/// Requeue interval for synced Services, to pick up drift on the Archer side
const RESYNC_INTERVAL: Duration = Duration::from_secs(600);
/// Requeue interval while another replica holds the leader lease
const NOT_LEADER_REQUEUE: Duration = Duration::from_secs(15);

/// What a single reconcile did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The Service no longer exists
    NotFound,
    /// The Service is not tracked, or already released
    Ignored,
    /// An endpoint service was created
    Created { id: String },
    /// The endpoint service differed and was updated
    Updated { id: String },
    /// The endpoint service already matched
    InSync { id: String },
    /// Cleanup ran and the finalizer was removed; `deleted` is the endpoint
    /// service that was deleted, if one had been recorded
    Released { deleted: Option<String> },
}

/// Reconciles one Service against Archer per call
pub struct ServiceReconciler<S, B> {
    store: S,
    broker: B,
    keys: AnnotationKeys,
    finalizer: Finalizer,
    network_id: String,
}

impl<S: ServiceStore, B: EndpointBroker> ServiceReconciler<S, B> {
    pub fn new(store: S, broker: B, config: &ControllerConfig) -> Self {
        let keys = AnnotationKeys::new(&config.annotation_prefix);
        let finalizer = Finalizer::new(keys.finalizer.clone());
        Self {
            store,
            broker,
            keys,
            finalizer,
            network_id: config.network_id.clone(),
        }
    }

    /// Bring the endpoint service of `namespace/name` in line with the Service.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let Some(mut svc) = self.store.get(namespace, name).await? else {
            debug!("Service {}/{} is gone", namespace, name);
            return Ok(ReconcileOutcome::NotFound);
        };

        let state = self.finalizer.state(&svc.metadata);

        // A Service that still carries our finalizer is cleaned up even if the
        // create annotation was dropped, otherwise its deletion would hang.
        if !get_annotation_bool(&svc.metadata, &self.keys.create, false)
            && state != FinalizerState::Cleaning
        {
            debug!(
                annotation = %self.keys.create,
                "Ignoring service {}/{} without create annotation", namespace, name
            );
            return Ok(ReconcileOutcome::Ignored);
        }

        match state {
            FinalizerState::Untracked => {
                if self.finalizer.register(&mut svc.metadata) {
                    svc = self.store.replace(&svc).await?;
                    info!("Added finalizer to service {}/{}", namespace, name);
                }
                self.sync(svc).await
            }
            FinalizerState::Tracked => self.sync(svc).await,
            FinalizerState::Cleaning => self.cleanup(svc).await,
            FinalizerState::Released => Ok(ReconcileOutcome::Ignored),
        }
    }

    /// Create or update the endpoint service
    async fn sync(&self, svc: Service) -> Result<ReconcileOutcome> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_any();
        info!("Reconciling service {}/{}", namespace, name);

        let desired = desired_endpoint_service(&svc, &self.keys, &self.network_id)?;
        let remotes = self.broker.list_by_tags(&correlation_tags(&svc)?).await?;

        match remotes.as_slice() {
            [] => {
                info!("Creating endpoint service {} for {}/{}", desired.name, namespace, name);
                let created = self.broker.create(&desired).await?;
                metrics::inc_broker_operation("create");
                self.record_id(svc, &created.id).await?;
                Ok(ReconcileOutcome::Created { id: created.id })
            }
            [remote] => {
                let outcome = if service_equal(&desired, remote) {
                    debug!("Endpoint service {} is up to date", remote.id);
                    ReconcileOutcome::InSync {
                        id: remote.id.clone(),
                    }
                } else {
                    info!("Updating endpoint service {} for {}/{}", remote.id, namespace, name);
                    self.broker
                        .update(&remote.id, &ServiceUpdatable::from(&desired))
                        .await?;
                    metrics::inc_broker_operation("update");
                    ReconcileOutcome::Updated {
                        id: remote.id.clone(),
                    }
                };
                self.backfill_id(svc, remote).await?;
                Ok(outcome)
            }
            _ => Err(Error::AmbiguousRemoteState { namespace, name }),
        }
    }

    /// Delete the recorded endpoint service and drop the finalizer
    async fn cleanup(&self, mut svc: Service) -> Result<ReconcileOutcome> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_any();
        info!("Cleaning up service {}/{}", namespace, name);

        let deleted = get_annotation(&svc.metadata, &self.keys.id).map(str::to_string);
        match &deleted {
            Some(id) => {
                info!("Deleting endpoint service {} for {}/{}", id, namespace, name);
                self.broker.delete(id).await?;
                metrics::inc_broker_operation("delete");
            }
            None => debug!("No endpoint service recorded for {}/{}", namespace, name),
        }

        if self.finalizer.release(&mut svc.metadata) {
            self.store.replace(&svc).await?;
            info!("Removed finalizer from service {}/{}", namespace, name);
        }
        Ok(ReconcileOutcome::Released { deleted })
    }

    async fn record_id(&self, mut svc: Service, id: &str) -> Result<()> {
        set_annotation(&mut svc.metadata, &self.keys.id, id);
        self.store.replace(&svc).await?;
        Ok(())
    }

    /// Records the id when an earlier create succeeded but writing the
    /// annotation did not, so cleanup can still find the endpoint service.
    async fn backfill_id(&self, svc: Service, remote: &EndpointService) -> Result<()> {
        if get_annotation(&svc.metadata, &self.keys.id) == Some(remote.id.as_str()) {
            return Ok(());
        }
        info!(
            "Recording endpoint service {} on {}/{}",
            remote.id,
            svc.namespace().unwrap_or_default(),
            svc.name_any()
        );
        self.record_id(svc, &remote.id).await
    }
}

/// Shared state for the controller
pub struct ControllerState<S, B> {
    pub client: Client,
    pub reconciler: ServiceReconciler<S, B>,
    /// Set by the leader election loop; always `true` without leader election
    pub is_leader: Arc<AtomicBool>,
}

/// Runtime options for [`run_controller`]
#[derive(Clone, Debug, Default)]
pub struct ControllerOptions {
    /// Only watch Services in this namespace
    pub watch_namespace: Option<String>,
    /// Maximum number of concurrent reconciles, 0 for unbounded
    pub concurrency: u16,
}

/// Main entry point to start the controller
pub async fn run_controller<S, B>(
    state: Arc<ControllerState<S, B>>,
    options: ControllerOptions,
) -> Result<()>
where
    S: ServiceStore + 'static,
    B: EndpointBroker + 'static,
{
    let client = state.client.clone();
    let services: Api<Service> = match &options.watch_namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    info!(
        "Starting Service controller (namespace: {})",
        options.watch_namespace.as_deref().unwrap_or("all")
    );

    Controller::new(services, Config::default())
        .with_config(controller::Config::default().concurrency(options.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => debug!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("Service controller stopped");
    Ok(())
}

/// Component reported on the Events we emit
pub(crate) const REPORTING_COMPONENT: &str = "archer-operator";

/// Warning Event describing a failed reconcile of `svc`
pub(crate) fn failure_event(svc: &Service, error: &Error, now: DateTime<Utc>) -> Event {
    let time = Time(now);
    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-archer-", svc.name_any())),
            namespace: svc.namespace(),
            ..Default::default()
        },
        type_: Some("Warning".to_string()),
        reason: Some("ReconcileFailed".to_string()),
        action: Some("Reconcile".to_string()),
        message: Some(format!("{} ({})", error, error.kind())),
        involved_object: svc.object_ref(&()),
        reporting_component: Some(REPORTING_COMPONENT.to_string()),
        source: Some(EventSource {
            component: Some(REPORTING_COMPONENT.to_string()),
            ..Default::default()
        }),
        first_timestamp: Some(time.clone()),
        last_timestamp: Some(time),
        count: Some(1),
        ..Default::default()
    }
}

async fn emit_failure_event(client: &Client, svc: &Service, error: &Error) -> Result<()> {
    let namespace = svc.namespace().unwrap_or_else(|| "default".to_string());
    let events: Api<Event> = Api::namespaced(client.clone(), &namespace);
    events
        .create(&PostParams::default(), &failure_event(svc, error, Utc::now()))
        .await?;
    Ok(())
}

/// The kube-rs reconcile callback
///
/// Called whenever a Service changes or its requeue timer expires.
#[instrument(skip(svc, ctx), fields(name = %svc.name_any(), namespace = svc.namespace()))]
async fn reconcile<S, B>(svc: Arc<Service>, ctx: Arc<ControllerState<S, B>>) -> Result<Action>
where
    S: ServiceStore,
    B: EndpointBroker,
{
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping {}", svc.name_any());
        return Ok(Action::requeue(NOT_LEADER_REQUEUE));
    }

    let namespace = svc.namespace().unwrap_or_else(|| "default".to_string());
    let name = svc.name_any();
    let start = Instant::now();
    let result = ctx.reconciler.reconcile(&namespace, &name).await;
    metrics::observe_reconcile_duration_seconds(start.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            debug!("Reconciled {}/{}: {:?}", namespace, name, outcome);
            Ok(requeue_for(&outcome))
        }
        Err(e) => {
            error!("Failed to reconcile service {}/{}: {}", namespace, name, e);
            if let Err(event_err) = emit_failure_event(&ctx.client, &svc, &e).await {
                warn!("Failed to emit event for {}/{}: {:?}", namespace, name, event_err);
            }
            Err(e)
        }
    }
}

/// Synced Services are revisited periodically, everything else waits for a change.
fn requeue_for(outcome: &ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Created { .. }
        | ReconcileOutcome::Updated { .. }
        | ReconcileOutcome::InSync { .. } => Action::requeue(RESYNC_INTERVAL),
        ReconcileOutcome::NotFound
        | ReconcileOutcome::Ignored
        | ReconcileOutcome::Released { .. } => Action::await_change(),
    }
}

/// Requeue interval after a failed reconcile
pub(crate) fn retry_interval(error: &Error) -> Duration {
    if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    }
}

fn error_policy<S, B>(svc: Arc<Service>, error: &Error, _ctx: Arc<ControllerState<S, B>>) -> Action {
    warn!("Reconciliation error for {}: {:?}", svc.name_any(), error);
    metrics::inc_reconcile_error(error.kind());
    Action::requeue(retry_interval(error))
}
