//! Lease based leader election
//!
//! Only the replica holding the `archer-operator-leader` Lease reconciles.
//! The others keep watching so they can take over as soon as the lease
//! expires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{info, warn};

pub const LEASE_NAME: &str = "archer-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Campaign for the lease forever, mirroring leadership into `is_leader`.
pub async fn run_leader_election(
    client: Client,
    namespace: &str,
    identity: &str,
    is_leader: Arc<AtomicBool>,
) {
    let leases: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        match try_acquire_or_renew(&leases, namespace, identity).await {
            Ok(true) => {
                if !is_leader.load(Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(true, Ordering::Relaxed);
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
            Ok(false) => {
                if is_leader.load(Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

/// A lease without a renew time counts as expired.
pub fn is_lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(renew) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return true;
    };
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);
    now > renew.0 + chrono::Duration::seconds(i64::from(duration))
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = Utc::now();

    let Some(existing) = leases.get_opt(LEASE_NAME).await? else {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(identity.to_string()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        };
        leases.create(&PostParams::default(), &lease).await?;
        info!("Created lease {} with holder {}", LEASE_NAME, identity);
        return Ok(true);
    };

    let spec = existing.spec.as_ref();
    let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

    let patch = if current_holder == Some(identity) {
        serde_json::json!({
            "spec": {
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        })
    } else if is_lease_expired(spec, now) {
        info!("Lease held by {:?} has expired, taking over", current_holder);
        serde_json::json!({
            "spec": {
                "holderIdentity": identity,
                "acquireTime": MicroTime(now),
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        })
    } else {
        return Ok(false);
    };

    leases
        .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(true)
}
