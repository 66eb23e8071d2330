//! Access to the Services being reconciled
//!
//! The reconciler reads and persists Services through [`ServiceStore`] so the
//! decision logic can run against an in-memory store in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::{Api, PostParams},
    Client, ResourceExt,
};

use crate::error::Result;

#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Fetch a Service; `None` if it no longer exists.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Persist metadata changes (annotations, finalizers) of `svc`.
    ///
    /// The write is conditional on the `resourceVersion` carried by `svc`, so
    /// a stale copy fails with a conflict instead of overwriting newer state.
    async fn replace(&self, svc: &Service) -> Result<Service>;
}

/// [`ServiceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeServiceStore {
    client: Client,
}

impl KubeServiceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceStore for KubeServiceStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace(&self, svc: &Service) -> Result<Service> {
        let namespace = svc.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .replace(&svc.name_any(), &PostParams::default(), svc)
            .await?)
    }
}
