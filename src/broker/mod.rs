//! Archer network-endpoint broker
//!
//! The reconciler only depends on the [`EndpointBroker`] trait; [`ArcherClient`]
//! is the REST implementation used by the operator binary, authenticated
//! either with a fixed token or through [`KeystoneAuth`].

mod client;
mod keystone;
mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{ArcherClient, AUTH_TOKEN_HEADER};
pub use keystone::{KeystoneAuth, KeystoneCredentials, KeystoneMethod, ARCHER_SERVICE_TYPE};
pub use types::{EndpointService, EndpointServiceList, EndpointServiceSpec, ServiceUpdatable};

/// Operations the operator needs from Archer.
#[async_trait]
pub trait EndpointBroker: Send + Sync {
    /// List every endpoint service whose tags include all of `tags`.
    async fn list_by_tags(&self, tags: &[String]) -> Result<Vec<EndpointService>>;

    /// Create an endpoint service and return it with its assigned id.
    async fn create(&self, spec: &EndpointServiceSpec) -> Result<EndpointService>;

    /// Update the mutable fields of the endpoint service `id`.
    async fn update(&self, id: &str, update: &ServiceUpdatable) -> Result<EndpointService>;

    /// Delete the endpoint service `id`. Deleting an unknown id succeeds.
    async fn delete(&self, id: &str) -> Result<()>;
}
