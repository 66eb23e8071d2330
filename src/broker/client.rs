//! REST client for the Archer API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use super::keystone::{KeystoneAuth, ARCHER_SERVICE_TYPE};
use super::types::{EndpointService, EndpointServiceList, EndpointServiceSpec, ServiceUpdatable};
use super::EndpointBroker;
use crate::error::{Error, Result};

/// Header carrying the Keystone token
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Clone)]
enum Credentials {
    /// Fixed token, or none at all
    Static(Option<String>),
    /// Tokens issued and refreshed by Keystone
    Keystone(Arc<KeystoneAuth>),
}

/// Client for the Archer `/service` endpoints
#[derive(Clone)]
pub struct ArcherClient {
    http_client: Client,
    endpoint: String,
    credentials: Credentials,
}

impl ArcherClient {
    /// Create a client for the Archer API rooted at `endpoint` using a fixed token
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        Self::build(endpoint, Credentials::Static(token), timeout)
    }

    /// Create a client authenticating through Keystone.
    ///
    /// Without an `endpoint` override the Archer URL is taken from the
    /// service catalog.
    pub async fn with_keystone(
        auth: KeystoneAuth,
        endpoint: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = match endpoint {
            Some(endpoint) => endpoint.to_string(),
            None => auth.endpoint(ARCHER_SERVICE_TYPE).await?,
        };
        Self::build(&endpoint, Credentials::Keystone(Arc::new(auth)), timeout)
    }

    fn build(endpoint: &str, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Base URL requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        self.http_client.request(method, url)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match &self.credentials {
            Credentials::Static(Some(token)) => request.header(AUTH_TOKEN_HEADER, token),
            Credentials::Static(None) => request,
            Credentials::Keystone(auth) => request.header(AUTH_TOKEN_HEADER, auth.token().await?),
        })
    }

    /// Send the request built by `build`. A Keystone token rejected with 401
    /// is reissued and the request sent once more.
    async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let response = self.authorize(build()).await?.send().await?;
        match &self.credentials {
            Credentials::Keystone(auth) if response.status() == StatusCode::UNAUTHORIZED => {
                warn!("Archer rejected the Keystone token, reauthenticating");
                auth.invalidate().await;
                Ok(self.authorize(build()).await?.send().await?)
            }
            _ => Ok(response),
        }
    }
}

/// Turn a non-success response into [`Error::BrokerError`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::BrokerError {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

#[async_trait]
impl EndpointBroker for ArcherClient {
    async fn list_by_tags(&self, tags: &[String]) -> Result<Vec<EndpointService>> {
        debug!("Listing endpoint services with tags {:?}", tags);
        let query = [("tags", tags.join(","))];
        let response = self
            .execute(|| self.request(Method::GET, "service").query(&query))
            .await?;
        let list: EndpointServiceList = check_status(response).await?.json().await?;
        Ok(list.items)
    }

    async fn create(&self, spec: &EndpointServiceSpec) -> Result<EndpointService> {
        debug!("Creating endpoint service {}", spec.name);
        let response = self
            .execute(|| self.request(Method::POST, "service").json(spec))
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn update(&self, id: &str, update: &ServiceUpdatable) -> Result<EndpointService> {
        debug!("Updating endpoint service {}", id);
        let path = format!("service/{id}");
        let response = self
            .execute(|| self.request(Method::PUT, &path).json(update))
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        debug!("Deleting endpoint service {}", id);
        let path = format!("service/{id}");
        let response = self
            .execute(|| self.request(Method::DELETE, &path))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Endpoint service {} already gone", id);
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}
