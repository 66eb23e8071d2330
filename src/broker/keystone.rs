//! Keystone v3 authentication for the Archer client
//!
//! Issues a token from password or application credentials, keeps it until
//! shortly before it expires, and resolves the Archer endpoint from the
//! service catalog that comes with it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Response header carrying a newly issued token
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
/// Catalog type of the Archer service
pub const ARCHER_SERVICE_TYPE: &str = "endpoint-services";

const ENDPOINT_INTERFACE: &str = "public";
/// Tokens are reissued this long before their expiry
const REFRESH_MARGIN_SECS: i64 = 60;

/// How to authenticate against Keystone
#[derive(Clone, Debug)]
pub enum KeystoneMethod {
    /// User password, scoped to a project
    Password {
        username: String,
        password: String,
        user_domain_name: String,
        project_name: String,
        project_domain_name: String,
    },
    /// Application credentials carry their own scope
    ApplicationCredential { id: String, secret: String },
}

#[derive(Clone, Debug)]
pub struct KeystoneCredentials {
    /// Identity endpoint including the version, e.g. `https://identity:5000/v3`
    pub auth_url: String,
    pub method: KeystoneMethod,
    /// Restricts catalog lookups to this region
    pub region: Option<String>,
}

impl KeystoneCredentials {
    fn request_body(&self) -> serde_json::Value {
        match &self.method {
            KeystoneMethod::Password {
                username,
                password,
                user_domain_name,
                project_name,
                project_domain_name,
            } => json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "name": username,
                                "domain": { "name": user_domain_name },
                                "password": password,
                            }
                        }
                    },
                    "scope": {
                        "project": {
                            "name": project_name,
                            "domain": { "name": project_domain_name },
                        }
                    }
                }
            }),
            KeystoneMethod::ApplicationCredential { id, secret } => json!({
                "auth": {
                    "identity": {
                        "methods": ["application_credential"],
                        "application_credential": { "id": id, "secret": secret }
                    }
                }
            }),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Clone, Debug, Deserialize)]
struct TokenBody {
    expires_at: DateTime<Utc>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Clone, Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

#[derive(Clone, Debug)]
struct IssuedToken {
    value: String,
    expires_at: DateTime<Utc>,
    catalog: Vec<CatalogEntry>,
}

impl IssuedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Token source backed by Keystone
pub struct KeystoneAuth {
    http_client: Client,
    credentials: KeystoneCredentials,
    current: Mutex<Option<IssuedToken>>,
}

impl KeystoneAuth {
    pub fn new(credentials: KeystoneCredentials, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            credentials,
            current: Mutex::new(None),
        })
    }

    /// A valid token, issuing a new one when none is cached or it is about to expire.
    pub async fn token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }
        let issued = self.issue().await?;
        let value = issued.value.clone();
        *current = Some(issued);
        Ok(value)
    }

    /// Forget the cached token, e.g. after the API rejected it.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    /// Public URL of `service_type` from the token's catalog.
    pub async fn endpoint(&self, service_type: &str) -> Result<String> {
        self.token().await?;
        let current = self.current.lock().await;
        let catalog = current
            .as_ref()
            .map(|t| t.catalog.as_slice())
            .unwrap_or_default();
        find_endpoint(catalog, service_type, self.credentials.region.as_deref()).ok_or_else(|| {
            Error::ConfigError(format!(
                "no {} {} endpoint in the Keystone catalog",
                ENDPOINT_INTERFACE, service_type
            ))
        })
    }

    async fn issue(&self) -> Result<IssuedToken> {
        let url = format!(
            "{}/auth/tokens",
            self.credentials.auth_url.trim_end_matches('/')
        );
        debug!("Requesting Keystone token from {}", url);

        let response = self
            .http_client
            .post(url)
            .json(&self.credentials.request_body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::AuthError(format!(
                "Keystone returned {}: {}",
                status.as_u16(),
                message.trim()
            )));
        }

        let value = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::AuthError(format!("Keystone response has no {SUBJECT_TOKEN_HEADER} header"))
            })?;
        let body: TokenResponse = response.json().await?;

        info!("Issued Keystone token valid until {}", body.token.expires_at);
        Ok(IssuedToken {
            value,
            expires_at: body.token.expires_at,
            catalog: body.token.catalog,
        })
    }
}

fn find_endpoint(
    catalog: &[CatalogEntry],
    service_type: &str,
    region: Option<&str>,
) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == ENDPOINT_INTERFACE
                && region.map_or(true, |r| {
                    endpoint.region.as_deref() == Some(r) || endpoint.region_id.as_deref() == Some(r)
                })
        })
        .map(|endpoint| endpoint.url.clone())
}
