//! Archer endpoint-service models
//!
//! Field names follow the Archer REST API (`snake_case` JSON).

use serde::{Deserialize, Serialize};

/// Fields of an endpoint service as sent on creation.
///
/// This is also the desired state computed from a Service on every
/// reconcile. Optional flags stay `None` unless explicitly requested so that
/// the diff can tell "unset" apart from "false".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointServiceSpec {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub ip_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    pub port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_protocol: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<bool>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

/// An endpoint service as stored by Archer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointService {
    pub id: String,
    #[serde(flatten)]
    pub spec: EndpointServiceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// Response body of `GET /service`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EndpointServiceList {
    #[serde(default)]
    pub items: Vec<EndpointService>,
}

/// Body of `PUT /service/{id}`: the subset of fields Archer allows to change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceUpdatable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_protocol: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

impl From<&EndpointServiceSpec> for ServiceUpdatable {
    fn from(spec: &EndpointServiceSpec) -> Self {
        Self {
            description: Some(spec.description.clone()),
            enabled: spec.enabled,
            ip_addresses: spec.ip_addresses.clone(),
            name: Some(spec.name.clone()),
            port: Some(spec.port),
            proxy_protocol: spec.proxy_protocol,
            require_approval: spec.require_approval,
            tags: spec.tags.clone(),
            visibility: spec.visibility.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_service_decodes_with_missing_optionals() {
        let remote: EndpointService = serde_json::from_value(json!({
            "id": "8b3c2a52-7c7e-4a8e-9f93-0a4c1a1f3d11",
            "name": "default-web",
            "ip_addresses": ["10.0.0.1/32"],
            "port": 80,
            "tags": ["kubernetes", "uid-1"],
            "status": "AVAILABLE"
        }))
        .unwrap();

        assert_eq!(remote.id, "8b3c2a52-7c7e-4a8e-9f93-0a4c1a1f3d11");
        assert_eq!(remote.spec.description, "");
        assert_eq!(remote.spec.enabled, None);
        assert_eq!(remote.spec.visibility, None);
        assert_eq!(remote.status.as_deref(), Some("AVAILABLE"));
    }

    #[test]
    fn test_unset_flags_are_not_serialized() {
        let spec = EndpointServiceSpec {
            name: "default-web".to_string(),
            port: 80,
            ..Default::default()
        };
        let body = serde_json::to_value(&spec).unwrap();
        assert!(body.get("proxy_protocol").is_none());
        assert!(body.get("require_approval").is_none());
        assert!(body.get("enabled").is_none());
        assert_eq!(body["port"], 80);
    }

    #[test]
    fn test_updatable_subset_drops_network_and_zone() {
        let spec = EndpointServiceSpec {
            name: "default-web".to_string(),
            description: "Kubernetes service default/web".to_string(),
            ip_addresses: vec!["10.0.0.1".to_string()],
            network_id: Some("net-1".to_string()),
            port: 443,
            proxy_protocol: Some(true),
            tags: vec!["kubernetes".to_string(), "uid-1".to_string()],
            availability_zone: Some("zone-a".to_string()),
            visibility: Some("private".to_string()),
            ..Default::default()
        };

        let update = ServiceUpdatable::from(&spec);
        let body = serde_json::to_value(&update).unwrap();

        assert_eq!(update.port, Some(443));
        assert_eq!(update.proxy_protocol, Some(true));
        assert_eq!(update.require_approval, None);
        assert!(body.get("network_id").is_none());
        assert!(body.get("availability_zone").is_none());
        assert_eq!(body["visibility"], "private");
    }
}
