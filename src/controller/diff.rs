//! Decides whether an endpoint service needs an update
//!
//! Optional fields are only compared when both sides carry a value (for
//! `enabled`: when the desired side does). Archer omits fields it considers
//! defaulted, and treating those as drift would update on every reconcile.
//! The flip side is that a value set only on the remote side is never
//! corrected.

use crate::broker::{EndpointService, EndpointServiceSpec};

const HOST_SUFFIX: &str = "/32";

/// Returns `true` when `remote` already matches `desired` and no update is needed.
pub fn service_equal(desired: &EndpointServiceSpec, remote: &EndpointService) -> bool {
    let current = &remote.spec;

    if desired.name != current.name || desired.description != current.description {
        return false;
    }
    if let Some(enabled) = desired.enabled {
        if current.enabled != Some(enabled) {
            return false;
        }
    }
    if !addresses_equal(&desired.ip_addresses, &current.ip_addresses) {
        return false;
    }
    if !both_set_equal(&desired.network_id, &current.network_id) {
        return false;
    }
    if desired.port != current.port {
        return false;
    }
    if !both_set_equal(&desired.proxy_protocol, &current.proxy_protocol)
        || !both_set_equal(&desired.require_approval, &current.require_approval)
    {
        return false;
    }
    if !tags_equal(&desired.tags, &current.tags) {
        return false;
    }
    both_set_equal(&desired.visibility, &current.visibility)
}

/// Unset on either side counts as a match
fn both_set_equal<T: PartialEq>(desired: &Option<T>, current: &Option<T>) -> bool {
    match (desired, current) {
        (Some(d), Some(c)) => d == c,
        _ => true,
    }
}

/// `10.0.0.1` and `10.0.0.1/32` name the same host
fn same_address(a: &str, b: &str) -> bool {
    a == b || host(a) == host(b)
}

fn host(ip: &str) -> &str {
    ip.strip_suffix(HOST_SUFFIX).unwrap_or(ip)
}

fn addresses_equal(desired: &[String], current: &[String]) -> bool {
    desired.len() == current.len()
        && desired
            .iter()
            .all(|ip| current.iter().any(|other| same_address(ip, other)))
}

fn tags_equal(desired: &[String], current: &[String]) -> bool {
    desired.len() == current.len() && desired.iter().all(|tag| current.contains(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn desired() -> EndpointServiceSpec {
        EndpointServiceSpec {
            name: "shop-web".to_string(),
            description: "Kubernetes service shop/web".to_string(),
            ip_addresses: strings(&["10.0.0.1"]),
            network_id: Some("net-1".to_string()),
            port: 80,
            tags: strings(&["kubernetes", "u1", "a"]),
            visibility: Some("public".to_string()),
            ..Default::default()
        }
    }

    fn remote_from(spec: &EndpointServiceSpec) -> EndpointService {
        EndpointService {
            id: "id-1".to_string(),
            spec: spec.clone(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_services_are_equal() {
        let spec = desired();
        assert!(service_equal(&spec, &remote_from(&spec)));
    }

    #[test]
    fn test_host_suffix_is_ignored() {
        let spec = desired();
        let mut remote = remote_from(&spec);
        remote.spec.ip_addresses = strings(&["10.0.0.1/32"]);
        assert!(service_equal(&spec, &remote));

        remote.spec.ip_addresses = strings(&["10.0.0.2"]);
        assert!(!service_equal(&spec, &remote));

        remote.spec.ip_addresses = strings(&["10.0.0.1/24"]);
        assert!(!service_equal(&spec, &remote));
    }

    #[test]
    fn test_address_count_must_match() {
        let spec = desired();
        let mut remote = remote_from(&spec);
        remote.spec.ip_addresses = strings(&["10.0.0.1", "10.0.0.1/32"]);
        assert!(!service_equal(&spec, &remote));
    }

    #[test]
    fn test_tag_order_is_irrelevant() {
        let spec = desired();
        let mut remote = remote_from(&spec);
        remote.spec.tags = strings(&["a", "u1", "kubernetes"]);
        assert!(service_equal(&spec, &remote));

        remote.spec.tags = strings(&["a", "u1", "kubernetes", "b"]);
        assert!(!service_equal(&spec, &remote));

        remote.spec.tags = strings(&["b", "u1", "kubernetes"]);
        assert!(!service_equal(&spec, &remote));
    }

    #[test]
    fn test_required_fields_are_compared() {
        let spec = desired();

        let mut remote = remote_from(&spec);
        remote.spec.name = "other".to_string();
        assert!(!service_equal(&spec, &remote));

        let mut remote = remote_from(&spec);
        remote.spec.description = "edited by hand".to_string();
        assert!(!service_equal(&spec, &remote));

        let mut remote = remote_from(&spec);
        remote.spec.port = 443;
        assert!(!service_equal(&spec, &remote));
    }

    #[test]
    fn test_optional_fields_compared_when_both_set() {
        let mut spec = desired();
        spec.proxy_protocol = Some(true);

        let mut remote = remote_from(&spec);
        remote.spec.proxy_protocol = Some(false);
        assert!(!service_equal(&spec, &remote));

        let mut remote = remote_from(&spec);
        remote.spec.visibility = Some("private".to_string());
        assert!(!service_equal(&spec, &remote));

        let mut remote = remote_from(&spec);
        remote.spec.network_id = Some("net-2".to_string());
        assert!(!service_equal(&spec, &remote));
    }

    #[test]
    fn test_enabled_only_compared_when_desired() {
        let spec = desired();
        let mut remote = remote_from(&spec);
        remote.spec.enabled = Some(false);
        assert!(service_equal(&spec, &remote));

        let mut spec = desired();
        spec.enabled = Some(true);
        assert!(!service_equal(&spec, &remote));
        remote.spec.enabled = None;
        assert!(!service_equal(&spec, &remote));
        remote.spec.enabled = Some(true);
        assert!(service_equal(&spec, &remote));
    }

    /// Remote-only values on optional fields are accepted as-is. This pins the
    /// current leniency: drift the desired side never specifies goes unnoticed.
    #[test]
    fn test_remote_only_optional_values_are_not_drift() {
        let spec = desired();
        let mut remote = remote_from(&spec);
        remote.spec.proxy_protocol = Some(true);
        remote.spec.require_approval = Some(true);
        assert!(service_equal(&spec, &remote));

        let mut spec = desired();
        spec.visibility = None;
        spec.network_id = None;
        let mut remote = remote_from(&desired());
        remote.spec.visibility = Some("private".to_string());
        remote.spec.network_id = Some("net-9".to_string());
        assert!(service_equal(&spec, &remote));

        let spec = desired();
        let mut remote = remote_from(&spec);
        remote.spec.visibility = None;
        remote.spec.network_id = None;
        assert!(service_equal(&spec, &remote));
    }

    #[test]
    fn test_availability_zone_is_not_compared() {
        let mut spec = desired();
        spec.availability_zone = Some("zone-a".to_string());
        let mut remote = remote_from(&spec);
        remote.spec.availability_zone = Some("zone-b".to_string());
        assert!(service_equal(&spec, &remote));
    }
}
