//! Desired endpoint-service state derived from a Service

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use super::annotations::{get_annotation, get_annotation_bool, AnnotationKeys};
use crate::broker::EndpointServiceSpec;
use crate::error::{Error, Result};

/// Fixed tag marking endpoint services owned by this operator
pub const SYSTEM_TAG: &str = "kubernetes";

/// Visibility used when the Service does not pick one
pub const DEFAULT_VISIBILITY: &str = "public";

/// Tags correlating a Service with its endpoint service: the system tag and the
/// Service UID.
pub fn correlation_tags(svc: &Service) -> Result<Vec<String>> {
    let uid = svc
        .uid()
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| Error::ValidationError(format!("service {} has no uid", qualified(svc))))?;
    Ok(vec![SYSTEM_TAG.to_string(), uid])
}

/// Compute the endpoint service a Service should be published as.
///
/// `default_network_id` is used unless the network-id annotation overrides it.
pub fn desired_endpoint_service(
    svc: &Service,
    keys: &AnnotationKeys,
    default_network_id: &str,
) -> Result<EndpointServiceSpec> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    let meta = &svc.metadata;

    // Tags form a set; the first occurrence wins so the correlation tags lead.
    let mut tags = correlation_tags(svc)?;
    if let Some(extra) = get_annotation(meta, &keys.tags) {
        for tag in extra.split_whitespace() {
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
    }

    let mut spec = EndpointServiceSpec {
        name: format!("{namespace}-{name}"),
        description: format!("Kubernetes service {namespace}/{name}"),
        ip_addresses: vec![cluster_ip(svc)?],
        network_id: Some(default_network_id.to_string()),
        port: service_port(svc, keys)?,
        tags,
        visibility: Some(DEFAULT_VISIBILITY.to_string()),
        ..Default::default()
    };

    if let Some(name) = get_annotation(meta, &keys.service_name) {
        spec.name = name.to_string();
    }
    if let Some(network_id) = get_annotation(meta, &keys.network_id) {
        spec.network_id = Some(network_id.to_string());
    }
    if get_annotation_bool(meta, &keys.proxy_protocol, false) {
        spec.proxy_protocol = Some(true);
    }
    if get_annotation_bool(meta, &keys.require_approval, false) {
        spec.require_approval = Some(true);
    }
    if let Some(zone) = get_annotation(meta, &keys.availability_zone) {
        spec.availability_zone = Some(zone.to_string());
    }
    if let Some(visibility) = get_annotation(meta, &keys.visibility) {
        spec.visibility = Some(visibility.to_string());
    }

    Ok(spec)
}

/// The port annotation wins, then the first declared port.
fn service_port(svc: &Service, keys: &AnnotationKeys) -> Result<i32> {
    if let Some(port) = get_annotation(&svc.metadata, &keys.port) {
        return port.trim().parse::<i32>().map_err(|e| {
            Error::ValidationError(format!(
                "service {} has invalid {} annotation {:?}: {}",
                qualified(svc),
                keys.port,
                port,
                e
            ))
        });
    }

    svc.spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|port| port.port)
        .ok_or_else(|| Error::ValidationError(format!("service {} has no ports", qualified(svc))))
}

fn cluster_ip(svc: &Service) -> Result<String> {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None")
        .map(str::to_string)
        .ok_or_else(|| {
            Error::ValidationError(format!("service {} has no cluster IP", qualified(svc)))
        })
}

fn qualified(svc: &Service) -> String {
    format!("{}/{}", svc.namespace().unwrap_or_default(), svc.name_any())
}
