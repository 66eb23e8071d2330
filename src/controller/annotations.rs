//! Service annotations understood by the operator
//!
//! Every key is qualified by the prefix configured at startup, e.g.
//! `cloud.sap/archer-create`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Boolean; the Service is only tracked when set to `"true"`. Required.
pub const ANNOTATION_CREATE: &str = "archer-create";
/// Network id for the endpoint service. Defaults to the operator's network.
pub const ANNOTATION_NETWORK_ID: &str = "archer-network-id";
/// Name of the endpoint service. Defaults to `<namespace>-<name>`.
pub const ANNOTATION_SERVICE_NAME: &str = "archer-service-name";
/// Boolean; enables the TCP PROXY protocol. Defaults to `"false"`.
pub const ANNOTATION_PROXY_PROTOCOL: &str = "archer-proxy-protocol";
/// `"public"` or `"private"`. Defaults to `"public"`.
pub const ANNOTATION_VISIBILITY: &str = "archer-visibility";
/// Boolean; endpoints need explicit project approval. Defaults to `"false"`.
pub const ANNOTATION_REQUIRE_APPROVAL: &str = "archer-require-approval";
/// Space separated list of extra tags.
pub const ANNOTATION_TAGS: &str = "archer-tags";
/// Pins the endpoint service to an availability zone.
pub const ANNOTATION_AVAILABILITY_ZONE: &str = "archer-availability-zone";
/// Port to publish. Defaults to the first port of the Service.
pub const ANNOTATION_PORT: &str = "archer-port";
/// Id of the endpoint service, written by the operator after creation.
pub const ANNOTATION_ID: &str = "archer-id";
/// Suffix of the finalizer token.
pub const FINALIZER_SUFFIX: &str = "finalizer";

/// Build `<prefix>/<suffix>`
pub fn make_annotation(prefix: &str, suffix: &str) -> String {
    format!("{prefix}/{suffix}")
}

/// Fully qualified annotation keys for one prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationKeys {
    pub create: String,
    pub network_id: String,
    pub service_name: String,
    pub proxy_protocol: String,
    pub visibility: String,
    pub require_approval: String,
    pub tags: String,
    pub availability_zone: String,
    pub port: String,
    pub id: String,
    pub finalizer: String,
}

impl AnnotationKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            create: make_annotation(prefix, ANNOTATION_CREATE),
            network_id: make_annotation(prefix, ANNOTATION_NETWORK_ID),
            service_name: make_annotation(prefix, ANNOTATION_SERVICE_NAME),
            proxy_protocol: make_annotation(prefix, ANNOTATION_PROXY_PROTOCOL),
            visibility: make_annotation(prefix, ANNOTATION_VISIBILITY),
            require_approval: make_annotation(prefix, ANNOTATION_REQUIRE_APPROVAL),
            tags: make_annotation(prefix, ANNOTATION_TAGS),
            availability_zone: make_annotation(prefix, ANNOTATION_AVAILABILITY_ZONE),
            port: make_annotation(prefix, ANNOTATION_PORT),
            id: make_annotation(prefix, ANNOTATION_ID),
            finalizer: make_annotation(prefix, FINALIZER_SUFFIX),
        }
    }
}

/// Value of the annotation `key`, if present
pub fn get_annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Whether the annotation `key` is `"true"`; `default` when it is absent
pub fn get_annotation_bool(meta: &ObjectMeta, key: &str, default: bool) -> bool {
    get_annotation(meta, key)
        .map(|v| v == "true")
        .unwrap_or(default)
}

/// Insert or overwrite the annotation `key`
pub fn set_annotation(meta: &mut ObjectMeta, key: &str, value: &str) {
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}
