//! Drives the reconciler through the Archer REST client against a mock API.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use archer_operator::broker::{ArcherClient, AUTH_TOKEN_HEADER};
use archer_operator::controller::{
    ControllerConfig, ReconcileOutcome, ServiceReconciler, ServiceStore,
};
use archer_operator::Result;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Default)]
struct MemoryStore {
    services: Arc<Mutex<HashMap<String, Service>>>,
}

impl MemoryStore {
    fn put(&self, svc: Service) {
        self.services.lock().unwrap().insert(svc.name_any(), svc);
    }

    fn take(&self, name: &str) -> Option<Service> {
        self.services.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn get(&self, _namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.take(name))
    }

    async fn replace(&self, svc: &Service) -> Result<Service> {
        let mut services = self.services.lock().unwrap();
        if svc.metadata.deletion_timestamp.is_some() && svc.finalizers().is_empty() {
            services.remove(&svc.name_any());
        } else {
            services.insert(svc.name_any(), svc.clone());
        }
        Ok(svc.clone())
    }
}

fn web_service() -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("uid-1".to_string()),
            annotations: Some(BTreeMap::from([
                ("cloud.sap/archer-create".to_string(), "true".to_string()),
                ("cloud.sap/archer-proxy-protocol".to_string(), "true".to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("10.0.0.1".to_string()),
            ports: Some(vec![ServicePort {
                port: 8080,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn remote_json() -> serde_json::Value {
    json!({
        "id": "es-42",
        "name": "default-web",
        "description": "Kubernetes service default/web",
        "enabled": true,
        "ip_addresses": ["10.0.0.1/32"],
        "network_id": "net-1",
        "port": 8080,
        "proxy_protocol": true,
        "require_approval": false,
        "tags": ["kubernetes", "uid-1"],
        "visibility": "public",
        "status": "AVAILABLE",
        "project_id": "project-1"
    })
}

fn reconciler(
    server: &MockServer,
    store: &MemoryStore,
) -> ServiceReconciler<MemoryStore, ArcherClient> {
    let client = ArcherClient::new(
        &server.uri(),
        Some("token".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    ServiceReconciler::new(
        store.clone(),
        client,
        &ControllerConfig::new("cloud.sap", "net-1"),
    )
}

#[tokio::test]
async fn test_service_is_published_then_cleaned_up() {
    let server = MockServer::start().await;
    let store = MemoryStore::default();
    store.put(web_service());

    Mock::given(method("GET"))
        .and(path("/service"))
        .and(query_param("tags", "kubernetes,uid-1"))
        .and(header(AUTH_TOKEN_HEADER, "token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/service"))
        .and(body_partial_json(json!({
            "name": "default-web",
            "port": 8080,
            "network_id": "net-1",
            "proxy_protocol": true,
            "ip_addresses": ["10.0.0.1"],
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(remote_json()))
        .expect(1)
        .mount(&server)
        .await;

    let reconciler = reconciler(&server, &store);
    let outcome = reconciler.reconcile("default", "web").await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Created {
            id: "es-42".to_string()
        }
    );

    let svc = store.take("web").unwrap();
    assert_eq!(svc.finalizers(), &["cloud.sap/finalizer".to_string()]);
    assert_eq!(
        svc.annotations().get("cloud.sap/archer-id").map(String::as_str),
        Some("es-42")
    );

    // The endpoint service now shows up and matches; nothing is written.
    Mock::given(method("GET"))
        .and(path("/service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [remote_json()] })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = reconciler.reconcile("default", "web").await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::InSync {
            id: "es-42".to_string()
        }
    );

    // Deletion: Archer already lost the endpoint service, cleanup still completes.
    Mock::given(method("DELETE"))
        .and(path("/service/es-42"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut svc = store.take("web").unwrap();
    svc.metadata.deletion_timestamp = Some(Time(Utc::now()));
    store.put(svc);

    let outcome = reconciler.reconcile("default", "web").await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Released {
            deleted: Some("es-42".to_string())
        }
    );
    assert!(store.take("web").is_none());
}

#[tokio::test]
async fn test_broker_rejection_surfaces_as_error() {
    let server = MockServer::start().await;
    let store = MemoryStore::default();
    store.put(web_service());

    Mock::given(method("GET"))
        .and(path("/service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/service"))
        .respond_with(ResponseTemplate::new(409).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let err = reconciler(&server, &store)
        .reconcile("default", "web")
        .await
        .unwrap_err();

    assert!(err.is_retriable());
    assert_eq!(err.kind(), "broker");
    assert!(err.to_string().contains("quota exceeded"));
    let svc = store.take("web").unwrap();
    assert!(!svc.annotations().contains_key("cloud.sap/archer-id"));
}
