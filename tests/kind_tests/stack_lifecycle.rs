//! A full provisioning run against a real API server

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;

use stackpilot::client::KubeControlPlane;
use stackpilot::config::StackConfig;
use stackpilot::descriptors::{CONFIG_NAME, ROUTE_NAME, SERVICE_NAME, WORKLOAD_NAME};
use stackpilot::orchestrator::{Orchestrator, Phase};
use stackpilot::resource::{desired_replicas, node_port, service_type};
use stackpilot::shutdown::ShutdownSignal;

use super::helpers::{cleanup_namespace, ensure_test_cluster, fresh_namespace};

const TEST_NAMESPACE: &str = "stackpilot-lifecycle";

/// Story: provisioning an empty namespace leaves a scaled workload behind a
/// NodePort service, and teardown removes all four objects
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_provision_and_tear_down_in_kind() {
    let client = ensure_test_cluster().await.expect("test cluster");
    fresh_namespace(&client, TEST_NAMESPACE)
        .await
        .expect("test namespace");

    let config = StackConfig {
        poll_interval: Duration::from_secs(1),
        ..StackConfig::for_namespace(TEST_NAMESPACE)
    };
    let mut orch = Orchestrator::new(Arc::new(KubeControlPlane::new(client.clone())), config);

    let phase = tokio::time::timeout(
        Duration::from_secs(300),
        orch.provision(&ShutdownSignal::new()),
    )
    .await
    .expect("provisioning finished in time");
    assert_eq!(phase, Phase::Ready);
    assert!(!orch.report().is_degraded(), "{:?}", orch.report());

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let services: Api<Service> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let configs: Api<ConfigMap> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let routes: Api<Ingress> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    let deployment = deployments.get(WORKLOAD_NAME).await.expect("deployment");
    assert_eq!(desired_replicas(&deployment), Some(2));

    let service = services.get(SERVICE_NAME).await.expect("service");
    assert_eq!(service_type(&service), Some("NodePort"));
    let port = node_port(&service).expect("node port allocated");

    let report = orch.teardown().await;
    assert_eq!(report.node_port(), Some(port));
    assert!(report.undeleted().is_empty());

    assert!(configs.get_opt(CONFIG_NAME).await.unwrap().is_none());
    assert!(services.get_opt(SERVICE_NAME).await.unwrap().is_none());
    assert!(routes.get_opt(ROUTE_NAME).await.unwrap().is_none());

    cleanup_namespace(&client, TEST_NAMESPACE).await;
}
