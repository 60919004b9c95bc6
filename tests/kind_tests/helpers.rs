//! Test helpers for live-cluster tests
//!
//! Provides utilities for managing the kind cluster and test namespaces.

use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Config};
use tokio::time::sleep;

/// Name of the kind cluster used for live tests
pub const TEST_CLUSTER_NAME: &str = "stackpilot-test";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Run `kind` with `args`, returning stdout or a readable failure
fn run_kind(args: &[&str]) -> Result<String, String> {
    let output = Command::new("kind")
        .args(args)
        .output()
        .map_err(|e| format!("kind {}: {e}", args.join(" ")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(format!(
            "kind {} exited with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Make sure the stackpilot test cluster is up, reusing it across runs
pub fn ensure_kind_cluster(name: &str) -> Result<(), String> {
    let clusters = run_kind(&["get", "clusters"])?;
    if clusters.lines().any(|line| line.trim() == name) {
        return Ok(());
    }

    println!("Starting kind cluster '{name}' for stackpilot tests");
    run_kind(&["create", "cluster", "--name", name, "--wait", "90s"]).map(|_| ())
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster is ready (cluster created once per process)
///
/// Returns a fresh Client for each call.
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    CLUSTER_INIT
        .get_or_init(|| ensure_kind_cluster(TEST_CLUSTER_NAME))
        .clone()?;

    create_test_client().await
}

/// Create a namespace, replacing any leftover from an earlier run
pub async fn fresh_namespace(client: &Client, name: &str) -> Result<(), kube::Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            println!("Namespace '{name}' left over, waiting for it to go...");
            while namespaces.get_opt(name).await?.is_some() {
                sleep(Duration::from_secs(2)).await;
            }
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => return Err(e),
    }

    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    namespaces.create(&PostParams::default(), &ns).await?;
    Ok(())
}

/// Delete a namespace without waiting for it to terminate
pub async fn cleanup_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let _ = namespaces.delete(name, &DeleteParams::default()).await;
}
