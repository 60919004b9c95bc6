//! Control-plane client seam
//!
//! [`ControlPlane`] is the only way the rest of the crate talks to the
//! cluster. Production uses [`KubeControlPlane`]; tests substitute a mock or
//! an in-memory fake.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, trace};

#[cfg(test)]
use mockall::automock;

use crate::resource::{Resource, ResourceHandle, ResourceKind, StackResource};
use crate::Error;

/// Create, read, patch and delete stack resources on a control plane
///
/// Every call returns the server-observed state. Reads are safe to retry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create `resource` in `namespace`
    ///
    /// Fails with [`Error::Conflict`] if it already exists.
    async fn create(&self, namespace: &str, resource: &Resource) -> Result<Resource, Error>;

    /// Fetch the current state of `handle`
    ///
    /// Fails with [`Error::NotFound`] if it does not exist.
    async fn get(&self, handle: &ResourceHandle) -> Result<Resource, Error>;

    /// Apply a JSON patch to `handle`
    async fn patch(
        &self,
        handle: &ResourceHandle,
        patch: &json_patch::Patch,
    ) -> Result<Resource, Error>;

    /// Delete `handle`
    async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error>;
}

/// [`ControlPlane`] backed by a kube-rs [`Client`]
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StackResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create_typed<K: StackResource>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<Resource, Error> {
        let handle = ResourceHandle::new(
            K::KIND,
            namespace,
            obj.meta().name.clone().unwrap_or_default(),
        );
        trace!(resource = %handle, "create");
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map(K::into_resource)
            .map_err(|e| Error::from_kube(&handle, e))
    }

    async fn get_typed<K: StackResource>(&self, handle: &ResourceHandle) -> Result<Resource, Error> {
        trace!(resource = %handle, "get");
        self.api::<K>(&handle.namespace)
            .get(&handle.name)
            .await
            .map(K::into_resource)
            .map_err(|e| Error::from_kube(handle, e))
    }

    async fn patch_typed<K: StackResource>(
        &self,
        handle: &ResourceHandle,
        patch: &json_patch::Patch,
    ) -> Result<Resource, Error> {
        trace!(resource = %handle, ops = patch.0.len(), "patch");
        self.api::<K>(&handle.namespace)
            .patch(
                &handle.name,
                &PatchParams::default(),
                &Patch::<()>::Json(patch.clone()),
            )
            .await
            .map(K::into_resource)
            .map_err(|e| Error::from_kube(handle, e))
    }

    async fn delete_typed<K: StackResource>(&self, handle: &ResourceHandle) -> Result<(), Error> {
        trace!(resource = %handle, "delete");
        self.api::<K>(&handle.namespace)
            .delete(&handle.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(handle, e))
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn create(&self, namespace: &str, resource: &Resource) -> Result<Resource, Error> {
        match resource {
            Resource::Config(o) => self.create_typed(namespace, o).await,
            Resource::Workload(o) => self.create_typed(namespace, o).await,
            Resource::Service(o) => self.create_typed(namespace, o).await,
            Resource::Route(o) => self.create_typed(namespace, o).await,
        }
    }

    async fn get(&self, handle: &ResourceHandle) -> Result<Resource, Error> {
        match handle.kind {
            ResourceKind::Config => self.get_typed::<ConfigMap>(handle).await,
            ResourceKind::Workload => self.get_typed::<Deployment>(handle).await,
            ResourceKind::Service => self.get_typed::<Service>(handle).await,
            ResourceKind::Route => self.get_typed::<Ingress>(handle).await,
        }
    }

    async fn patch(
        &self,
        handle: &ResourceHandle,
        patch: &json_patch::Patch,
    ) -> Result<Resource, Error> {
        match handle.kind {
            ResourceKind::Config => self.patch_typed::<ConfigMap>(handle, patch).await,
            ResourceKind::Workload => self.patch_typed::<Deployment>(handle, patch).await,
            ResourceKind::Service => self.patch_typed::<Service>(handle, patch).await,
            ResourceKind::Route => self.patch_typed::<Ingress>(handle, patch).await,
        }
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error> {
        match handle.kind {
            ResourceKind::Config => self.delete_typed::<ConfigMap>(handle).await,
            ResourceKind::Workload => self.delete_typed::<Deployment>(handle).await,
            ResourceKind::Service => self.delete_typed::<Service>(handle).await,
            ResourceKind::Route => self.delete_typed::<Ingress>(handle).await,
        }
    }
}

/// Default connection timeout for the kube client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for the kube client
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
///
/// `kubeconfig` names exactly one file. Without it the configuration is
/// inferred (`KUBECONFIG`, which may list several files, then
/// `~/.kube/config`, then in-cluster). Any failure here is fatal to the run.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "Loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::client(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::client(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::client(format!("failed to infer config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| Error::client(format!("failed to create client: {}", e)))
}
