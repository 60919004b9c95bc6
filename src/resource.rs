//! Resource identities and the typed objects the stack is made of
//!
//! The stack has exactly four kinds of resource. Each maps onto one
//! Kubernetes API type from `k8s-openapi`:
//!
//! | Kind | API type |
//! |---|---|
//! | [`ResourceKind::Config`] | `core/v1 ConfigMap` |
//! | [`ResourceKind::Workload`] | `apps/v1 Deployment` |
//! | [`ResourceKind::Service`] | `core/v1 Service` |
//! | [`ResourceKind::Route`] | `networking.k8s.io/v1 Ingress` |

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Error;

/// The four kinds of resource a stack is built from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Key/value configuration object
    Config,
    /// Scalable workload
    Workload,
    /// Cluster-internal network service
    Service,
    /// External routing rule
    Route,
}

impl ResourceKind {
    /// All kinds in provisioning order
    pub const CREATION_ORDER: [ResourceKind; 4] = [
        ResourceKind::Config,
        ResourceKind::Workload,
        ResourceKind::Service,
        ResourceKind::Route,
    ];

    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Config => "ConfigMap",
            ResourceKind::Workload => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::Route => "Ingress",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a resource: kind, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    /// Resource kind
    pub kind: ResourceKind,
    /// Namespace the resource lives in
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceHandle {
    /// Create a handle
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A resource snapshot of any of the four kinds
///
/// This is what crosses the [`crate::client::ControlPlane`] seam, so a single
/// object-safe trait can serve all kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    /// ConfigMap
    Config(ConfigMap),
    /// Deployment
    Workload(Deployment),
    /// Service
    Service(Service),
    /// Ingress
    Route(Ingress),
}

impl Resource {
    /// Kind of the wrapped object
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Config(_) => ResourceKind::Config,
            Resource::Workload(_) => ResourceKind::Workload,
            Resource::Service(_) => ResourceKind::Service,
            Resource::Route(_) => ResourceKind::Route,
        }
    }

    /// Object metadata of the wrapped object
    pub fn metadata(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            Resource::Config(o) => &o.metadata,
            Resource::Workload(o) => &o.metadata,
            Resource::Service(o) => &o.metadata,
            Resource::Route(o) => &o.metadata,
        }
    }

    /// Handle for the wrapped object, if it carries a name
    ///
    /// Objects without a namespace fall back to `default_namespace`.
    pub fn handle(&self, default_namespace: &str) -> Option<ResourceHandle> {
        let meta = self.metadata();
        let name = meta.name.as_ref()?;
        let namespace = meta.namespace.as_deref().unwrap_or(default_namespace);
        Some(ResourceHandle::new(self.kind(), namespace, name))
    }
}

/// A Kubernetes type that is one of the four stack kinds
///
/// Lets the mutation operations stay generic while the control-plane seam
/// deals in [`Resource`].
pub trait StackResource:
    kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
    + Clone
    + Default
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Which stack kind this type is
    const KIND: ResourceKind;

    /// Wrap into a [`Resource`]
    fn into_resource(self) -> Resource;

    /// Unwrap from a [`Resource`], failing on a kind mismatch
    fn from_resource(resource: Resource) -> Result<Self, Error>;
}

macro_rules! stack_resource {
    ($ty:ty, $variant:ident) => {
        impl StackResource for $ty {
            const KIND: ResourceKind = ResourceKind::$variant;

            fn into_resource(self) -> Resource {
                Resource::$variant(self)
            }

            fn from_resource(resource: Resource) -> Result<Self, Error> {
                match resource {
                    Resource::$variant(obj) => Ok(obj),
                    other => Err(Error::KindMismatch {
                        expected: Self::KIND,
                        actual: other.kind(),
                    }),
                }
            }
        }
    };
}

stack_resource!(ConfigMap, Config);
stack_resource!(Deployment, Workload);
stack_resource!(Service, Service);
stack_resource!(Ingress, Route);

/// Exposure mode of the network service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceType {
    /// Reachable only from inside the cluster (`ClusterIP`)
    ClusterLocal,
    /// Allocated a port on every node (`NodePort`)
    NodeExposed,
}

impl ServiceType {
    /// Kubernetes `spec.type` value
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ClusterLocal => "ClusterIP",
            ServiceType::NodeExposed => "NodePort",
        }
    }
}

/// Replica count the control plane reports in `status.replicas`
pub fn observed_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0)
}

/// Replica count requested in `spec.replicas`
pub fn desired_replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|s| s.replicas)
}

/// Observed `spec.type` of a service
pub fn service_type(service: &Service) -> Option<&str> {
    service.spec.as_ref().and_then(|s| s.type_.as_deref())
}

/// Externally reachable port allocated for the first service port
pub fn node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .and_then(|p| p.node_port)
}
