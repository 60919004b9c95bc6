//! Declarative descriptors for the four stack resources
//!
//! The stack is a single booklist API served from a docker-in-docker pod:
//! - ConfigMap: the port the API listens on
//! - Deployment: dind sidecar plus the container that runs the API image
//! - Service: exposes the API port inside the cluster
//! - Ingress: routes `mybooklist.com/` to the service
//!
//! Cross-resource references are by name only. The Deployment reads its
//! `PORT` from the ConfigMap and the Ingress points at the Service, but
//! nothing here checks that the target exists. The control plane resolves
//! those names.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapKeySelector, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, PodSpec, PodTemplateSpec, SecurityContext, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::resource::{ResourceHandle, ServiceType, StackResource};
use crate::Error;

/// Label key shared by every stack object
pub const LABEL_NAME: &str = "name";

/// ConfigMap name
pub const CONFIG_NAME: &str = "api-configs";
/// ConfigMap key holding the API port
pub const CONFIG_PORT_KEY: &str = "port";
/// Port the API listens on inside the docker container
pub const CONFIG_PORT_VALUE: &str = "1234";

/// Deployment name
pub const WORKLOAD_NAME: &str = "docker-deployment-name";
/// Deployment label value
pub const WORKLOAD_LABEL: &str = "docker-deployment-label";
/// Pod template name
pub const POD_NAME: &str = "docker-pod-name";
/// Pod label value, also the service selector
pub const POD_LABEL: &str = "docker-pod-label";

/// Shared scratch volume for the docker daemon
pub const DIND_VOLUME: &str = "dind-storage";
/// Privileged docker daemon sidecar
pub const DIND_CONTAINER: &str = "docker-dind";
/// Docker daemon image
pub const DIND_IMAGE: &str = "docker:18.09-dind";
/// Container that runs the API image against the sidecar daemon
pub const API_CONTAINER: &str = "docker-container";
/// Docker client image
pub const API_IMAGE: &str = "docker:18.09";
/// Named container port of the API
pub const API_PORT_NAME: &str = "booklist-port";
/// Container port of the API
pub const API_PORT: i32 = 4000;

/// Service name
pub const SERVICE_NAME: &str = "docker-service";
/// Service label value
pub const SERVICE_LABEL: &str = "docker-service-label";
/// Named service port
pub const SERVICE_PORT_NAME: &str = "service-port";
/// Service port
pub const SERVICE_PORT: i32 = 8888;

/// Ingress name
pub const ROUTE_NAME: &str = "booklist-ingress";
/// Ingress label value
pub const ROUTE_LABEL: &str = "booklist-ingress-label";
/// Hostname routed by the ingress
pub const ROUTE_HOST: &str = "mybooklist.com";
/// Path routed by the ingress
pub const ROUTE_PATH: &str = "/";

/// The four descriptors that make up one stack
#[derive(Clone, Debug, PartialEq)]
pub struct StackDescriptors {
    /// API configuration
    pub config: ConfigMap,
    /// API workload
    pub workload: Deployment,
    /// In-cluster service in front of the workload
    pub service: Service,
    /// External route to the service
    pub route: Ingress,
}

impl StackDescriptors {
    /// Build the stack for `namespace` with the workload at `replicas`
    pub fn compile(namespace: &str, replicas: i32) -> Self {
        Self {
            config: compile_config(namespace),
            workload: compile_workload(namespace, replicas),
            service: compile_service(namespace),
            route: compile_route(namespace),
        }
    }

    /// Handles of all four resources in creation order
    pub fn handles(namespace: &str) -> [ResourceHandle; 4] {
        [
            handle::<ConfigMap>(namespace, CONFIG_NAME),
            handle::<Deployment>(namespace, WORKLOAD_NAME),
            handle::<Service>(namespace, SERVICE_NAME),
            handle::<Ingress>(namespace, ROUTE_NAME),
        ]
    }

    /// Render all four objects as a multi-document YAML stream
    pub fn to_yaml(&self) -> Result<String, Error> {
        let docs = [
            to_yaml_doc("v1", "ConfigMap", &self.config)?,
            to_yaml_doc("apps/v1", "Deployment", &self.workload)?,
            to_yaml_doc("v1", "Service", &self.service)?,
            to_yaml_doc("networking.k8s.io/v1", "Ingress", &self.route)?,
        ];
        Ok(docs.join("---\n"))
    }
}

fn handle<K: StackResource>(namespace: &str, name: &str) -> ResourceHandle {
    ResourceHandle::new(K::KIND, namespace, name)
}

// k8s-openapi leaves apiVersion/kind to the client, so add them for output
fn to_yaml_doc<T: serde::Serialize>(
    api_version: &str,
    kind: &str,
    obj: &T,
) -> Result<String, Error> {
    let mut value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), api_version.into());
        map.insert("kind".to_string(), kind.into());
    }
    serde_yaml::to_string(&value).map_err(|e| Error::serialization(e.to_string()))
}

fn labels(value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_NAME.to_string(), value.to_string())])
}

fn meta(name: &str, namespace: &str, label: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: label.map(labels),
        ..Default::default()
    }
}

fn compile_config(namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: meta(CONFIG_NAME, namespace, None),
        data: Some(BTreeMap::from([(
            CONFIG_PORT_KEY.to_string(),
            CONFIG_PORT_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

fn compile_workload(namespace: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: meta(WORKLOAD_NAME, namespace, Some(WORKLOAD_LABEL)),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels(POD_LABEL)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(POD_NAME.to_string()),
                    labels: Some(labels(POD_LABEL)),
                    ..Default::default()
                }),
                spec: Some(compile_pod_spec()),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn compile_pod_spec() -> PodSpec {
    let dind = Container {
        name: DIND_CONTAINER.to_string(),
        image: Some(DIND_IMAGE.to_string()),
        volume_mounts: Some(vec![VolumeMount {
            name: DIND_VOLUME.to_string(),
            mount_path: "/var/lib/docker".to_string(),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    let api = Container {
        name: API_CONTAINER.to_string(),
        image: Some(API_IMAGE.to_string()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![format!(
            "docker run -p {}:$PORT tahsin/booklist-api:0.0.1 --port=$PORT",
            API_PORT
        )]),
        ports: Some(vec![ContainerPort {
            name: Some(API_PORT_NAME.to_string()),
            container_port: API_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: "DOCKER_HOST".to_string(),
                value: Some("tcp://localhost:2375".to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "PORT".to_string(),
                value_from: Some(EnvVarSource {
                    config_map_key_ref: Some(ConfigMapKeySelector {
                        name: CONFIG_NAME.to_string(),
                        key: CONFIG_PORT_KEY.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    PodSpec {
        volumes: Some(vec![Volume {
            name: DIND_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }]),
        containers: vec![dind, api],
        ..Default::default()
    }
}

fn compile_service(namespace: &str) -> Service {
    Service {
        metadata: meta(SERVICE_NAME, namespace, Some(SERVICE_LABEL)),
        spec: Some(ServiceSpec {
            selector: Some(labels(POD_LABEL)),
            type_: Some(ServiceType::ClusterLocal.as_str().to_string()),
            ports: Some(vec![ServicePort {
                name: Some(SERVICE_PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::String(API_PORT_NAME.to_string())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn compile_route(namespace: &str) -> Ingress {
    Ingress {
        metadata: meta(ROUTE_NAME, namespace, Some(ROUTE_LABEL)),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(ROUTE_HOST.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(ROUTE_PATH.to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: SERVICE_NAME.to_string(),
                                port: Some(ServiceBackendPort {
                                    name: Some(SERVICE_PORT_NAME.to_string()),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
