//! In-memory control plane for orchestration tests
//!
//! Records every call in order and simulates just enough server behaviour:
//! - Deployments report `status.replicas == spec.replicas` after a configurable
//!   number of reads (or never, when stalled)
//! - Services switched to NodePort get a node port allocated
//! - Creating an existing object fails with Conflict

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use serde_json::Value;

use stackpilot::client::ControlPlane;
use stackpilot::resource::{Resource, ResourceHandle, ResourceKind, ServiceType};
use stackpilot::Error;

/// First node port handed out
pub const FIRST_NODE_PORT: i32 = 30080;

/// A recorded control-plane call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    Create(ResourceKind),
    Get(ResourceKind),
    Patch(ResourceKind),
    Delete(ResourceKind),
}

impl Call {
    fn is_mutation(&self) -> bool {
        !matches!(self, Call::Get(_))
    }
}

#[derive(Default)]
struct State {
    objects: HashMap<ResourceHandle, Resource>,
    calls: Vec<Call>,
    failing_creates: HashSet<ResourceKind>,
    failing_first_creates: HashSet<ResourceKind>,
    failing_deletes: HashSet<ResourceKind>,
    rollout_lag: u32,
    workload_reads: u32,
    stalled: bool,
    get_limit: Option<usize>,
    gets: usize,
    next_node_port: i32,
}

pub struct FakeControlPlane {
    state: Mutex<State>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_node_port: FIRST_NODE_PORT,
                ..Default::default()
            }),
        }
    }

    /// Seed an object that exists before the run starts
    pub fn with_existing(self, namespace: &str, mut resource: Resource) -> Self {
        let handle = resource.handle(namespace).expect("seeded object needs a name");
        let mut state = self.state.lock().unwrap();
        state.allocate_node_ports(&mut resource);
        state.objects.insert(handle, resource);
        drop(state);
        self
    }

    /// Reads of a Deployment needed before its status catches up
    pub fn with_rollout_lag(self, reads: u32) -> Self {
        self.state.lock().unwrap().rollout_lag = reads;
        self
    }

    /// Deployments never report any replicas
    pub fn stalled(self) -> Self {
        self.state.lock().unwrap().stalled = true;
        self
    }

    /// Every get after the first `n` fails
    pub fn with_get_limit(self, n: usize) -> Self {
        self.state.lock().unwrap().get_limit = Some(n);
        self
    }

    /// Creates of `kind` fail with a non-conflict error
    pub fn failing_create(self, kind: ResourceKind) -> Self {
        self.state.lock().unwrap().failing_creates.insert(kind);
        self
    }

    /// Only the first create of `kind` fails; later ones go through
    pub fn failing_first_create(self, kind: ResourceKind) -> Self {
        self.state.lock().unwrap().failing_first_creates.insert(kind);
        self
    }

    /// Deletes of `kind` fail
    pub fn failing_delete(self, kind: ResourceKind) -> Self {
        self.state.lock().unwrap().failing_deletes.insert(kind);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls other than reads, in order
    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    pub fn object(&self, handle: &ResourceHandle) -> Option<Resource> {
        self.state.lock().unwrap().objects.get(handle).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }
}

fn to_value(resource: &Resource) -> Value {
    match resource {
        Resource::Config(o) => serde_json::to_value(o),
        Resource::Workload(o) => serde_json::to_value(o),
        Resource::Service(o) => serde_json::to_value(o),
        Resource::Route(o) => serde_json::to_value(o),
    }
    .expect("serializable")
}

fn from_value(kind: ResourceKind, value: Value) -> Resource {
    match kind {
        ResourceKind::Config => Resource::Config(serde_json::from_value(value).unwrap()),
        ResourceKind::Workload => Resource::Workload(serde_json::from_value(value).unwrap()),
        ResourceKind::Service => Resource::Service(serde_json::from_value(value).unwrap()),
        ResourceKind::Route => Resource::Route(serde_json::from_value(value).unwrap()),
    }
}

impl State {
    fn allocate_node_ports(&mut self, resource: &mut Resource) {
        let Resource::Service(svc) = resource else {
            return;
        };
        let Some(spec) = svc.spec.as_mut() else {
            return;
        };
        if spec.type_.as_deref() != Some(ServiceType::NodeExposed.as_str()) {
            return;
        }
        for port in spec.ports.iter_mut().flatten() {
            if port.node_port.is_none() {
                port.node_port = Some(self.next_node_port);
                self.next_node_port += 1;
            }
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create(&self, namespace: &str, resource: &Resource) -> Result<Resource, Error> {
        let mut state = self.state.lock().unwrap();
        let kind = resource.kind();
        state.calls.push(Call::Create(kind));

        if state.failing_creates.contains(&kind) || state.failing_first_creates.remove(&kind) {
            return Err(Error::client("injected create failure"));
        }
        let handle = resource.handle(namespace).expect("create needs a name");
        if state.objects.contains_key(&handle) {
            return Err(Error::Conflict { handle });
        }

        let mut stored = resource.clone();
        state.allocate_node_ports(&mut stored);
        if kind == ResourceKind::Workload {
            state.workload_reads = 0;
        }
        state.objects.insert(handle, stored.clone());
        Ok(stored)
    }

    async fn get(&self, handle: &ResourceHandle) -> Result<Resource, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Get(handle.kind));
        state.gets += 1;
        if matches!(state.get_limit, Some(limit) if state.gets > limit) {
            return Err(Error::client("get limit reached"));
        }

        if handle.kind == ResourceKind::Workload {
            state.workload_reads += 1;
        }
        let converge = !state.stalled && state.workload_reads > state.rollout_lag;

        let object = state
            .objects
            .get_mut(handle)
            .ok_or_else(|| Error::NotFound {
                handle: handle.clone(),
            })?;
        if let Resource::Workload(d) = object {
            if converge {
                let desired = d.spec.as_ref().and_then(|s| s.replicas);
                d.status.get_or_insert_with(DeploymentStatus::default).replicas = desired;
            }
        }
        Ok(object.clone())
    }

    async fn patch(
        &self,
        handle: &ResourceHandle,
        patch: &json_patch::Patch,
    ) -> Result<Resource, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Patch(handle.kind));

        let current = state.objects.get(handle).ok_or_else(|| Error::NotFound {
            handle: handle.clone(),
        })?;
        let mut doc = to_value(current);
        json_patch::patch(&mut doc, patch).map_err(|e| Error::serialization(e.to_string()))?;

        let mut updated = from_value(handle.kind, doc);
        state.allocate_node_ports(&mut updated);
        if handle.kind == ResourceKind::Workload {
            state.workload_reads = 0;
        }
        state.objects.insert(handle.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(handle.kind));

        if state.failing_deletes.contains(&handle.kind) {
            return Err(Error::client("injected delete failure"));
        }
        state
            .objects
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                handle: handle.clone(),
            })
    }
}
