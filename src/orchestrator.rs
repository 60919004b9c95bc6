//! Stack lifecycle orchestration
//!
//! The orchestrator drives one forward-only run:
//!
//! ```text
//! Init -> ConfigCreated -> WorkloadCreated -> ServiceCreated -> RouteCreated
//!      -> AwaitingInitialConvergence -> Converged
//!      -> Scaling -> AwaitingScaleConvergence
//!      -> Exposing -> AwaitingExposeConvergence
//!      -> Ready -> (wait for shutdown) -> ShuttingDown -> TornDown
//! ```
//!
//! Every step is sequential. A failed step is logged, recorded in the
//! [`RunReport`] and the run moves on to the next step. Teardown deletes
//! every handle known to exist, whatever phase the run reached, and a failed
//! deletion never stops the remaining ones.

use std::fmt;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use tracing::{error, info, instrument, warn};

use crate::client::ControlPlane;
use crate::config::{StackConfig, TeardownOrder};
use crate::descriptors::{StackDescriptors, SERVICE_NAME, WORKLOAD_NAME};
use crate::ops::{self, Verb};
use crate::poll::await_condition;
use crate::resource::{
    node_port, observed_replicas, service_type, ResourceHandle, ResourceKind, ServiceType,
    StackResource,
};
use crate::shutdown::ShutdownSignal;
use crate::Error;

/// Lifecycle phase of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Nothing has been attempted yet
    Init,
    /// ConfigMap create attempted
    ConfigCreated,
    /// Deployment create attempted
    WorkloadCreated,
    /// Service create attempted
    ServiceCreated,
    /// Ingress create attempted
    RouteCreated,
    /// Waiting for the initial replica count
    AwaitingInitialConvergence,
    /// Initial replica wait finished
    Converged,
    /// Raising the replica count
    Scaling,
    /// Waiting for the scaled replica count
    AwaitingScaleConvergence,
    /// Switching the service to node exposure
    Exposing,
    /// Waiting for the service type change
    AwaitingExposeConvergence,
    /// Stack is up and idle until shutdown
    Ready,
    /// Deleting tracked resources
    ShuttingDown,
    /// Teardown finished
    TornDown,
}

/// A unit of work recorded in the run report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Create a resource
    Create(ResourceKind),
    /// Wait for the workload to reach its initial replica count
    AwaitInitialReplicas,
    /// Raise the workload replica count
    Scale,
    /// Wait for the workload to reach its scaled replica count
    AwaitScaledReplicas,
    /// Switch the service to node exposure
    Expose,
    /// Wait for the service type change
    AwaitExposed,
    /// Delete a resource
    Delete(ResourceKind),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Create(kind) => write!(f, "create {}", kind),
            Step::AwaitInitialReplicas => f.write_str("await initial replicas"),
            Step::Scale => f.write_str("scale workload"),
            Step::AwaitScaledReplicas => f.write_str("await scaled replicas"),
            Step::Expose => f.write_str("expose service"),
            Step::AwaitExposed => f.write_str("await service exposure"),
            Step::Delete(kind) => write!(f, "delete {}", kind),
        }
    }
}

/// How a step ended
#[derive(Debug)]
pub enum Outcome {
    /// The step did what it set out to do
    Succeeded,
    /// The step failed; the run continued regardless
    Failed(Error),
    /// A convergence wait was abandoned because shutdown was requested
    Interrupted,
}

impl Outcome {
    /// True for [`Outcome::Failed`]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// One recorded step
#[derive(Debug)]
pub struct StepRecord {
    /// What was attempted
    pub step: Step,
    /// How it ended
    pub outcome: Outcome,
}

/// Everything that happened during a run
#[derive(Debug, Default)]
pub struct RunReport {
    records: Vec<StepRecord>,
    node_port: Option<i32>,
    undeleted: Vec<ResourceHandle>,
}

impl RunReport {
    /// All steps in the order they ran
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Steps that failed
    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(|r| r.outcome.is_failed())
    }

    /// True if any step failed
    pub fn is_degraded(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Node port allocated for the exposed service, if one was observed
    pub fn node_port(&self) -> Option<i32> {
        self.node_port
    }

    /// Handles whose deletion failed during teardown
    pub fn undeleted(&self) -> &[ResourceHandle] {
        &self.undeleted
    }

    /// Outcome of the first record for `step`
    pub fn outcome(&self, step: Step) -> Option<&Outcome> {
        self.records.iter().find(|r| r.step == step).map(|r| &r.outcome)
    }

    fn push(&mut self, step: Step, outcome: Outcome) {
        self.records.push(StepRecord { step, outcome });
    }
}

/// Drives a single provisioning run against a control plane
///
/// Owns the set of handles it has created. [`Orchestrator::teardown`]
/// consumes the orchestrator, so teardown runs at most once.
pub struct Orchestrator {
    client: Arc<dyn ControlPlane>,
    config: StackConfig,
    phase: Phase,
    tracked: Vec<ResourceHandle>,
    workload: Option<Deployment>,
    service: Option<Service>,
    report: RunReport,
}

impl Orchestrator {
    /// Create an orchestrator for `config`
    pub fn new(client: Arc<dyn ControlPlane>, config: StackConfig) -> Self {
        Self {
            client,
            config,
            phase: Phase::Init,
            tracked: Vec::new(),
            workload: None,
            service: None,
            report: RunReport::default(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handles known to exist, in creation order
    pub fn tracked(&self) -> &[ResourceHandle] {
        &self.tracked
    }

    /// Last observed state of the workload
    pub fn observed_workload(&self) -> Option<&Deployment> {
        self.workload.as_ref()
    }

    /// Last observed state of the service
    pub fn observed_service(&self) -> Option<&Service> {
        self.service.as_ref()
    }

    /// Steps recorded so far
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Provision the stack, idle until `shutdown` fires, then tear down
    ///
    /// If shutdown fires while provisioning, the run stops at the next step
    /// boundary and tears down what exists.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> RunReport {
        let reached = self.provision(&shutdown).await;
        if reached == Phase::Ready {
            info!("Stack ready, waiting for shutdown signal");
            shutdown.wait().await;
        } else {
            warn!(phase = ?reached, "Shutdown requested before the stack was ready");
        }
        self.teardown().await
    }

    /// Run every provisioning step up to [`Phase::Ready`]
    ///
    /// Returns the phase reached. Anything short of `Ready` means `shutdown`
    /// fired first.
    #[instrument(skip_all, fields(namespace = %self.config.namespace))]
    pub async fn provision(&mut self, shutdown: &ShutdownSignal) -> Phase {
        let ns = self.config.namespace.clone();
        let stack = StackDescriptors::compile(&ns, self.config.initial_replicas);
        let workload = ResourceHandle::new(ResourceKind::Workload, &ns, WORKLOAD_NAME);
        let service = ResourceHandle::new(ResourceKind::Service, &ns, SERVICE_NAME);

        if shutdown.is_triggered() {
            return self.phase;
        }
        self.create_step(stack.config, Phase::ConfigCreated).await;
        if shutdown.is_triggered() {
            return self.phase;
        }
        let workload_spec = stack.workload.spec.clone();
        if let Some(d) = self.create_step(stack.workload, Phase::WorkloadCreated).await {
            self.workload = Some(d);
        }
        if shutdown.is_triggered() {
            return self.phase;
        }
        if let Some(s) = self.create_step(stack.service, Phase::ServiceCreated).await {
            self.service = Some(s);
        }
        if shutdown.is_triggered() {
            return self.phase;
        }
        self.create_step(stack.route, Phase::RouteCreated).await;
        if shutdown.is_triggered() {
            return self.phase;
        }

        // Initial convergence
        self.phase = Phase::AwaitingInitialConvergence;
        let initial = self.config.initial_replicas;
        let (outcome, observed) = self
            .converge(shutdown, "deployment to be created", &workload, |d: &Deployment| {
                observed_replicas(d) == initial
            })
            .await;
        self.workload = observed.or(self.workload.take());
        if self.finish_wait(Step::AwaitInitialReplicas, outcome, "deployment created") {
            return self.phase;
        }
        self.phase = Phase::Converged;

        // Scale up
        if shutdown.is_triggered() {
            return self.phase;
        }
        self.phase = Phase::Scaling;
        let scaled = self.config.scaled_replicas;
        // An absent workload is recreated from its descriptor at the scaled count
        let result = ops::create_or_patch(self.client.as_ref(), &workload, move |mut d: Deployment| {
            if d.spec.is_none() {
                d.spec = workload_spec.clone();
            }
            d.spec.get_or_insert_with(Default::default).replicas = Some(scaled);
            d
        })
        .await;
        match result {
            Ok((d, verb)) => {
                info!(resource = %workload, replicas = scaled, %verb, "Scaled workload");
                if verb == Verb::Created && !self.tracked.contains(&workload) {
                    self.tracked.push(workload.clone());
                }
                self.workload = Some(d);
                self.report.push(Step::Scale, Outcome::Succeeded);
            }
            Err(e) => {
                error!(resource = %workload, error = %e, "Failed to scale workload");
                self.report.push(Step::Scale, Outcome::Failed(e));
            }
        }

        self.phase = Phase::AwaitingScaleConvergence;
        let (outcome, observed) = self
            .converge(shutdown, "deployment to be scaled", &workload, |d: &Deployment| {
                observed_replicas(d) == scaled
            })
            .await;
        self.workload = observed.or(self.workload.take());
        if self.finish_wait(Step::AwaitScaledReplicas, outcome, "deployment scaled") {
            return self.phase;
        }

        // Expose
        if shutdown.is_triggered() {
            return self.phase;
        }
        self.phase = Phase::Exposing;
        match ops::patch(self.client.as_ref(), &service, expose).await {
            Ok((s, verb)) => {
                info!(resource = %service, %verb, "Switched service to NodePort");
                self.service = Some(s);
                self.report.push(Step::Expose, Outcome::Succeeded);
            }
            Err(e) => {
                error!(resource = %service, error = %e, "Failed to expose service");
                self.report.push(Step::Expose, Outcome::Failed(e));
            }
        }

        self.phase = Phase::AwaitingExposeConvergence;
        let (outcome, observed) = self
            .converge(shutdown, "service to be updated", &service, |s: &Service| {
                service_type(s) == Some(ServiceType::NodeExposed.as_str())
            })
            .await;
        self.service = observed.or(self.service.take());
        if self.finish_wait(Step::AwaitExposed, outcome, "service updated") {
            return self.phase;
        }

        self.phase = Phase::Ready;
        self.report.node_port = self.service.as_ref().and_then(node_port);
        match self.report.node_port {
            Some(port) => info!(node_port = port, "NodePort = {}", port),
            None => warn!(resource = %service, "No node port allocated"),
        }
        self.phase
    }

    /// Delete every tracked handle and return the run report
    #[instrument(skip_all, fields(namespace = %self.config.namespace))]
    pub async fn teardown(mut self) -> RunReport {
        self.phase = Phase::ShuttingDown;
        info!(resources = self.tracked.len(), "Shutting down");

        let mut handles = std::mem::take(&mut self.tracked);
        if self.config.teardown_order == TeardownOrder::Reverse {
            handles.reverse();
        }

        for handle in handles {
            match ops::delete(self.client.as_ref(), &handle).await {
                Ok(()) => {
                    info!(resource = %handle, "Deleted");
                    self.report.push(Step::Delete(handle.kind), Outcome::Succeeded);
                }
                Err(e) => {
                    error!(resource = %handle, error = %e, "Failed to delete");
                    self.report.push(Step::Delete(handle.kind), Outcome::Failed(e));
                    self.report.undeleted.push(handle);
                }
            }
        }

        self.phase = Phase::TornDown;
        info!(
            failed_steps = self.report.failures().count(),
            "Teardown complete"
        );
        self.report
    }

    /// Create one descriptor, track its handle and advance to `next`
    ///
    /// A Conflict means an object with this identity already exists, so its
    /// handle is tracked for teardown even though the create failed.
    async fn create_step<K: StackResource>(&mut self, obj: K, next: Phase) -> Option<K> {
        let handle = ResourceHandle::new(
            K::KIND,
            &self.config.namespace,
            obj.meta().name.clone().unwrap_or_default(),
        );
        let step = Step::Create(K::KIND);

        let observed = match ops::create(self.client.as_ref(), &self.config.namespace, &obj).await {
            Ok(observed) => {
                info!(resource = %handle, "Created");
                self.tracked.push(handle);
                self.report.push(step, Outcome::Succeeded);
                Some(observed)
            }
            Err(e) if e.is_conflict() => {
                warn!(resource = %handle, error = %e, "Resource already exists, continuing");
                self.tracked.push(handle);
                self.report.push(step, Outcome::Failed(e));
                None
            }
            Err(e) => {
                error!(resource = %handle, error = %e, "Failed to create");
                self.report.push(step, Outcome::Failed(e));
                None
            }
        };
        self.phase = next;
        observed
    }

    /// Poll `handle` until `ready` holds, giving up early if shutdown fires
    ///
    /// Returns the outcome and the last observed object.
    async fn converge<K, P>(
        &self,
        shutdown: &ShutdownSignal,
        description: &str,
        handle: &ResourceHandle,
        ready: P,
    ) -> (Outcome, Option<K>)
    where
        K: StackResource,
        P: Fn(&K) -> bool,
    {
        info!("waiting for {}", description);

        let last: Mutex<Option<K>> = Mutex::new(None);
        let client = self.client.as_ref();
        let last_ref = &last;
        let ready = &ready;
        let check = move || async move {
            let observed = ops::get::<K, _>(client, handle).await?;
            let done = ready(&observed);
            *last_ref.lock().unwrap_or_else(|p| p.into_inner()) = Some(observed);
            Ok::<bool, Error>(done)
        };

        let outcome = tokio::select! {
            biased;
            _ = shutdown.wait() => Outcome::Interrupted,
            res = await_condition(description, self.config.poll_interval, check) => match res {
                Ok(_) => Outcome::Succeeded,
                Err(e) => Outcome::Failed(e),
            },
        };

        let observed = last.into_inner().unwrap_or_else(|p| p.into_inner());
        (outcome, observed)
    }

    /// Record a finished wait; true if the run should stop for shutdown
    fn finish_wait(&mut self, step: Step, outcome: Outcome, done_msg: &str) -> bool {
        let interrupted = matches!(outcome, Outcome::Interrupted);
        match &outcome {
            Outcome::Succeeded => info!("{}", done_msg),
            Outcome::Failed(e) => error!(step = %step, error = %e, "Wait failed, continuing"),
            Outcome::Interrupted => warn!(step = %step, "Wait abandoned for shutdown"),
        }
        self.report.push(step, outcome);
        interrupted
    }
}

fn expose(mut service: Service) -> Service {
    service.spec.get_or_insert_with(Default::default).type_ =
        Some(ServiceType::NodeExposed.as_str().to_string());
    service
}
