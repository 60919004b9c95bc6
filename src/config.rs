//! Runtime configuration for a provisioning run

use std::time::Duration;

use crate::{Error, DEFAULT_NAMESPACE, DEFAULT_POLL_INTERVAL};

/// Order in which teardown deletes the tracked resources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TeardownOrder {
    /// Same order as creation: config, workload, service, route
    #[default]
    CreationOrder,
    /// Dependents first: route, service, workload, config
    Reverse,
}

/// Settings for one provisioning run
#[derive(Clone, Debug, PartialEq)]
pub struct StackConfig {
    /// Namespace every resource is created in
    pub namespace: String,
    /// Sleep between convergence checks
    pub poll_interval: Duration,
    /// Replica count the workload is created with
    pub initial_replicas: i32,
    /// Replica count the workload is scaled to
    pub scaled_replicas: i32,
    /// Teardown deletion order
    pub teardown_order: TeardownOrder,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_replicas: 1,
            scaled_replicas: 2,
            teardown_order: TeardownOrder::default(),
        }
    }
}

impl StackConfig {
    /// Config for `namespace` with every other setting at its default
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<(), Error> {
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if self.initial_replicas < 0 || self.scaled_replicas < 0 {
            return Err(Error::config("replica counts must not be negative"));
        }
        Ok(())
    }
}
