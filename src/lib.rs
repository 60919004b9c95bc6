//! Stackpilot - provisions a small application stack on Kubernetes, waits for
//! it to converge, reconfigures it and tears it down on shutdown.
//!
//! # Lifecycle
//!
//! One run per process:
//! - Create a ConfigMap, Deployment, Service and Ingress, in that order
//! - Wait until the Deployment reports its initial replica count
//! - Scale the Deployment up and wait again
//! - Switch the Service to NodePort and wait for the change
//! - Report the allocated node port and idle until a termination signal
//! - Delete everything that was created
//!
//! Errors along the way are logged and recorded but never abort the run.
//!
//! # Modules
//!
//! - [`resource`] - Resource kinds, handles and typed observers
//! - [`descriptors`] - The declarative stack objects
//! - [`poll`] - Fixed-interval convergence polling
//! - [`client`] - Control-plane client seam and kube-rs implementation
//! - [`ops`] - Typed create, create-or-patch, get and delete
//! - [`orchestrator`] - The provisioning state machine and run report
//! - [`shutdown`] - Signal-driven shutdown trigger
//! - [`config`] - Runtime configuration
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod descriptors;
pub mod error;
pub mod ops;
pub mod orchestrator;
pub mod poll;
pub mod resource;
pub mod shutdown;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Sleep between convergence checks
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);
