//! Live-cluster tests for stackpilot
//!
//! These tests run the orchestrator against a real API server (kind) and tell
//! the story of one provisioning run from an empty namespace to a clean one.
//!
//! - `stack_lifecycle`: provision, check what the API server holds, tear down
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod helpers;
mod stack_lifecycle;
