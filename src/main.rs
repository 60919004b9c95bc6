//! Stackpilot - provision, reconfigure and tear down the booklist stack

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stackpilot::client::{create_client, KubeControlPlane};
use stackpilot::config::{StackConfig, TeardownOrder};
use stackpilot::descriptors::StackDescriptors;
use stackpilot::orchestrator::Orchestrator;
use stackpilot::shutdown::ShutdownSignal;

/// Stackpilot - provisions the booklist stack and removes it on SIGINT/SIGTERM
#[derive(Parser, Debug)]
#[command(name = "stackpilot", version, about, long_about = None)]
struct Cli {
    /// Namespace to provision into
    #[arg(long, env = "STACKPILOT_NAMESPACE", default_value = stackpilot::DEFAULT_NAMESPACE)]
    namespace: String,

    /// Seconds between convergence checks
    #[arg(
        long,
        env = "STACKPILOT_POLL_INTERVAL_SECS",
        default_value_t = stackpilot::DEFAULT_POLL_INTERVAL.as_secs()
    )]
    poll_interval_secs: u64,

    /// Path to a single kubeconfig file
    ///
    /// When omitted the config is inferred, which honours a multi-file
    /// `KUBECONFIG` list.
    #[arg(long, env = "STACKPILOT_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Delete dependents first (route, service, workload, config)
    ///
    /// By default teardown deletes in creation order.
    #[arg(long)]
    reverse_teardown: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print the stack manifests as YAML and exit
    #[arg(long)]
    print_manifests: bool,
}

impl Cli {
    fn stack_config(&self) -> StackConfig {
        StackConfig {
            namespace: self.namespace.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            teardown_order: if self.reverse_teardown {
                TeardownOrder::Reverse
            } else {
                TeardownOrder::CreationOrder
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.stack_config();
    config.validate()?;

    if cli.print_manifests {
        let stack = StackDescriptors::compile(&config.namespace, config.initial_replicas);
        print!("{}", stack.to_yaml()?);
        return Ok(());
    }

    // Listen for shutdown before anything is created
    let shutdown = ShutdownSignal::install().context("failed to listen for shutdown signals")?;

    let client = match create_client(cli.kubeconfig.as_deref()).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create Kubernetes client");
            std::process::exit(1);
        }
    };

    tracing::info!(
        namespace = %config.namespace,
        poll_interval = ?config.poll_interval,
        teardown_order = ?config.teardown_order,
        "Provisioning stack"
    );

    let orchestrator = Orchestrator::new(Arc::new(KubeControlPlane::new(client)), config);
    let report = orchestrator.run(shutdown).await;

    for record in report.failures() {
        tracing::warn!(step = %record.step, outcome = ?record.outcome, "Step failed during run");
    }
    if report.is_degraded() {
        tracing::warn!(
            failed_steps = report.failures().count(),
            undeleted = report.undeleted().len(),
            "Run finished degraded"
        );
    } else {
        tracing::info!("Run finished cleanly");
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}
