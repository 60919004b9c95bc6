//! Shutdown trigger
//!
//! Turns an OS termination signal into a cancellation value that is passed
//! explicitly to the orchestrator. Repeated signals collapse into one
//! trigger.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cloneable handle that fires once when the process is asked to stop
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Create a signal that only fires through [`ShutdownSignal::trigger`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal wired to SIGINT (and SIGTERM on unix)
    ///
    /// The OS listeners are registered before this returns, so a failure to
    /// register surfaces here instead of as a spurious trigger. Must be called
    /// from within a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        let listener = OsSignals::register()?;
        let signal = Self::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            match listener.recv().await {
                Ok(name) => {
                    info!(signal = name, "Shutdown signal received");
                    trigger.trigger();
                }
                // The stack stays up; only a kill will end the process now
                Err(e) => error!(error = %e, "Lost the shutdown signal listener"),
            }
        });
        Ok(signal)
    }

    /// Fire the signal; later calls are no-ops
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// True once the signal has fired
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal fires
    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

#[cfg(unix)]
struct OsSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSignals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) -> std::io::Result<&'static str> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok("SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }
}

#[cfg(not(unix))]
struct OsSignals;

#[cfg(not(unix))]
impl OsSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
    }
}
