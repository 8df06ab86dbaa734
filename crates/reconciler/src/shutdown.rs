//! Graceful shutdown handling for the controller.
//!
//! Handles SIGTERM/SIGINT and fans a single shutdown signal out to the
//! queue, the workers, the watch adapters and the garbage collector.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Programmatic shutdown requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Shutdown coordinator shared by every long-running task.
pub struct ShutdownCoordinator {
    initiated: AtomicBool,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            initiated: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate shutdown. Later signals are ignored.
    pub fn initiate_shutdown(&self, signal: ShutdownSignal) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(signal = %signal, "Shutdown already in progress, ignoring duplicate signal");
            return;
        }

        info!(
            signal = %signal,
            subscribers = self.shutdown_tx.receiver_count(),
            "Initiating graceful shutdown"
        );

        // No subscribers is not an error
        if self.shutdown_tx.send(signal).is_err() {
            debug!("No active subscribers for shutdown signal");
        }
    }

    /// Resolve once shutdown has been initiated.
    pub async fn wait(&self) {
        let mut receiver = self.subscribe();
        if self.is_shutdown_initiated() {
            return;
        }
        // Lagged or closed both mean a signal was sent
        let _ = receiver.recv().await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT)
pub fn install_signal_handlers(
    coordinator: Arc<ShutdownCoordinator>,
) -> tokio::task::JoinHandle<()> {
    info!("Installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => coordinator.initiate_shutdown(ShutdownSignal::Sigterm),
                _ = sigint.recv() => coordinator.initiate_shutdown(ShutdownSignal::Sigint),
                () = coordinator.wait() => {}
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => coordinator.initiate_shutdown(ShutdownSignal::Sigint),
                    Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
                },
                () = coordinator.wait() => {}
            }
        }
    })
}
