use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process
    Manual,
}

/// Turns OS signals into cancellation of a shared token.
///
/// Every long-running task (ticker loops, the HTTP listener, WebSocket relays) holds a
/// child of the same token and exits once it is cancelled. Without a signal the token
/// is never cancelled and the process runs indefinitely.
#[derive(Debug, Clone)]
pub struct GracefulShutdown {
    token: CancellationToken,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token cancelled once shutdown starts
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Manually trigger shutdown
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        self.initiate_shutdown(reason);
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    ///
    /// Returns early without a signal if shutdown was triggered some other way.
    pub async fn run_signal_handler(&self) {
        tracing::debug!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for SIGINT");
                    return;
                }
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                self.initiate_shutdown(ShutdownReason::Interrupt);
            }
            () = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
                self.initiate_shutdown(ShutdownReason::Terminate);
            }
            () = self.token.cancelled() => {}
        }
    }

    fn initiate_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!(?reason, "Processing shutdown signal");
            self.token.cancel();
        } else {
            tracing::warn!("Shutdown already initiated, ignoring signal");
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C is available off Unix
    std::future::pending::<()>().await;
}
