//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! A signal never abandons a privileged child: the running operation is
//! cancelled and its terminal event is still processed before exit.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::supervisor::OperationSupervisor;

/// Shutdown coordinator
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Fires once shutdown has been requested.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGTERM or SIGINT, then trigger shutdown.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        #[cfg(unix)]
        let terminate = terminate.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.trigger();
        Ok(())
    }

    /// Listen for signals in the background until the returned task is
    /// aborted. Only long-running work should hold a listener; otherwise
    /// Ctrl-C keeps its default behaviour.
    pub fn listen(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.wait_for_signal().await {
                warn!("Cannot listen for shutdown signals: {}", e);
            }
        })
    }

    /// Drive the supervisor until it is idle. Shutdown cancels the running
    /// operation once; its remaining events are still drained.
    pub async fn drive(&self, supervisor: &mut OperationSupervisor) {
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled(), if !cancelled => {
                    cancelled = true;
                    if supervisor.is_busy() {
                        info!("Shutdown requested, cancelling running operation");
                        supervisor.cancel();
                    }
                }
                more = supervisor.process_next() => {
                    if !more {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
