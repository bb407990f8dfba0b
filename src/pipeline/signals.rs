// Signal handling for cooperative shutdown of a run

use super::StopHandle;
use crate::error::{LexembedError, Result};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};
use tokio::task::JoinHandle;

/// Signal handler that manages multiple Unix signals
pub struct SignalHandler {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
}

impl SignalHandler {
    /// Create a new signal handler
    /// Sets up handlers for SIGTERM, SIGINT and SIGHUP
    pub fn new() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate()).map_err(|e| LexembedError::Io {
            source: e,
            context: "Failed to setup SIGTERM handler".to_string(),
        })?;
        let sigint = signal(SignalKind::interrupt()).map_err(|e| LexembedError::Io {
            source: e,
            context: "Failed to setup SIGINT handler".to_string(),
        })?;
        let sighup = signal(SignalKind::hangup()).map_err(|e| LexembedError::Io {
            source: e,
            context: "Failed to setup SIGHUP handler".to_string(),
        })?;

        Ok(Self {
            sigterm,
            sigint,
            sighup,
        })
    }

    /// Wait for any signal to be received
    /// Returns a string indicating which signal was received
    pub async fn wait(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                "terminate"
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                "interrupt"
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                "hangup"
            }
        }
    }

    /// Request a stop on the first signal; exit immediately on the second
    pub fn spawn(mut self, stop: StopHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.wait().await;
            tracing::info!("Finishing the current batch before stopping (signal again to abort)");
            stop.stop();

            let sig = self.wait().await;
            tracing::warn!("Aborting on second {}; the partial batch is repaired next run", sig);
            std::process::exit(130);
        })
    }
}
