use std::fmt;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<ShutdownReason> {
    let mut sigterm = unix_signal(SignalKind::terminate())?;

    let reason = tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            ShutdownReason::Interrupt
        }
        _ = sigterm.recv() => ShutdownReason::Terminate,
    };
    info!(signal = %reason, "Received shutdown signal, initiating graceful shutdown");
    Ok(reason)
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<ShutdownReason> {
    signal::ctrl_c().await?;
    info!(signal = %ShutdownReason::Interrupt, "Received shutdown signal, initiating graceful shutdown");
    Ok(ShutdownReason::Interrupt)
}
