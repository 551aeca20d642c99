//! OS signal handling.
//!
//! SIGTERM and SIGINT both start the graceful shutdown. Every signal is
//! forwarded to the coordinator, so a repeat while the sequence runs is
//! logged and ignored rather than queued.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::shutdown::{ShutdownCoordinator, ShutdownOutcome};

/// Listen for termination signals until the shutdown sequence finishes.
pub async fn wait_for_shutdown(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<ShutdownOutcome> {
    let (tx, rx) = mpsc::channel(8);
    spawn_signal_forwarder(tx)?;
    Ok(drive(coordinator, rx).await)
}

#[cfg(unix)]
fn spawn_signal_forwarder(tx: mpsc::Sender<&'static str>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tracing::info!("Graceful shutdown handlers registered");

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            if tx.send(name).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_forwarder(tx: mpsc::Sender<&'static str>) -> std::io::Result<()> {
    tracing::info!("Graceful shutdown handlers registered");
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send("SIGINT").await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// Hand each received signal to the coordinator and return the outcome of
/// the sequence the first one started.
pub async fn drive(coordinator: Arc<ShutdownCoordinator>, mut signals: mpsc::Receiver<&'static str>) -> ShutdownOutcome {
    let mut handlers: JoinSet<Option<ShutdownOutcome>> = JoinSet::new();
    let mut open = true;

    loop {
        tokio::select! {
            received = signals.recv(), if open => match received {
                Some(name) => {
                    let coordinator = coordinator.clone();
                    handlers.spawn(async move { coordinator.on_termination_signal(name).await });
                }
                None => open = false,
            },
            Some(joined) = handlers.join_next() => match joined {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Shutdown sequence task failed");
                    return ShutdownOutcome::Aborted;
                }
            },
            else => {
                tracing::error!("Signal source closed before shutdown started");
                return ShutdownOutcome::Aborted;
            }
        }
    }
}
