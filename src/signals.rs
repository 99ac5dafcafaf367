//! Shutdown signal handling.
//!
//! The first SIGINT or SIGTERM cancels the stop token so the controller can
//! drain; a second one exits the process immediately with status 1.

use std::io;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Listen for shutdown signals in a background task.
///
/// # Errors
///
/// Fails if the signal handlers cannot be registered.
pub fn spawn_signal_handler(stop: CancellationToken) -> io::Result<JoinHandle<()>> {
    let signals = os_signals()?;
    Ok(tokio::spawn(handle_signals(signals, stop, || {
        std::process::exit(1)
    })))
}

/// Cancel `stop` on the first signal and call `exit` on the second.
pub async fn handle_signals<S, F>(signals: S, stop: CancellationToken, exit: F)
where
    S: Stream<Item = &'static str> + Send,
    F: FnOnce() + Send,
{
    let mut signals = std::pin::pin!(signals);
    let Some(first) = signals.next().await else {
        return;
    };
    info!(signal = first, "Received shutdown signal, stopping controller");
    stop.cancel();

    if let Some(second) = signals.next().await {
        warn!(signal = second, "Received second shutdown signal, exiting");
        exit();
    }
}

#[cfg(unix)]
fn os_signals() -> io::Result<impl Stream<Item = &'static str> + Send> {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = signal(SignalKind::interrupt())?;
    let terminate = signal(SignalKind::terminate())?;
    Ok(futures::stream::unfold(
        (interrupt, terminate),
        |(mut interrupt, mut terminate)| async move {
            let name = tokio::select! {
                Some(()) = interrupt.recv() => "SIGINT",
                Some(()) = terminate.recv() => "SIGTERM",
                else => return None,
            };
            Some((name, (interrupt, terminate)))
        },
    ))
}

#[cfg(not(unix))]
fn os_signals() -> io::Result<impl Stream<Item = &'static str> + Send> {
    Ok(futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok()?;
        Some(("ctrl-c", ()))
    }))
}
