use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on the first SIGTERM or SIGINT.
///
/// Coordinator tasks hold children of this token and only observe it between
/// ticks, so in-flight work finishes and the node signs off before exiting. A
/// second signal while that drain is running exits the process at once.
pub fn install_shutdown_handler() -> crate::error::Result<CancellationToken> {
    let token = CancellationToken::new();
    let drain = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        let mut received = 0u32;
        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            received += 1;

            if received == 1 {
                tracing::info!(signal = name, "Draining coordinator tasks");
                drain.cancel();
            } else {
                tracing::warn!(signal = name, "Second signal during drain, exiting now");
                std::process::exit(130);
            }
        }
    });

    Ok(token)
}
