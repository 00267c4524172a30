//! Signal handling for graceful termination

use console::Term;
use tokio_util::sync::CancellationToken;

/// Wait for the first SIGINT or SIGTERM
async fn next_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Cancel `cancel` on the first signal and exit with 130 on the second
///
/// Cancellation lets the running downloader be killed and the current
/// source's swap discarded before the process returns.
pub fn install(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = next_signal().await {
            tracing::warn!("Failed to install signal handler: {}", e);
            return;
        }

        let is_tty = Term::stderr().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, stopping the current download...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, stopping the current download");
        }

        cancel.cancel();

        if next_signal().await.is_err() {
            return;
        }
        if is_tty {
            eprintln!("Force quit!");
        }
        std::process::exit(130);
    });
}
