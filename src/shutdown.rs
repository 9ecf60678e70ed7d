//! Signal handling for the long-running sweep service.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the returned token; the
//! scheduler stops starting new sweeps and the in-flight sweep stops
//! before its next user. A second signal exits immediately.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Exit code used when a second signal forces the process down.
const FORCED_EXIT_CODE: i32 = 130;

pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let received = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate())?,
            signal(SignalKind::hangup())?,
        )
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Cannot listen for Ctrl+C");
                    return;
                }
            }

            if received.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::info!("Shutdown requested, finishing the current user before stopping");
                tracing::info!("Send the signal again to exit immediately");
                handler_token.cancel();
            } else {
                tracing::warn!("Forced exit");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });

    Ok(token)
}
