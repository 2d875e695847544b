//! Graceful shutdown for the daemon.
//!
//! The first SIGINT or SIGTERM cancels a [`CancellationToken`]; scheduler
//! jobs stop taking new ticks and an in-flight sync runs to completion. A
//! second signal exits immediately.

use tokio_util::sync::CancellationToken;

/// Spawn the signal listener and return the token it cancels.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();

    let handler_token = token.clone();
    tokio::spawn(async move {
        let mut signals_seen = 0u32;
        loop {
            if !wait_for_signal().await {
                return;
            }
            signals_seen += 1;
            if signals_seen == 1 {
                tracing::info!("Shutdown requested, waiting for the running sync to finish");
                handler_token.cancel();
            } else {
                tracing::warn!("Second signal received, exiting now");
                std::process::exit(130);
            }
        }
    });

    token
}

/// Resolve on the next shutdown signal. Returns `false` if no signal can be
/// listened for at all.
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                res = tokio::signal::ctrl_c() => res.is_ok(),
                _ = sigterm.recv() => true,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl+C will stop the daemon");
            wait_for_ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            false
        }
    }
}
