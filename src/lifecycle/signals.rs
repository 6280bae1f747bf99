//! OS signal handling.
//!
//! # Design Decisions
//! - SIGTERM / SIGINT (Ctrl+C) request shutdown
//! - SIGHUP requests a route reload, not shutdown
//! - Non-unix targets only see Ctrl+C

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Reload,
}

/// Wait for the next signal of interest.
#[cfg(unix)]
pub async fn next_signal() -> Signal {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => (term, hup),
        (term, hup) => {
            if let Err(e) = term.and(hup) {
                tracing::warn!(error = %e, "Failed to install signal handlers, only Ctrl+C is honoured");
            }
            return ctrl_c().await;
        }
    };

    tokio::select! {
        signal = ctrl_c() => signal,
        _ = term.recv() => {
            tracing::info!("SIGTERM received");
            Signal::Shutdown
        }
        _ = hup.recv() => {
            tracing::info!("SIGHUP received");
            Signal::Reload
        }
    }
}

#[cfg(not(unix))]
pub async fn next_signal() -> Signal {
    ctrl_c().await
}

async fn ctrl_c() -> Signal {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
    Signal::Shutdown
}
