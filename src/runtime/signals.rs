//! Process-level hooks: termination signals and panic logging.
//!
//! Signals go through [`ServiceRuntime::fatal`] and end the process. Panics
//! are only logged: a panicking request handler or schedule is already
//! contained by its task and does not take the service down.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ServiceRuntime;

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut user2) =
        match (signal(SignalKind::terminate()), signal(SignalKind::user_defined2())) {
            (Ok(terminate), Ok(user2)) => (terminate, user2),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to register signal handlers, only ctrl-c is handled");
                ctrl_c().await;
                return "SIGINT";
            }
        };

    tokio::select! {
        _ = ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = user2.recv() => "SIGUSR2",
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    ctrl_c().await;
    "ctrl-c"
}

/// Route SIGINT, SIGTERM and SIGUSR2 to `runtime.fatal(true)`.
pub fn install(runtime: Arc<ServiceRuntime>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = termination_signal().await;
        info!(signal, "Received termination signal");
        runtime.fatal(true).await;
    })
}

/// Log every panic as an uncaught exception without escalating it.
pub fn install_panic_logger() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let location = panic_info.location().map(|l| format!("{}:{}", l.file(), l.line()));

        error!(panic = %message, location = ?location, "Uncaught exception");
    }));
}
