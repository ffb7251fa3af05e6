//! Process-wide cancellation.
//!
//! One [`CancellationController`] is created per run and handed to every
//! component that needs to observe it. It fires on SIGINT/SIGTERM/SIGQUIT or
//! on an explicit [`CancellationController::abort`], and never un-fires.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owner of the root cancellation scope.
///
/// Cloning is cheap; all clones observe and fire the same scope.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Observation handle on the root scope.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A derived scope: fires with the root, but can also be fired alone.
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Fire the scope. Later calls are no-ops.
    pub fn abort(&self, reason: &str) {
        if !self.token.is_cancelled() {
            warn!(reason, "abort requested, cancelling");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope has fired.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Spawn a task that fires the scope on the first termination signal.
    ///
    /// The task also exits (without firing) if the scope is cancelled by
    /// someone else first.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = termination_signal() => {
                    info!(signal, "termination signal received, closing application");
                    controller.abort(signal);
                }
                () = controller.cancelled() => {}
            }
        })
    }
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut term, mut quit) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) {
        (Ok(term), Ok(quit)) => (term, quit),
        (Err(e), _) | (_, Err(e)) => {
            warn!("failed to install signal handlers: {e}, listening for Ctrl+C only");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = term.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
