//! References: https://stackoverflow.com/questions/77585473/rust-tokio-how-to-handle-more-signals-than-just-sigint-i-e-sigquit

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(unix)]
async fn wait_for_signal_impl() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut interrupt) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(t), Ok(i)) => (t, i),
            _ => {
                warn!("unix signal handlers unavailable, falling back to ctrl_c");
                let _ = tokio::signal::ctrl_c().await;
                return "CTRL_C";
            }
        };

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    }
}

#[cfg(windows)]
async fn wait_for_signal_impl() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "CTRL_C"
}

/// Waits for a signal that requests a graceful shutdown.
pub async fn wait_for_stop_signal() -> &'static str {
    wait_for_signal_impl().await
}

/// Root cancellation token for a process, cancelled when `signal` resolves.
///
/// Every long running loop takes a child of this token.
pub fn root_token<F>(signal: F) -> CancellationToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        signal.await;
        trigger.cancel();
    });
    token
}

/// Waits for `work` to finish once shutdown began, bounded by `grace`.
///
/// Returns false when the drain window ran out first.
pub async fn drain<F>(grace: Duration, work: F) -> bool
where
    F: Future<Output = ()>,
{
    match tokio::time::timeout(grace, work).await {
        Ok(()) => {
            info!("drained before grace period of {:?}", grace);
            true
        }
        Err(_) => {
            warn!("grace period of {:?} elapsed before drain finished", grace);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_token_follows_signal() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let token = root_token(async move {
            let _ = rx.await;
        });
        assert!(!token.is_cancelled());
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_is_bounded() {
        assert!(drain(Duration::from_secs(1), async {}).await);
        assert!(!drain(Duration::from_millis(10), std::future::pending::<()>()).await);
    }
}
