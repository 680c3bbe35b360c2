//! Cancellation envelope around a single attempt.

use crate::error::{Result, UpstreamError};
use std::future::Future;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::debug;

/// Run `attempt` on its own task and race it against `token`.
///
/// The attempt's result travels back over a oneshot channel. If the token
/// fires first the task is aborted and [`UpstreamError::Cancelled`] is
/// returned without waiting for the round-trip to finish. Dropping the
/// returned future aborts the task as well.
pub async fn run_cancellable<F, T>(token: &CancellationToken, attempt: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if token.is_cancelled() {
        return Err(UpstreamError::Cancelled);
    }

    let (tx, rx) = oneshot::channel();
    let task = AbortOnDropHandle::new(tokio::spawn(async move {
        // The receiver is gone only when the caller was cancelled.
        let _ = tx.send(attempt.await);
    }));

    tokio::select! {
        biased;

        _ = token.cancelled() => {
            debug!("Attempt cancelled while in flight");
            task.abort();
            Err(UpstreamError::Cancelled)
        }
        result = rx => match result {
            Ok(result) => result,
            Err(_) => Err(task_failure(task.await)),
        },
    }
}

fn task_failure(joined: std::result::Result<(), tokio::task::JoinError>) -> UpstreamError {
    match joined {
        Err(e) if e.is_panic() => UpstreamError::TaskFailed("attempt panicked".to_string()),
        Err(e) => UpstreamError::TaskFailed(e.to_string()),
        Ok(()) => UpstreamError::TaskFailed("attempt ended without a result".to_string()),
    }
}
