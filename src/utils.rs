use std::future::Future;

use futures::FutureExt;
use tokio::spawn;
use tokio::task::JoinHandle;
use tracing::error;

/// Spawn a fallible background task whose failure is logged and dropped.
///
/// Used where an operation is deliberately fire-and-forget but its errors
/// still need to surface somewhere.
pub(crate) fn spawn_log_err<F>(context: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    spawn(future.map(move |result| {
        if let Err(error) = result {
            error!(?error, "{}", context);
        }
    }))
}
