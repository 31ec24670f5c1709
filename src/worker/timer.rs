use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A single-shot timer running on the tokio clock.
///
/// Each armed timer carries a sequence id handed out by its owner. Cancelling
/// aborts the timer task, but a firing that already raced past the sleep may
/// still run; the callback therefore re-checks its id against the currently
/// armed timer before acting.
pub(crate) struct OneshotTimer {
    id: u64,
    handle: JoinHandle<()>,
}

impl OneshotTimer {
    pub fn spawn<F>(id: u64, delay: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            on_fire.await;
        });
        Self { id, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}
