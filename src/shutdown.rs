use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

/// Shared flag telling controllers whether the enclosing service is still
/// running.
///
/// A controller consults it before waiting out an in-flight substantiation
/// during soft-disconnect: once the service is going down, the worker manager
/// will not accept new connections and waiting would never settle.
#[derive(Clone, Debug)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self { sender, receiver }
    }

    /// Signal the service to shut down.
    pub fn shutdown(&self) {
        // Does not fail because we hold a receiver ourselves.
        self.sender.send(true).unwrap();
    }

    /// Are we currently shutting down?
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the service to shut down.
    ///
    /// Resolves immediately if shutdown was already signalled. The resulting
    /// future is safe to cancel by dropping.
    pub async fn await_shutdown(&self) {
        let mut watch = self.receiver.clone();
        if *watch.borrow_and_update() {
            return;
        }
        // Does not fail because we hold a sender ourselves.
        watch.changed().await.unwrap();
    }

    /// Trip this handle when the process receives SIGINT or SIGTERM.
    pub fn watch_signals(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            match signal_shutdown().await {
                Ok(()) => this.shutdown(),
                Err(err) => tracing::error!("Error handling shutdown signals: {}", err),
            }
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn signal_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let sigint = signal(SignalKind::interrupt())?;
    let sigterm = signal(SignalKind::terminate())?;
    tokio::pin!(sigint);
    tokio::pin!(sigterm);
    tokio::select! {
        _ = sigint.recv() => { info!("SIGINT received, shutting down"); }
        _ = sigterm.recv() => { info!("SIGTERM received, shutting down"); }
    };
    Ok(())
}

#[cfg(not(unix))]
async fn signal_shutdown() -> Result<()> {
    use tokio::signal::ctrl_c;

    ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    Ok(())
}
