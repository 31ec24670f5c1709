use tokio::sync::mpsc;
use tracing::warn;

/// Opaque descriptor of the build request that triggered a substantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub id: u64,
    pub builder: String,
}

/// One-way notifications from a controller back into the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherEvent {
    /// Capacity may have been freed; re-evaluate pending builds for this
    /// worker.
    MaybeStartBuilds { worker: String },

    /// A substantiation failed while a notify list is configured.
    WorkerMissing {
        worker: String,
        last_connection: String,
        notify: Vec<String>,
    },

    /// The worker was removed from service and will not come back without a
    /// reconfiguration.
    WorkerGone { worker: String },
}

/// Message sink into the dispatcher.
///
/// Deliberately fire-and-forget: the controller notifies, it never queries.
/// A dropped receiving end is logged and otherwise ignored, so a controller
/// can outlive its dispatcher during shutdown.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    sender: mpsc::UnboundedSender<DispatcherEvent>,
}

impl DispatcherHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatcherEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn maybe_start_builds(&self, worker: &str) {
        self.send(DispatcherEvent::MaybeStartBuilds {
            worker: worker.to_owned(),
        });
    }

    pub fn worker_missing(&self, worker: &str, last_connection: &str, notify: Vec<String>) {
        self.send(DispatcherEvent::WorkerMissing {
            worker: worker.to_owned(),
            last_connection: last_connection.to_owned(),
            notify,
        });
    }

    pub fn worker_gone(&self, worker: &str) {
        self.send(DispatcherEvent::WorkerGone {
            worker: worker.to_owned(),
        });
    }

    fn send(&self, event: DispatcherEvent) {
        if let Err(error) = self.sender.send(event) {
            warn!(?error, "dispatcher receiver dropped, event discarded");
        }
    }
}
