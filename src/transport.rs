use async_trait::async_trait;

/// Transport-side handle for a worker connection.
///
/// The transport owns the link; the controller only completes the attach
/// handshake, reads the handle, and asks for disconnects. A handle arrives
/// through [`LatentWorker::attached`](crate::worker::LatentWorker::attached)
/// and is dropped again when the transport reports
/// [`detached`](crate::worker::LatentWorker::detached).
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Complete the attach handshake with the remote worker.
    async fn accept(&self) -> anyhow::Result<()>;

    /// Drop the link. Also used to reject unsolicited incoming connections.
    async fn disconnect(&self) -> anyhow::Result<()>;
}
