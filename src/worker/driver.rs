use async_trait::async_trait;
use tracing::error;

use crate::dispatcher::Build;
use crate::worker::error::SubstantiationError;

/// Backend contract for creating and destroying remote worker instances.
///
/// Implementations provision an instance configured to connect back to the
/// master (cloud VM, container, ...). `start_instance` resolves to `Ok(true)`
/// once the instance was started, `Ok(false)` as a polite "don't run a build
/// here right now", and `Err` for hard failures. The controller treats
/// `Ok(false)` as a failed substantiation.
///
/// Neither operation is retried or cancelled by the controller; retries and
/// tear-down reliability are the backend's responsibility.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    async fn start_instance(&self, build: &Build) -> anyhow::Result<bool>;

    /// Decommission the instance. `fast` hints best-effort rapid tear-down,
    /// used while the enclosing service is stopping.
    async fn stop_instance(&self, fast: bool) -> anyhow::Result<()>;
}

/// Canonical failure for drivers whose instance came up in a broken state.
pub fn failed_to_start(
    worker: &str,
    instance_id: &str,
    instance_state: &str,
) -> SubstantiationError {
    error!(worker, instance_id, instance_state, "instance failed to start");
    SubstantiationError::FailedToSubstantiate {
        worker: worker.to_owned(),
        reason: format!("instance {instance_id} failed to start ({instance_state})"),
    }
}
