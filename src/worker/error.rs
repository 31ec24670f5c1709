use thiserror::Error;

/// Failure of a single substantiation attempt.
///
/// Delivered to every waiter of the attempt through the substantiation
/// notifier, so it has to be cheap to clone.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubstantiationError {
    #[error("latent worker {worker} failed to substantiate: {reason}")]
    FailedToSubstantiate { worker: String, reason: String },

    #[error("substantiation of latent worker {worker} was cancelled")]
    Cancelled { worker: String },
}

#[derive(Debug, Error)]
pub enum AttachError {
    /// A worker connected while the controller was not expecting one. The
    /// incoming transport has already been disconnected.
    #[error("latent worker {worker} received a connection while not substantiating")]
    UnsolicitedConnection { worker: String },

    #[error("attach handshake with latent worker {worker} failed")]
    Handshake {
        worker: String,
        #[source]
        source: anyhow::Error,
    },
}
