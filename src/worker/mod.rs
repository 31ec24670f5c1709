mod controller;
pub mod driver;
pub mod error;
mod notifier;
mod timer;

pub use controller::{LatentWorker, State, WorkerStatus};
pub use driver::Driver;
pub use error::{AttachError, SubstantiationError};
