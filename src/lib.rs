#![doc = include_str!("../Readme.md")]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatcher;
pub mod shutdown;
pub mod transport;
mod utils;
pub mod worker;

pub use config::{load_config, Config, WorkerConfig};
pub use worker::{Driver, LatentWorker, State, SubstantiationError, WorkerStatus};
