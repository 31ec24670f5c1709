use std::path::Path;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Load the master-side worker configuration from an optional file plus the
/// environment (prefix `LATENT`, `__` as the section separator).
pub fn load_config(config_file_path: Option<&Path>) -> anyhow::Result<Config> {
    let mut settings = config::Config::builder();

    if let Some(path) = config_file_path {
        settings = settings.add_source(config::File::from(path).required(true));
    }

    let settings = settings
        .add_source(
            config::Environment::with_prefix("LATENT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize::<Config>()?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Latent workers available to the dispatcher, one controller each.
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker identity, as announced to the dispatcher.
    pub name: String,

    /// Auth shared secret. The master creates latent workers itself, so a
    /// missing password is generated at controller construction.
    #[serde(default)]
    pub password: Option<String>,

    /// Seconds to keep an idle instance alive after its last build. Negative
    /// means the controller never shuts the worker down itself; zero shuts it
    /// down immediately after each build.
    #[serde(default = "default::build_wait_timeout")]
    pub build_wait_timeout: i64,

    /// Deadline for a started instance to connect back to the master. Zero
    /// disables the deadline.
    #[serde(with = "humantime_serde")]
    #[serde(default = "default::missing_timeout")]
    pub missing_timeout: Duration,

    /// Recipients of worker-missing notifications.
    #[serde(default)]
    pub notify_on_missing: Vec<String>,
}

/// Compute a random worker password: 20 characters from `[A-Za-z0-9]`.
#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

pub mod default {
    use std::time::Duration;

    pub fn build_wait_timeout() -> i64 {
        600
    }

    pub fn missing_timeout() -> Duration {
        Duration::from_secs(3600)
    }
}
