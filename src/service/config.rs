extern crate config as _;

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Queue capacity used when the configuration does not name one.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

const ENV_PREFIX: &str = "KAFKA_INPUT";

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Configuration of one kafka input.
///
/// `host` holds one or more comma separated `host:port` endpoints. When
/// `use_json` is set every payload is treated as a JSON encoded
/// [`HttpEnvelope`](crate::HttpEnvelope) and rendered into its replay form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputKafkaConfig {
    pub host: String,
    pub topic: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// worker threads of the runtime driving the partition tasks,
    /// defaults to the number of cpus
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl InputKafkaConfig {
    pub fn new(host: impl Into<String>, topic: impl Into<String>, use_json: bool) -> Self {
        Self {
            host: host.into(),
            topic: topic.into(),
            use_json,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_threads: None,
        }
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = Some(worker_threads);
        self
    }

    /// Broker endpoints, split on commas with blanks dropped.
    pub fn brokers(&self) -> Vec<String> {
        self.host
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.brokers().is_empty() {
            return Err(AppError::InvalidValue(format!(
                "host must name at least one broker, got '{}'",
                self.host
            )));
        }
        if self.topic.trim().is_empty() {
            return Err(AppError::InvalidValue("topic must not be empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::InvalidValue(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(AppError::InvalidValue(
                "worker_threads must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the configuration from a file, overlaid by `KAFKA_INPUT_*`
    /// environment variables.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<InputKafkaConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;

        let input_config: InputKafkaConfig = config.try_deserialize()?;
        input_config.validate()?;

        Ok(input_config)
    }
}
