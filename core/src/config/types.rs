use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently registered workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Threads used to filter batched admissions. Unset means one per CPU.
    #[serde(default)]
    pub batch_threads: Option<usize>,

    /// Name prefix for spawned engine threads.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    #[serde(default)]
    pub thread_stack_size: Option<usize>,

    /// Upper bound on how long an idle worker sleeps while a task it waits on
    /// is claimed outside the engine (e.g. by `TaskGraph::run`). Claims held
    /// by engine workers wake waiters on completion instead.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_thread_name() -> String {
    "taskflow-worker".to_string()
}

fn default_idle_poll_ms() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            batch_threads: None,
            thread_name: default_thread_name(),
            thread_stack_size: None,
            idle_poll_ms: default_idle_poll_ms(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.batch_threads == Some(0) {
            return Err(ConfigError::Invalid("batch_threads must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }
        Ok(())
    }

    /// Threads to use when filtering a batch of `len` tasks.
    pub fn batch_threads_for(&self, len: usize) -> usize {
        self.batch_threads
            .unwrap_or_else(num_cpus::get)
            .min(len)
            .max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts granted to a task whose callback panics, the first run included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// EnvFilter string, e.g. "info" or "taskflow_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            level: default_logging_level(),
        }
    }
}
