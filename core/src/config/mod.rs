mod load;
mod types;

pub use load::{apply_env_overrides, from_toml_str, load, ENV_LOG_LEVEL, ENV_MAX_WORKERS};
pub use types::{EngineConfig, LoggingConfig, RetryConfig};
