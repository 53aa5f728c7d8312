use std::path::Path;

use super::types::EngineConfig;
use crate::error::ConfigError;

pub const ENV_MAX_WORKERS: &str = "TASKFLOW_MAX_WORKERS";
pub const ENV_LOG_LEVEL: &str = "TASKFLOW_LOG_LEVEL";

pub fn from_toml_str(s: &str) -> Result<EngineConfig, ConfigError> {
    let cfg = toml::from_str::<EngineConfig>(s)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load a config file, falling back to defaults when it does not exist, then
/// apply environment overrides.
pub fn load(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();

    let mut cfg = if path.exists() {
        let s = std::fs::read_to_string(path)?;
        toml::from_str::<EngineConfig>(&s)?
    } else {
        EngineConfig::default()
    };

    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

/// Environment variable overrides (highest priority).
pub fn apply_env_overrides<F>(cfg: &mut EngineConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup(ENV_MAX_WORKERS) {
        if !v.trim().is_empty() {
            cfg.max_workers = v.trim().parse::<usize>().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_MAX_WORKERS} is not a number: {v}"))
            })?;
        }
    }
    if let Some(v) = lookup(ENV_LOG_LEVEL) {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }
    Ok(())
}
