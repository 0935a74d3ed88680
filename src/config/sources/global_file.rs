//! Global config file source: `$XDG_CONFIG_HOME/agent-analytics/config.toml`
//! (or the platform equivalent).

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::PathBuf;
use tracing::debug;

/// Path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "agent-analytics")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add the global config file to the builder if it exists.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let Some(path) = global_config_path() else {
        return Ok(builder);
    };
    if !path.exists() {
        debug!(config_path = %path.display(), "No global configuration file");
        return Ok(builder);
    }
    let canonical = path.canonicalize().unwrap_or(path);
    Ok(builder.add_source(File::from(canonical).required(false)))
}
