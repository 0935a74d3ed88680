//! Merge rules: defaults applied under every other source.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Only keys that select a shape need defaults here; every other field falls
/// back to its serde default.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("sink.type", "memory")?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")
}
