//! Config loading entry point.

use config::ConfigError;
use std::path::Path;

use super::merge::merge_policy;
use super::sources::{environment, explicit_file, global_file};
use super::AnalyticsConfig;

/// Loads [`AnalyticsConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, optional explicit file, then environment.
    pub fn load(explicit: Option<&Path>) -> Result<AnalyticsConfig, ConfigError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = global_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            builder = explicit_file::add_to_builder(builder, path)?;
        }
        builder = environment::add_to_builder(builder);
        builder.build()?.try_deserialize()
    }

    /// Only the given file over defaults. No global file, no environment.
    pub fn load_from_file(path: &Path) -> Result<AnalyticsConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        explicit_file::add_to_builder(builder, path)?
            .build()?
            .try_deserialize()
    }

    /// Built-in defaults only.
    pub fn default() -> AnalyticsConfig {
        AnalyticsConfig::default()
    }
}
