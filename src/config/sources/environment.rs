//! Environment source: `AGENT_ANALYTICS__PIPELINE__MAX_RETRIES=5` sets `pipeline.max_retries`.

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment};

pub const ENV_PREFIX: &str = "AGENT_ANALYTICS";

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    )
}
