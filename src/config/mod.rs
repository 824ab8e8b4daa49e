mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    ClientSettings, DEFAULT_HOST, DEFAULT_MAX_FRAME_LEN, DEFAULT_PORT, LoggingSettings,
    ServerSettings, Settings,
};

/// Prefix of the environment variables read by `load_config`,
/// e.g. `CHATROOM__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "CHATROOM";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the server, client and logging configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}
