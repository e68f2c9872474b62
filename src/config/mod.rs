mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, LogSettings, RelaySettings, Settings, TlsSettings};

/// Default configuration file, looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Prefix of environment overrides, e.g. `RELAY__BROKER__TENANT=acme`.
pub const ENV_PREFIX: &str = "RELAY";

/// Loads the configuration from a file and environment variables.
///
/// `path` names the configuration file; when `None` the optional
/// `config/default.{toml,yaml,json}` is used. Environment variables override
/// the file, and anything left unset takes its default value.
pub fn load_config(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__"),
    );

    builder.build()?.try_deserialize()
}
