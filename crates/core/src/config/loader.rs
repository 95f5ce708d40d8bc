use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment variable prefix; nested keys are separated by `__`
/// (e.g. `PRICEGUARD_ACCOUNT__PASSWORD`).
pub const ENV_PREFIX: &str = "PRICEGUARD_";

/// Load configuration from file with environment variable overrides.
///
/// A missing file is accepted when the environment alone provides every
/// required key.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let env = Env::prefixed(ENV_PREFIX).split("__");

    if !path.exists() {
        return Figment::new()
            .merge(env)
            .extract()
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(env)
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
