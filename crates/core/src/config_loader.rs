use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::config::{AppConfig, ConfigError};

/// Environment variables override file values, e.g. `OPTFLOW_BROKER__TOKEN`.
pub const ENV_PREFIX: &str = "OPTFLOW_";

/// Builds an [`AppConfig`] from defaults, `Config.toml`, an optional profile
/// file, and the environment, in that order of precedence.
pub struct ConfigLoader {
    dir: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new("config")
    }
}

impl ConfigLoader {
    /// Loader reading `Config.toml` and `Config.<profile>.toml` from `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Loads and validates configuration without a profile overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be parsed or the result fails validation.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.extract(self.base())
    }

    /// Loads configuration with `Config.<profile>.toml` merged over the base file.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be parsed or the result fails validation.
    pub fn load_with_profile(&self, profile: &str) -> Result<AppConfig, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(self.dir.join("Config.toml")))
            .merge(Toml::file(self.dir.join(format!("Config.{profile}.toml"))))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        self.extract(figment)
    }

    fn base(&self) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(self.dir.join("Config.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    #[allow(clippy::unused_self)]
    fn extract(&self, figment: Figment) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        tracing::debug!(dir = %self.dir.display(), "configuration loaded");
        Ok(config)
    }
}
