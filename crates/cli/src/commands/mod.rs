mod check_config;
mod publish;
mod run;
mod trigger;

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use optflow_core::{AppConfig, ConfigLoader};

pub use check_config::check_config;
pub use publish::{publish, PublishArgs};
pub use run::run;
pub use trigger::{trigger, TriggerArgs};

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Directory holding Config.toml and profile overlays
    #[arg(short, long = "config", default_value = "config", env = "OPTFLOW_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Merge Config.<profile>.toml over the base file
    #[arg(short, long, env = "OPTFLOW_PROFILE")]
    pub profile: Option<String>,
}

impl ConfigArgs {
    pub fn load(&self) -> anyhow::Result<AppConfig> {
        let loader = ConfigLoader::new(&self.config_dir);
        let config = match &self.profile {
            Some(profile) => loader.load_with_profile(profile),
            None => loader.load(),
        };
        config.with_context(|| format!("failed to load config from {}", self.config_dir.display()))
    }
}
