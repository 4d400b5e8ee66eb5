use std::fmt;
use std::path::PathBuf;

use clap::Args;

use crate::constants::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::error::ConfigError;

/// Model connection flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// API key for the hosted model (usually provided via `.env`).
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_MODEL, help = "Model used for every call.")]
    pub model: String,

    #[arg(long, default_value = DEFAULT_API_BASE, help = "Base URL of the model API.")]
    pub api_base: String,
}

impl ModelArgs {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        Config::new(self.api_key, self.model, self.api_base)
    }
}

/// Validated startup configuration, shared read-only once the app runs.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("templates_dir", &self.templates_dir)
            .field("static_dir", &self.static_dir)
            .finish()
    }
}

impl Config {
    /// A missing or blank key is fatal.
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(Self {
            api_key,
            model: model.into(),
            api_base: api_base.into(),
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
        })
    }

    /// Points the web shell at its template and static directories.
    pub fn with_assets(
        mut self,
        templates_dir: impl Into<PathBuf>,
        static_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        self.templates_dir = templates_dir.into();
        self.static_dir = static_dir.into();
        for dir in [&self.templates_dir, &self.static_dir] {
            if !dir.is_dir() {
                return Err(ConfigError::MissingDirectory(dir.display().to_string()));
            }
        }
        Ok(self)
    }
}
