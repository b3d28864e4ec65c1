//! Settings loaded from defaults, TOML files and the environment.
//!
//! ```text
//! SettingsLoader::new()
//!   .with_user_file()        <config_dir>/gitdeck/config.toml (optional)
//!   .with_file(path)         --config FILE (required)
//!   .with_env_prefix("GITDECK")   GITDECK_GIT__CONTEXT_LINES=5
//!        |
//!        v
//!    load() --> Settings
//! ```

use error_set::error_set;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

error_set! {
    /// Errors from loading settings
    ConfigError := {
        #[display("Failed to load configuration: {message}")]
        Load { message: String },
        #[display("Invalid setting {key}: {message}")]
        Invalid { key: String, message: String },
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(error: config::ConfigError) -> Self {
        ConfigError::Load {
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub git: GitSettings,
    pub ai: AiSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// Program to run, looked up on the execution path
    pub binary: String,
    /// Context lines around changes in diffs and line patches
    pub context_lines: u32,
    pub command_timeout_secs: u64,
    /// Timeout for push, pull and fetch
    pub network_timeout_secs: u64,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
            context_lines: 3,
            command_timeout_secs: 30,
            network_timeout_secs: 120,
        }
    }
}

impl GitSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// Suggestions are disabled without a key
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_diff_chars: usize,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_diff_chars: 12_000,
        }
    }
}

impl AiSettings {
    pub fn enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing` filter directive used when neither `RUST_LOG` nor `-v` is given
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Settings {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.git.binary.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "git.binary".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.git.command_timeout_secs == 0 || self.git.network_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "git.*_timeout_secs".to_string(),
                message: "must be at least one second".to_string(),
            });
        }
        Ok(self)
    }
}

/// Builder for loading settings from multiple sources; later sources win.
pub struct SettingsLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    env_prefix: Option<String>,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            builder: config::Config::builder(),
            env_prefix: None,
        }
    }

    /// Location of the per-user settings file
    pub fn user_file() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gitdeck").join("config.toml"))
    }

    #[must_use]
    pub fn with_user_file(self) -> Self {
        match Self::user_file() {
            Some(path) => self.with_optional_file(path),
            None => self,
        }
    }

    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        use config::{File, FileFormat};
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml).required(true));
        self
    }

    #[must_use]
    pub fn with_optional_file(mut self, path: impl AsRef<Path>) -> Self {
        use config::{File, FileFormat};
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml).required(false));
        self
    }

    #[must_use]
    pub fn with_toml_str(mut self, content: &str) -> Self {
        use config::{File, FileFormat};
        self.builder = self
            .builder
            .add_source(File::from_str(content, FileFormat::Toml));
        self
    }

    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self
    }

    /// Merge all sources into [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required file is missing, a file is not
    /// valid TOML, a value has the wrong type or fails validation.
    pub fn load(self) -> Result<Settings, ConfigError> {
        let builder = match &self.env_prefix {
            Some(prefix) => self.builder.add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            ),
            None => self.builder,
        };
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()
    }
}
