use config::{Config, Environment, File, FileFormat};
use nschat::kernel::local::LocalKernelConfig;
use nschat::orchestrator::OrchestratorConfig;
use nschat::prompt_template::DEFAULT_SYSTEM_MESSAGE;
use nschat::providers::configs::{OpenRouterProviderConfig, DEFAULT_HOST, DEFAULT_MODEL};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{to_env_var, ConfigError};

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl ProviderSettings {
    pub fn into_config(self) -> Result<OpenRouterProviderConfig, ConfigError> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar {
                env_var: to_env_var("provider.api_key"),
            })?;
        Ok(OpenRouterProviderConfig {
            host: self.host,
            api_key,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct KernelSettings {
    pub python: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl KernelSettings {
    pub fn into_config(self) -> LocalKernelConfig {
        LocalKernelConfig {
            python: self.python,
            working_dir: self.working_dir,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatSettings {
    pub confirm_scripts: bool,
    #[serde(default)]
    pub system_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub kernel: KernelSettings,
    pub chat: ChatSettings,
}

impl Settings {
    /// Defaults, then the TOML file, then `NSCHAT_*` environment variables.
    /// An explicit `config_file` must exist; the default one is optional.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("provider.host", DEFAULT_HOST)?
            .set_default("provider.model", DEFAULT_MODEL)?
            .set_default("kernel.python", "python3")?
            .set_default("chat.confirm_scripts", true)?;

        builder = match config_file {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml)),
            None => match default_config_file() {
                Some(path) => builder.add_source(
                    File::from(path)
                        .format(FileFormat::Toml)
                        .required(false),
                ),
                None => builder,
            },
        };

        let config = builder
            .add_source(
                Environment::with_prefix("NSCHAT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            match &err {
                config::ConfigError::NotFound(field) => ConfigError::MissingEnvVar {
                    env_var: to_env_var(field),
                },
                _ => ConfigError::Other(err),
            }
        })
    }

    /// Orchestrator settings, with `model` overriding the configured one
    pub fn orchestrator_config(&self, model: Option<&str>) -> OrchestratorConfig {
        OrchestratorConfig {
            model_name: model.unwrap_or(&self.provider.model).to_string(),
            // requests fall back to the provider's configured key
            credentials: None,
            system_message: self
                .chat
                .system_message
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string()),
            confirm_scripts: self.chat.confirm_scripts,
        }
    }
}

pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nschat").join("config.toml"))
}
