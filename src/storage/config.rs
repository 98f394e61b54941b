//! TOML Configuration Loading
//!
//! Reads `config.toml` and validates it. A missing default file is not an
//! error: the built-in defaults apply.

use std::path::{Path, PathBuf};

use crate::models::config::PipelineConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::config_path;

/// Loads pipeline configuration
#[derive(Debug)]
pub struct ConfigService {
    config_path: Option<PathBuf>,
    config: PipelineConfig,
}

impl ConfigService {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(AppError::config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Ok(Self {
                    config: Self::load_from_file(path)?,
                    config_path: Some(path.to_path_buf()),
                })
            }
            None => {
                let default_path = config_path()?;
                if default_path.is_file() {
                    Ok(Self {
                        config: Self::load_from_file(&default_path)?,
                        config_path: Some(default_path),
                    })
                } else {
                    tracing::debug!(
                        "no config at {}, using defaults",
                        default_path.display()
                    );
                    Ok(Self::from_config(PipelineConfig::default())?)
                }
            }
        }
    }

    /// Wrap an in-memory configuration after validating it
    pub fn from_config(config: PipelineConfig) -> AppResult<Self> {
        config.validate().map_err(AppError::validation)?;
        Ok(Self {
            config_path: None,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<PipelineConfig> {
        let config = PipelineConfig::load(path)?;
        tracing::info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Where the configuration came from, if a file was read
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> PipelineConfig {
        self.config
    }
}
