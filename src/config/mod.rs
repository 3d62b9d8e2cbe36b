use crate::models::{ImagingConfig, TargetList};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fs;

/// Prefix of environment variables that override `imaging.yaml`,
/// e.g. `CLEANCTL__ENGINE__TIMEOUT_SECS=600`.
pub const ENV_PREFIX: &str = "CLEANCTL";

/// Configuration manager for the YAML files of a run.
///
/// Manages two configuration files:
/// - Imaging config (`imaging.yaml`): engine, heuristics and logging settings
/// - Targets (`targets.yaml`): the imaging targets, in file order
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    imaging_config_path: Utf8PathBuf,
    targets_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            imaging_config_path: config_dir.join("imaging.yaml"),
            targets_path: config_dir.join("targets.yaml"),
            config_dir,
        })
    }

    /// Load the imaging configuration.
    ///
    /// Layers `imaging.yaml` (optional) under `CLEANCTL__*` environment
    /// variables. Missing keys fall back to their defaults.
    pub fn load_imaging_config(&self) -> Result<ImagingConfig> {
        if !self.imaging_config_path.exists() {
            tracing::warn!(
                "Imaging config file not found at {}, using defaults",
                self.imaging_config_path
            );
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::new(self.imaging_config_path.as_str(), config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| {
                format!("Failed to read imaging config: {}", self.imaging_config_path)
            })?;

        let config: ImagingConfig = settings.try_deserialize().with_context(|| {
            format!("Failed to parse imaging config: {}", self.imaging_config_path)
        })?;

        tracing::info!(
            "Loaded imaging config (mode {}) from {}",
            config.imaging_mode,
            self.imaging_config_path
        );
        Ok(config)
    }

    /// Save the imaging configuration file.
    pub fn save_imaging_config(&self, config: &ImagingConfig) -> Result<()> {
        save_yaml(&self.imaging_config_path, config)?;
        tracing::info!("Saved imaging config to {}", self.imaging_config_path);
        Ok(())
    }

    /// Load the imaging targets. A missing file is an error: there is nothing to image.
    pub fn load_targets(&self) -> Result<TargetList> {
        let file_contents = fs::read_to_string(&self.targets_path)
            .with_context(|| format!("Failed to read targets: {}", self.targets_path))?;

        let targets: TargetList = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse targets: {}", self.targets_path))?;

        tracing::info!(
            "Loaded {} targets from {}",
            targets.targets.len(),
            self.targets_path
        );
        Ok(targets)
    }

    pub fn save_targets(&self, targets: &TargetList) -> Result<()> {
        save_yaml(&self.targets_path, targets)?;
        tracing::info!("Saved targets to {}", self.targets_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

/// Serialize `value` as YAML into `path`, replacing any existing file.
pub fn save_yaml<T: Serialize>(path: &Utf8Path, value: &T) -> Result<()> {
    let yaml_string = serde_yaml_ng::to_string(value)
        .with_context(|| format!("Failed to serialize {} to YAML", path))?;

    fs::write(path, yaml_string).with_context(|| format!("Failed to write {}", path))?;
    Ok(())
}
