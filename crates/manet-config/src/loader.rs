use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use manet_core::{ManetError, Result};

use crate::schema::ManetConfig;

/// Loads the manet configuration and applies overrides.
pub struct ConfigLoader {
    config: Arc<RwLock<ManetConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > MANET_CONFIG env > ./manet.toml > ~/.manet/manet.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("MANET_CONFIG") {
            return PathBuf::from(p);
        }
        let local = PathBuf::from("manet.toml");
        if local.exists() {
            return local;
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".manet")
            .join("manet.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            ManetConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Build a loader around an in-memory config (no file involved).
    pub fn from_config(config: ManetConfig) -> Result<Self> {
        Self::check(&config)?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: PathBuf::new(),
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> ManetConfig {
        self.config.read().clone()
    }

    /// Path the config was resolved from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply in-process overrides (CLI flags) and re-validate.
    ///
    /// The stored config is only replaced if the result validates.
    pub fn update(&self, apply: impl FnOnce(&mut ManetConfig)) -> Result<()> {
        let mut candidate = self.config.read().clone();
        apply(&mut candidate);
        Self::check(&candidate)?;
        *self.config.write() = candidate;
        Ok(())
    }

    fn parse(raw: &str, path: &Path) -> Result<ManetConfig> {
        toml::from_str::<ManetConfig>(raw).map_err(|e| {
            ManetError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Validate: log warnings, fail on errors.
    fn check(config: &ManetConfig) -> Result<()> {
        let warnings = config.validate().map_err(ManetError::Config)?;
        for w in &warnings {
            warn!("{}", w);
        }
        Ok(())
    }

    /// Apply env var overrides (MANET_ADDRESS, MANET_BASE_PORT, etc.)
    fn apply_env_overrides(mut config: ManetConfig) -> ManetConfig {
        if let Ok(v) = std::env::var("MANET_ADDRESS") {
            config.network.address = v;
        }
        if let Ok(v) = std::env::var("MANET_BASE_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                config.network.base_port = port;
            }
        }
        if let Ok(v) = std::env::var("MANET_REGISTRY") {
            config.registry.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MANET_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }
}
