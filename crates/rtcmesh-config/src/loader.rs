use parking_lot::RwLock;
use rtcmesh_core::MeshError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::RtcMeshConfig;

/// Loads the rtcmesh configuration and keeps a shared copy for reloads.
pub struct ConfigLoader {
    config: Arc<RwLock<RtcMeshConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > RTCMESH_CONFIG env > ~/.rtcmesh/rtcmesh.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("RTCMESH_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rtcmesh")
            .join("rtcmesh.toml")
    }

    /// Load the config from disk, falling back to defaults, and validate it.
    pub fn load(path: Option<&Path>) -> rtcmesh_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = Self::read(&config_path)?;

        for w in config.validate().map_err(MeshError::config)? {
            warn!("{w}");
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Parse the file at `path` (defaults if missing) and apply env overrides.
    /// Does not validate.
    pub fn read(config_path: &Path) -> rtcmesh_core::Result<RtcMeshConfig> {
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(config_path)?;
            Self::parse(&raw, config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            RtcMeshConfig::default()
        };
        Ok(Self::apply_env_overrides(config))
    }

    fn parse(raw: &str, config_path: &Path) -> rtcmesh_core::Result<RtcMeshConfig> {
        toml::from_str::<RtcMeshConfig>(raw).map_err(|e| {
            MeshError::config(format!("failed to parse {}: {}", config_path.display(), e))
        })
    }

    /// Snapshot of the active configuration.
    pub fn get(&self) -> RtcMeshConfig {
        self.config.read().clone()
    }

    /// Handle that observes later reloads.
    pub fn shared(&self) -> Arc<RwLock<RtcMeshConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn apply_env_overrides(config: RtcMeshConfig) -> RtcMeshConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply RTCMESH_* overrides read through `lookup`. Unparseable numeric or
    /// boolean values are ignored with a warning.
    pub fn apply_overrides(
        mut config: RtcMeshConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> RtcMeshConfig {
        if let Some(v) = lookup("RTCMESH_PEER_NAME") {
            config.mesh.peer_name = Some(v);
        }
        if let Some(v) = lookup("RTCMESH_SIGNAL_SERVER") {
            config.mesh.signal_server = v;
        }
        if let Some(v) = lookup("RTCMESH_FALLBACK_DELAY_MS") {
            match v.parse::<u64>() {
                Ok(ms) => config.mesh.fallback_delay_ms = ms,
                Err(_) => warn!(value = %v, "ignoring invalid RTCMESH_FALLBACK_DELAY_MS"),
            }
        }
        if let Some(v) = lookup("RTCMESH_TRICKLE_ICE") {
            match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.mesh.trickle_ice = true,
                "0" | "false" | "no" | "off" => config.mesh.trickle_ice = false,
                _ => warn!(value = %v, "ignoring invalid RTCMESH_TRICKLE_ICE"),
            }
        }
        if let Some(v) = lookup("RTCMESH_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }

    /// Re-read the file. The active config is replaced only if the new one validates.
    pub fn reload(&self) -> rtcmesh_core::Result<()> {
        if !self.config_path.exists() {
            return Err(MeshError::config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        new_config.validate().map_err(MeshError::config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
