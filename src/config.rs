//! Configuration
//!
//! The OSC transport settings the hub reads on every send, and the TOML
//! application file they are seeded from at startup.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};


pub const DEFAULT_CONNECTED_PATH: &str = "/avatar/parameters/hr_connected";
pub const DEFAULT_PERCENT_PATH: &str = "/avatar/parameters/hr_percent";
pub const DEFAULT_MAX_HEART_RATE: f64 = 200.0;
const DEFAULT_OSC_HOST: &str = "127.0.0.1";
const DEFAULT_OSC_PORT: u16 = 9000;


/// Effective OSC endpoint and addressing.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub connected_path: String,
    pub percent_path: String,
    pub max_heart_rate: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_OSC_HOST.to_string(),
            port: DEFAULT_OSC_PORT,
            connected_path: DEFAULT_CONNECTED_PATH.to_string(),
            percent_path: DEFAULT_PERCENT_PATH.to_string(),
            max_heart_rate: DEFAULT_MAX_HEART_RATE,
        }
    }
}

impl TransportConfig {
    fn same_endpoint(&self, other: &TransportConfig) -> bool {
        self.host == other.host && self.port == other.port
    }
}

/// A partial update. Absent fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigureParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub connected_path: Option<String>,
    pub percent_path: Option<String>,
    pub max_heart_rate: Option<f64>,
}

/// Result of merging a [`ConfigureParams`] into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    pub config: TransportConfig,
    pub endpoint_changed: bool,
}

/// Holds the current [`TransportConfig`]. Only the hub mutates it.
#[derive(Debug, Default)]
pub struct TransportStore {
    current: TransportConfig,
    configured: bool,
}

impl TransportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &TransportConfig {
        &self.current
    }

    /// Whether OSC output has been configured at least once.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn apply(&mut self, params: ConfigureParams) -> ConfigChange {
        let previous = self.current.clone();
        let mut next = previous.clone();

        if let Some(host) = params.host {
            next.host = host;
        }
        if let Some(port) = params.port {
            next.port = port;
        }
        if let Some(path) = params.connected_path.filter(|p| !p.is_empty()) {
            next.connected_path = path;
        }
        if let Some(path) = params.percent_path.filter(|p| !p.is_empty()) {
            next.percent_path = path;
        }
        match params.max_heart_rate {
            Some(max) if max.is_finite() && max > 0.0 => next.max_heart_rate = max,
            Some(max) => tracing::warn!(
                "Ignoring max heart rate {max}, keeping {}",
                previous.max_heart_rate
            ),
            None => {}
        }

        let endpoint_changed = !self.configured || !previous.same_endpoint(&next);
        self.current = next;
        self.configured = true;

        ConfigChange {
            config: self.current.clone(),
            endpoint_changed,
        }
    }
}


/// Application settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub osc: OscSettings,
    pub sensor: SensorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscSettings {
    /// Configure OSC output at startup
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub connected_path: String,
    pub percent_path: String,
    pub max_heart_rate: f64,
}

impl Default for OscSettings {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            enabled: false,
            host: transport.host,
            port: transport.port,
            connected_path: transport.connected_path,
            percent_path: transport.percent_path,
            max_heart_rate: transport.max_heart_rate,
        }
    }
}

impl OscSettings {
    pub fn to_params(&self) -> ConfigureParams {
        ConfigureParams {
            host: Some(self.host.clone()),
            port: Some(self.port),
            connected_path: Some(self.connected_path.clone()),
            percent_path: Some(self.percent_path.clone()),
            max_heart_rate: Some(self.max_heart_rate),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Only peripherals whose name contains this are auto-connected
    pub device_name: Option<String>,
    pub auto_connect: bool,
    pub scan_interval_secs: u64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            device_name: None,
            auto_connect: false,
            scan_interval_secs: 1,
        }
    }
}

/// Default location of the settings file
pub fn default_config_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "hr-relay", "hr-relay")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Loads `path` if it exists, falling back to defaults otherwise.
pub fn load_or_default(path: &Path) -> AppConfig {
    if !path.exists() {
        tracing::info!("No config at {:?}, using defaults", path);
        return AppConfig::default();
    }
    match load_config(path) {
        Ok(config) => {
            tracing::info!("Loaded configuration from {:?}", path);
            config
        }
        Err(e) => {
            tracing::warn!("Failed to load {:?}: {e:#}, using defaults", path);
            AppConfig::default()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_store_starts_unconfigured_with_defaults() {
        let store = TransportStore::new();
        assert!(!store.is_configured());
        assert_eq!(store.current().connected_path, DEFAULT_CONNECTED_PATH);
        assert_eq!(store.current().percent_path, DEFAULT_PERCENT_PATH);
        assert_eq!(store.current().max_heart_rate, DEFAULT_MAX_HEART_RATE);
    }

    #[test]
    fn test_first_apply_always_changes_endpoint() {
        let mut store = TransportStore::new();
        let change = store.apply(ConfigureParams::default());
        assert!(change.endpoint_changed);
        assert!(store.is_configured());
        assert_eq!(change.config, TransportConfig::default());
    }

    #[test]
    fn test_merge_keeps_unspecified_fields() {
        let mut store = TransportStore::new();
        store.apply(ConfigureParams {
            host: Some("10.0.0.5".to_string()),
            port: Some(9001),
            ..Default::default()
        });
        let change = store.apply(ConfigureParams {
            port: Some(9002),
            ..Default::default()
        });

        assert!(change.endpoint_changed);
        assert_eq!(change.config.host, "10.0.0.5");
        assert_eq!(change.config.port, 9002);
    }

    #[test]
    fn test_path_only_update_keeps_endpoint() {
        let mut store = TransportStore::new();
        store.apply(ConfigureParams::default());
        let change = store.apply(ConfigureParams {
            percent_path: Some("/avatar/parameters/other".to_string()),
            ..Default::default()
        });

        assert!(!change.endpoint_changed);
        assert_eq!(change.config.percent_path, "/avatar/parameters/other");
    }

    #[test]
    fn test_empty_paths_count_as_absent() {
        let mut store = TransportStore::new();
        let change = store.apply(ConfigureParams {
            connected_path: Some(String::new()),
            percent_path: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(change.config.connected_path, DEFAULT_CONNECTED_PATH);
        assert_eq!(change.config.percent_path, DEFAULT_PERCENT_PATH);
    }

    #[test]
    fn test_invalid_max_heart_rate_is_ignored() {
        let mut store = TransportStore::new();
        store.apply(ConfigureParams {
            max_heart_rate: Some(180.0),
            ..Default::default()
        });
        for bad in [0.0, -50.0, f64::NAN, f64::INFINITY] {
            let change = store.apply(ConfigureParams {
                max_heart_rate: Some(bad),
                ..Default::default()
            });
            assert_eq!(change.config.max_heart_rate, 180.0);
        }
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[osc]\nenabled = true\nport = 9100").unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert!(config.osc.enabled);
        assert_eq!(config.osc.port, 9100);
        assert_eq!(config.osc.host, "127.0.0.1");
        assert_eq!(config.sensor.scan_interval_secs, 1);
        assert!(config.sensor.device_name.is_none());
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.osc.max_heart_rate = 190.0;
        config.sensor.device_name = Some("Polar H10".to_string());
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.osc.max_heart_rate, 190.0);
        assert_eq!(loaded.sensor.device_name.as_deref(), Some("Polar H10"));
    }

    #[test]
    fn test_load_or_default_tolerates_bad_files() {
        let missing = load_or_default(Path::new("/nonexistent/path/config.toml"));
        assert!(!missing.osc.enabled);

        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();
        let invalid = load_or_default(temp_file.path());
        assert_eq!(invalid.osc.port, 9000);
    }

    #[test]
    fn test_settings_to_params_covers_every_field() {
        let params = OscSettings::default().to_params();
        let mut store = TransportStore::new();
        let change = store.apply(params);
        assert_eq!(change.config, TransportConfig::default());
    }
}
