use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Proxy engine constants
pub mod engine {
    /// Where the engine reads its configuration document
    pub const DEFAULT_CONFIG_PATH: &str = "/etc/xray/config.json";

    /// Inbound listener port advertised in links
    pub const DEFAULT_LISTEN_PORT: u16 = 443;

    /// Container restarted by the fallback path
    pub const DEFAULT_CONTAINER: &str = "xray";

    /// Upper bound for any single reload or restart attempt
    pub const COMMAND_TIMEOUT_SECS: u64 = 10;

    /// Flow tag attached to every client entry
    pub const CLIENT_FLOW: &str = "xtls-rprx-vision";
}

/// Disguised-TLS transport constants
pub mod reality {
    /// Decoy endpoint the transport impersonates
    pub const DEFAULT_DEST: &str = "www.microsoft.com:443";

    pub const DEFAULT_SERVER_NAMES: [&str; 3] =
        ["www.microsoft.com", "www.cloudflare.com", "www.github.com"];

    /// Hours between credential rotations
    pub const ROTATION_HOURS: u64 = 24;

    /// Characters per short identifier
    pub const SHORT_ID_LEN: usize = 8;

    pub const MIN_SHORT_IDS: usize = 2;

    pub const MAX_SHORT_IDS: usize = 4;

    /// Client TLS fingerprint advertised in links
    pub const FINGERPRINT: &str = "chrome";

    /// Host written into links when no server address is known
    pub const PLACEHOLDER_ADDRESS: &str = "your-server-ip";

    pub const DEFAULT_LINK_LABEL_PREFIX: &str = "xpanel-";
}

/// Engine log retention constants
pub mod logs {
    pub const DEFAULT_ENGINE_LOG_DIR: &str = "/var/log/xray";

    pub const RETENTION_HOURS: u64 = 24;
}

/// Background job cadence
pub mod scheduler {
    /// How often the rotator checks whether rotation is due
    pub const ROTATION_CHECK_SECS: u64 = 15 * 60;

    /// How often old engine logs are swept
    pub const LOG_SWEEP_SECS: u64 = 60 * 60;
}

/// Panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Directory for the user roster and credential records
    pub data_dir: PathBuf,

    pub engine: EngineConfig,

    pub reality: RealityConfig,

    pub routing: RoutingToggles,

    pub api: ApiConfig,

    pub logging: LoggingConfig,

    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path the synthesized document is written to
    pub config_path: PathBuf,

    /// Optional document template; the built-in default is used when absent
    pub template_path: Option<PathBuf>,

    pub listen_port: u16,

    /// Command performing a live reload; none means unsupported
    pub reload_command: Option<Vec<String>>,

    /// Command performing a full restart
    pub restart_command: Vec<String>,

    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealityConfig {
    /// Masquerade destination (host:port)
    pub dest: String,

    /// Masquerade server names copied into each new credential set
    pub server_names: Vec<String>,

    pub rotation_hours: u64,

    /// Public address of this server for subscription links
    pub server_address: Option<String>,

    pub link_label_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingToggles {
    /// Route the local region's IPs and domains straight out
    pub region_direct: bool,

    /// Drop known ad domains
    pub ad_block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,

    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Panel log level (trace/debug/info/warn/error)
    pub level: Option<String>,

    /// Directory holding the engine's access and error logs
    pub engine_log_dir: PathBuf,

    pub retention_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub rotation_check_secs: u64,

    pub log_sweep_secs: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            engine: EngineConfig::default(),
            reality: RealityConfig::default(),
            routing: RoutingToggles::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(engine::DEFAULT_CONFIG_PATH),
            template_path: None,
            listen_port: engine::DEFAULT_LISTEN_PORT,
            reload_command: None,
            restart_command: vec![
                "docker".to_string(),
                "restart".to_string(),
                engine::DEFAULT_CONTAINER.to_string(),
            ],
            command_timeout_secs: engine::COMMAND_TIMEOUT_SECS,
        }
    }
}

impl Default for RealityConfig {
    fn default() -> Self {
        Self {
            dest: reality::DEFAULT_DEST.to_string(),
            server_names: reality::DEFAULT_SERVER_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rotation_hours: reality::ROTATION_HOURS,
            server_address: None,
            link_label_prefix: reality::DEFAULT_LINK_LABEL_PREFIX.to_string(),
        }
    }
}

impl Default for RoutingToggles {
    fn default() -> Self {
        Self {
            region_direct: true,
            ad_block: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:8000".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            engine_log_dir: PathBuf::from(logs::DEFAULT_ENGINE_LOG_DIR),
            retention_hours: logs::RETENTION_HOURS,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rotation_check_secs: scheduler::ROTATION_CHECK_SECS,
            log_sweep_secs: scheduler::LOG_SWEEP_SECS,
        }
    }
}

impl PanelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_engine_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine.config_path = path.into();
        self
    }

    pub fn with_server_address(mut self, address: impl Into<String>) -> Self {
        self.reality.server_address = Some(address.into());
        self
    }

    pub fn with_rotation_hours(mut self, hours: u64) -> Self {
        self.reality.rotation_hours = hours;
        self
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.reality.rotation_hours.saturating_mul(3600))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.command_timeout_secs)
    }

    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(self.logging.retention_hours.saturating_mul(3600))
    }

    pub fn rotation_check_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.rotation_check_secs.max(1))
    }

    pub fn log_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.log_sweep_secs.max(1))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path.as_ref(), contents)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reality.rotation_hours == 0 {
            return Err(ConfigError::Validation(
                "reality.rotation_hours must be positive".into(),
            ));
        }
        if !self.reality.dest.contains(':') {
            return Err(ConfigError::Validation(format!(
                "reality.dest must be host:port, got {}",
                self.reality.dest
            )));
        }
        if self.reality.server_names.is_empty() {
            return Err(ConfigError::Validation(
                "reality.server_names is empty".into(),
            ));
        }
        if self.engine.restart_command.is_empty() {
            return Err(ConfigError::Validation(
                "engine.restart_command is empty".into(),
            ));
        }
        if matches!(&self.engine.reload_command, Some(cmd) if cmd.is_empty()) {
            return Err(ConfigError::Validation(
                "engine.reload_command is set but empty".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid config: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PanelConfig::default();
        assert_eq!(config.engine.listen_port, engine::DEFAULT_LISTEN_PORT);
        assert_eq!(config.reality.server_names.len(), 3);
        assert_eq!(config.rotation_interval(), Duration::from_secs(24 * 3600));
        assert!(config.routing.region_direct && config.routing.ad_block);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PanelConfig::new()
            .with_data_dir("/tmp/data")
            .with_engine_config_path("/tmp/engine.json")
            .with_server_address("203.0.113.7")
            .with_rotation_hours(6);

        assert_eq!(config.data_dir, PathBuf::from("/tmp/data"));
        assert_eq!(config.engine.config_path, PathBuf::from("/tmp/engine.json"));
        assert_eq!(config.reality.server_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(config.rotation_interval(), Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpanel.toml");
        std::fs::write(
            &path,
            "[reality]\nrotation_hours = 12\n\n[routing]\nad_block = false\n",
        )
        .unwrap();

        let config = PanelConfig::from_file(&path).unwrap();
        assert_eq!(config.reality.rotation_hours, 12);
        assert_eq!(config.reality.dest, reality::DEFAULT_DEST);
        assert!(config.routing.region_direct);
        assert!(!config.routing.ad_block);
    }

    #[test]
    fn test_legacy_engine_api_address_is_ignored() {
        let written = toml::to_string_pretty(&PanelConfig::default()).unwrap();
        assert!(!written.contains("api_address"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpanel.toml");
        std::fs::write(&path, "[engine]\napi_address = \"127.0.0.1:8080\"\nlisten_port = 8443\n")
            .unwrap();
        let config = PanelConfig::from_file(&path).unwrap();
        assert_eq!(config.engine.listen_port, 8443);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpanel.toml");
        let config = PanelConfig::new().with_server_address("vpn.example.net");
        config.to_file(&path).unwrap();

        let loaded = PanelConfig::from_file(&path).unwrap();
        assert_eq!(loaded.reality.server_address.as_deref(), Some("vpn.example.net"));
        assert_eq!(loaded.engine.restart_command, config.engine.restart_command);
    }

    #[test]
    fn test_validation_rejects_zero_rotation() {
        let config = PanelConfig::new().with_rotation_hours(0);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_dest_without_port() {
        let mut config = PanelConfig::new();
        config.reality.dest = "www.example.com".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
