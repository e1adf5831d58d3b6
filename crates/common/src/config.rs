use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tor process constants
pub mod tor {
    /// Default SOCKS proxy port
    pub const DEFAULT_SOCKS_PORT: u16 = 9050;

    /// Default control port
    pub const DEFAULT_CONTROL_PORT: u16 = 9051;

    /// Default hidden-service port (virtual port == local port)
    pub const DEFAULT_HIDDEN_SERVICE_PORT: u16 = 9001;

    /// Name of the staged executable inside the app directory
    pub const STAGED_BINARY_NAME: &str = "tor_binary";

    /// Tor data directory inside the app directory
    pub const DATA_DIR_NAME: &str = "tor_data";

    /// Hidden-service directory inside the data directory
    pub const HIDDEN_SERVICE_DIR_NAME: &str = "hidden_service";

    /// File Tor writes the onion address to
    pub const HOSTNAME_FILE: &str = "hostname";

    /// Delay between the bootstrap-complete line and starting the server,
    /// leaving time for the descriptor to publish
    pub const SETTLE_DELAY_MS: u64 = 3000;

    /// How long to wait for a hostname after bootstrap before warning
    pub const HOSTNAME_WAIT_SECS: u64 = 180;

    /// Hostname poll interval while waiting
    pub const HOSTNAME_POLL_MS: u64 = 2000;

    /// Log buffer capacity
    pub const MAX_LOG_ENTRIES: usize = 1000;
}

/// Hidden-service protocol constants
pub mod protocol {
    /// Service name reported by `GET /`
    pub const SERVICE_NAME: &str = "Dark Messenger Hidden Service";

    /// Protocol version reported by `GET /`
    pub const VERSION: &str = "1.0.0";

    /// Largest request body accepted on POST routes
    pub const MAX_BODY_BYTES: usize = 64 * 1024;
}

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Private writable directory for the staged binary, Tor data and settings
    pub app_dir: PathBuf,

    /// Bundled binaries, laid out as `tor/<abi>/tor`
    pub assets_dir: PathBuf,

    /// Reported instruction-set ABI; the build architecture when unset
    pub abi: Option<String>,

    /// SOCKS proxy port
    pub socks_port: u16,

    /// Control port
    pub control_port: u16,

    /// Hidden-service port
    pub hidden_service_port: u16,

    /// Settle delay before the protocol server is started
    pub settle_delay_ms: u64,

    /// Address-discovery warning window
    pub hostname_wait_secs: u64,

    /// Hostname poll interval
    pub hostname_poll_ms: u64,

    /// Log buffer capacity
    pub max_log_entries: usize,

    /// Settings JSON file; `<app_dir>/settings.json` when unset
    pub settings_file: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("./darkmsg"),
            assets_dir: PathBuf::from("./assets"),
            abi: None,
            socks_port: tor::DEFAULT_SOCKS_PORT,
            control_port: tor::DEFAULT_CONTROL_PORT,
            hidden_service_port: tor::DEFAULT_HIDDEN_SERVICE_PORT,
            settle_delay_ms: tor::SETTLE_DELAY_MS,
            hostname_wait_secs: tor::HOSTNAME_WAIT_SECS,
            hostname_poll_ms: tor::HOSTNAME_POLL_MS,
            max_log_entries: tor::MAX_LOG_ENTRIES,
            settings_file: None,
        }
    }
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.app_dir = dir.into();
        self
    }

    pub fn with_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = dir.into();
        self
    }

    pub fn with_abi(mut self, abi: impl Into<String>) -> Self {
        self.abi = Some(abi.into());
        self
    }

    pub fn with_hidden_service_port(mut self, port: u16) -> Self {
        self.hidden_service_port = port;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_hostname_wait(mut self, wait: Duration, poll: Duration) -> Self {
        self.hostname_wait_secs = wait.as_secs();
        self.hostname_poll_ms = poll.as_millis() as u64;
        self
    }

    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn hostname_wait(&self) -> Duration {
        Duration::from_secs(self.hostname_wait_secs)
    }

    pub fn hostname_poll(&self) -> Duration {
        Duration::from_millis(self.hostname_poll_ms)
    }

    pub fn staged_binary_path(&self) -> PathBuf {
        self.app_dir.join(tor::STAGED_BINARY_NAME)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.app_dir.join(tor::DATA_DIR_NAME)
    }

    pub fn hidden_service_dir(&self) -> PathBuf {
        self.data_dir().join(tor::HIDDEN_SERVICE_DIR_NAME)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.settings_file
            .clone()
            .unwrap_or_else(|| self.app_dir.join("settings.json"))
    }

    /// Check ports and limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ports = [
            ("socks_port", self.socks_port),
            ("control_port", self.control_port),
            ("hidden_service_port", self.hidden_service_port),
        ];

        for (name, port) in ports {
            if port == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }

        for (i, (a_name, a)) in ports.iter().enumerate() {
            for (b_name, b) in &ports[i + 1..] {
                if a == b {
                    return Err(ConfigError::Invalid(format!(
                        "{} and {} both use port {}",
                        a_name, b_name, a
                    )));
                }
            }
        }

        if self.max_log_entries == 0 {
            return Err(ConfigError::Invalid("max_log_entries must be positive".into()));
        }

        if self.hostname_poll_ms == 0 {
            return Err(ConfigError::Invalid("hostname_poll_ms must be positive".into()));
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

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
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.socks_port, tor::DEFAULT_SOCKS_PORT);
        assert_eq!(config.hidden_service_port, 9001);
        assert_eq!(config.max_log_entries, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SupervisorConfig::new()
            .with_app_dir("/tmp/dm")
            .with_abi("arm64-v8a")
            .with_hidden_service_port(9100)
            .with_settle_delay(Duration::from_millis(10));

        assert_eq!(config.hidden_service_dir(), PathBuf::from("/tmp/dm/tor_data/hidden_service"));
        assert_eq!(config.staged_binary_path(), PathBuf::from("/tmp/dm/tor_binary"));
        assert_eq!(config.settings_path(), PathBuf::from("/tmp/dm/settings.json"));
        assert_eq!(config.settle_delay(), Duration::from_millis(10));
        assert_eq!(config.abi.as_deref(), Some("arm64-v8a"));
    }

    #[test]
    fn test_validate_rejects_port_clash() {
        let mut config = SupervisorConfig::default();
        config.control_port = config.socks_port;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = SupervisorConfig::default().with_hidden_service_port(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_with_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("darkmsg.toml");
        std::fs::write(&path, "hidden_service_port = 9100\nsettle_delay_ms = 5\n").unwrap();

        let config = SupervisorConfig::from_file(&path).unwrap();
        assert_eq!(config.hidden_service_port, 9100);
        assert_eq!(config.settle_delay_ms, 5);
        assert_eq!(config.socks_port, tor::DEFAULT_SOCKS_PORT);

        config.to_file(&path).unwrap();
        assert_eq!(SupervisorConfig::from_file(&path).unwrap(), config);
    }
}
