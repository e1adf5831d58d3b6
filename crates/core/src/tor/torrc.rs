/// torrc generation
///
/// A fresh configuration is written on every start. Every path in it is
/// absolute.

use super::absolute;
use darkmsg_common::{DarkMsgError, Result, SupervisorConfig};
use std::path::PathBuf;

pub const TORRC_FILE: &str = "torrc";
pub const NOTICE_LOG_FILE: &str = "tor_notice.log";
pub const WARN_LOG_FILE: &str = "tor_warn.log";
pub const ERR_LOG_FILE: &str = "tor_err.log";

/// Inputs for a torrc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrcParams {
    pub socks_port: u16,
    pub control_port: u16,
    pub hidden_service_port: u16,
    pub data_dir: PathBuf,
    pub hidden_service_dir: PathBuf,
}

impl TorrcParams {
    /// Derive parameters from config, resolving relative paths against the
    /// current directory
    pub fn from_config(config: &SupervisorConfig) -> Result<Self> {
        let data_dir = absolute(&config.data_dir())?;
        let hidden_service_dir = absolute(&config.hidden_service_dir())?;
        Ok(Self {
            socks_port: config.socks_port,
            control_port: config.control_port,
            hidden_service_port: config.hidden_service_port,
            data_dir,
            hidden_service_dir,
        })
    }

    pub fn torrc_path(&self) -> PathBuf {
        self.data_dir.join(TORRC_FILE)
    }

    pub fn log_files(&self) -> [PathBuf; 3] {
        [
            self.data_dir.join(NOTICE_LOG_FILE),
            self.data_dir.join(WARN_LOG_FILE),
            self.data_dir.join(ERR_LOG_FILE),
        ]
    }
}

/// Render the torrc contents
pub fn render(params: &TorrcParams) -> String {
    let [notice, warn, err] = params.log_files();
    let port = params.hidden_service_port;

    let lines = [
        format!("SocksPort {}", params.socks_port),
        format!("ControlPort {}", params.control_port),
        format!("DataDirectory {}", params.data_dir.display()),
        "Log notice stdout".to_string(),
        "AvoidDiskWrites 1".to_string(),
        String::new(),
        "# Hidden service".to_string(),
        format!("HiddenServiceDir {}", params.hidden_service_dir.display()),
        format!("HiddenServicePort {} 127.0.0.1:{}", port, port),
        String::new(),
        "# File logs for offline diagnosis".to_string(),
        format!("Log notice file {}", notice.display()),
        format!("Log warn file {}", warn.display()),
        format!("Log err file {}", err.display()),
        String::new(),
        "SafeLogging 1".to_string(),
        "SafeSocks 1".to_string(),
        String::new(),
        "# Tuning".to_string(),
        "NumEntryGuards 1".to_string(),
        "UseEntryGuards 1".to_string(),
        "NewCircuitPeriod 15".to_string(),
        "MaxMemInQueues 16 MB".to_string(),
        String::new(),
        "HiddenServiceNonAnonymousMode 0".to_string(),
        "HiddenServiceSingleHopMode 0".to_string(),
        "HiddenServiceMaxStreams 0".to_string(),
    ];

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Write the torrc and create the (empty) file logs it references.
/// Returns the torrc path.
pub async fn write(params: &TorrcParams) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&params.data_dir).await.map_err(|e| {
        DarkMsgError::config(format!(
            "failed to create data directory {}: {}",
            params.data_dir.display(),
            e
        ))
    })?;

    let path = params.torrc_path();
    tokio::fs::write(&path, render(params))
        .await
        .map_err(|e| DarkMsgError::config(format!("failed to write {}: {}", path.display(), e)))?;

    for log in params.log_files() {
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log)
            .await
            .map_err(|e| {
                DarkMsgError::config(format!("failed to create {}: {}", log.display(), e))
            })?;
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn params(root: &Path) -> TorrcParams {
        TorrcParams {
            socks_port: 9050,
            control_port: 9051,
            hidden_service_port: 9001,
            data_dir: root.join("tor_data"),
            hidden_service_dir: root.join("tor_data/hidden_service"),
        }
    }

    #[test]
    fn test_render_contains_directives() {
        let torrc = render(&params(Path::new("/data/app")));
        let lines: Vec<&str> = torrc.lines().collect();

        for expected in [
            "SocksPort 9050",
            "ControlPort 9051",
            "DataDirectory /data/app/tor_data",
            "Log notice stdout",
            "AvoidDiskWrites 1",
            "HiddenServiceDir /data/app/tor_data/hidden_service",
            "HiddenServicePort 9001 127.0.0.1:9001",
            "Log notice file /data/app/tor_data/tor_notice.log",
            "Log warn file /data/app/tor_data/tor_warn.log",
            "Log err file /data/app/tor_data/tor_err.log",
            "SafeLogging 1",
            "SafeSocks 1",
            "NumEntryGuards 1",
            "NewCircuitPeriod 15",
            "MaxMemInQueues 16 MB",
        ] {
            assert!(lines.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_params_are_absolute() {
        let config = SupervisorConfig::default().with_app_dir("relative/app");
        let params = TorrcParams::from_config(&config).unwrap();
        assert!(params.data_dir.is_absolute());
        assert!(params.hidden_service_dir.is_absolute());
        assert!(params.hidden_service_dir.ends_with("relative/app/tor_data/hidden_service"));
    }

    #[tokio::test]
    async fn test_write_creates_torrc_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let params = params(dir.path());
        let path = write(&params).await.unwrap();

        assert_eq!(path, dir.path().join("tor_data/torrc"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), render(&params));
        for log in params.log_files() {
            assert!(log.is_file());
        }
    }
}
