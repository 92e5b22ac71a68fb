//! Configuration for instance synchronization.
//!
//! Everything has a working default. Settings can be adjusted with the
//! builder methods or loaded from an INI file:
//!
//! ```ini
//! [remote]
//! versions_url = https://s3.amazonaws.com/Minecraft.Download/versions
//!
//! [paths]
//! data_dir = /srv/instsync
//!
//! [transfers]
//! timeout_secs = 300
//! max_concurrent = 4
//! probe_sizes = true
//! user_agent = instsync/0.1.0
//!
//! [logging]
//! level = info
//! directory = /var/log/instsync
//! file_name = instsync.log
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, Properties};

use crate::error::{SyncError, SyncResult};

/// Remote base for version manifests and game binaries.
pub const DEFAULT_VERSIONS_URL: &str = "https://s3.amazonaws.com/Minecraft.Download/versions";

/// Default HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default number of simultaneous transfers within a batch.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Default user agent for HTTP requests.
pub const DEFAULT_USER_AGENT: &str = concat!("instsync/", env!("CARGO_PKG_VERSION"));

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "instsync.log";

/// Settings for the transfer layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Maximum simultaneous transfers within one batch (at least 1).
    pub max_concurrent: usize,
    /// Ask for file sizes before a batch starts.
    pub probe_sizes: bool,
    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            probe_sizes: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl TransferConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the concurrency limit. Values below 1 become 1.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_probe_sizes(mut self, probe: bool) -> Self {
        self.probe_sizes = probe;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Settings for log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `instsync=debug`.
    pub level: String,
    /// Directory for the log file. Logs go to stderr only when unset.
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_name: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }
}

/// Configuration for the update pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Remote base URL; manifests live at `<base>/<id>/<id>.json`.
    pub versions_url: String,

    /// Root for the shared `versions/` and `libraries/` directories.
    pub data_dir: PathBuf,

    pub transfers: TransferConfig,

    pub logging: LoggingConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            versions_url: DEFAULT_VERSIONS_URL.to_string(),
            data_dir: default_data_dir(),
            transfers: TransferConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl UpdateConfig {
    /// Defaults with the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_versions_url(mut self, url: impl Into<String>) -> Self {
        self.versions_url = url.into();
        self
    }

    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    pub fn with_transfers(mut self, transfers: TransferConfig) -> Self {
        self.transfers = transfers;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Default config file location (`<config dir>/instsync/config.ini`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("instsync").join("config.ini"))
    }

    /// Load settings from an INI file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| {
            SyncError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_ini(&ini)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> SyncResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse settings from INI text.
    pub fn parse(text: &str) -> SyncResult<Self> {
        let ini = Ini::load_from_str(text)
            .map_err(|e| SyncError::InvalidConfig(format!("malformed config: {}", e)))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(remote) = ini.section(Some("remote")) {
            if let Some(url) = remote.get("versions_url") {
                config.versions_url = url.trim().to_string();
            }
        }

        if let Some(paths) = ini.section(Some("paths")) {
            if let Some(dir) = paths.get("data_dir") {
                config.data_dir = PathBuf::from(dir.trim());
            }
        }

        if let Some(transfers) = ini.section(Some("transfers")) {
            if let Some(secs) = parse_key::<u64>(transfers, "transfers", "timeout_secs")? {
                config.transfers.timeout = Duration::from_secs(secs);
            }
            if let Some(max) = parse_key::<usize>(transfers, "transfers", "max_concurrent")? {
                config.transfers.max_concurrent = max.max(1);
            }
            if let Some(value) = transfers.get("probe_sizes") {
                config.transfers.probe_sizes = parse_bool("transfers", "probe_sizes", value)?;
            }
            if let Some(agent) = transfers.get("user_agent") {
                config.transfers.user_agent = agent.trim().to_string();
            }
        }

        if let Some(logging) = ini.section(Some("logging")) {
            if let Some(level) = logging.get("level") {
                config.logging.level = level.trim().to_string();
            }
            if let Some(dir) = logging.get("directory") {
                config.logging.directory = Some(PathBuf::from(dir.trim()));
            }
            if let Some(name) = logging.get("file_name") {
                config.logging.file_name = name.trim().to_string();
            }
        }

        if config.versions_url.is_empty() {
            return Err(SyncError::InvalidConfig(
                "remote.versions_url must not be empty".to_string(),
            ));
        }
        Ok(config)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("instsync"))
        .unwrap_or_else(|| PathBuf::from(".instsync"))
}

fn parse_key<T: std::str::FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> SyncResult<Option<T>> {
    match section.get(key) {
        None => Ok(None),
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            SyncError::InvalidConfig(format!(
                "{}.{}: expected a number, got '{}'",
                section_name, key, value
            ))
        }),
    }
}

fn parse_bool(section_name: &str, key: &str, value: &str) -> SyncResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(SyncError::InvalidConfig(format!(
            "{}.{}: expected true or false, got '{}'",
            section_name, key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = UpdateConfig::default();
        assert_eq!(config.versions_url, DEFAULT_VERSIONS_URL);
        assert_eq!(config.transfers.timeout, Duration::from_secs(300));
        assert_eq!(config.transfers.max_concurrent, 4);
        assert!(config.transfers.probe_sizes);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file_name, "instsync.log");
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = UpdateConfig::new("/srv/data")
            .with_versions_url("http://mirror.example.com/versions")
            .with_transfers(
                TransferConfig::default()
                    .with_timeout(Duration::from_secs(60))
                    .with_max_concurrent(0)
                    .with_probe_sizes(false),
            )
            .with_logging(LoggingConfig::default().with_level("debug"));

        assert_eq!(config.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(config.versions_url, "http://mirror.example.com/versions");
        assert_eq!(config.transfers.max_concurrent, 1);
        assert!(!config.transfers.probe_sizes);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_parse_ini() {
        let config = UpdateConfig::parse(
            "[remote]\n\
             versions_url = http://localhost:8080/versions\n\
             [paths]\n\
             data_dir = /tmp/instsync\n\
             [transfers]\n\
             timeout_secs = 30\n\
             max_concurrent = 8\n\
             probe_sizes = no\n\
             [logging]\n\
             level = instsync=trace\n\
             directory = /tmp/logs\n",
        )
        .unwrap();

        assert_eq!(config.versions_url, "http://localhost:8080/versions");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/instsync"));
        assert_eq!(config.transfers.timeout, Duration::from_secs(30));
        assert_eq!(config.transfers.max_concurrent, 8);
        assert!(!config.transfers.probe_sizes);
        assert_eq!(config.logging.level, "instsync=trace");
        assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(config.logging.file_name, DEFAULT_LOG_FILE);
    }

    #[test]
    fn test_missing_keys_keep_defaults() {
        let config = UpdateConfig::parse("[transfers]\nmax_concurrent = 2\n").unwrap();
        assert_eq!(config.versions_url, DEFAULT_VERSIONS_URL);
        assert_eq!(config.transfers.max_concurrent, 2);
        assert!(config.transfers.probe_sizes);
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert!(matches!(
            UpdateConfig::parse("[transfers]\ntimeout_secs = soon\n"),
            Err(SyncError::InvalidConfig(_))
        ));
        assert!(matches!(
            UpdateConfig::parse("[transfers]\nprobe_sizes = maybe\n"),
            Err(SyncError::InvalidConfig(_))
        ));
        assert!(matches!(
            UpdateConfig::parse("[remote]\nversions_url =\n"),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_and_load_or_default() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");

        let config = UpdateConfig::load_or_default(&path).unwrap();
        assert_eq!(config.versions_url, DEFAULT_VERSIONS_URL);
        assert!(UpdateConfig::load(&path).is_err());

        std::fs::write(&path, "[paths]\ndata_dir = /opt/games\n").unwrap();
        let config = UpdateConfig::load_or_default(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/opt/games"));
    }

    #[test]
    fn test_default_path_ends_with_config_ini() {
        if let Some(path) = UpdateConfig::default_path() {
            assert!(path.ends_with("instsync/config.ini"));
        }
    }
}
