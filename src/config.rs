//! Configuration for the TFTP server, stored as TOML.
//!
//! The server reads one `[server]` table covering the bind address, the
//! directory transfers are served from and written to, and the retry
//! parameters applied to every in-flight packet. A missing file is replaced
//! with defaults on first start.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TftpError;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
}

/// Settings for the serving socket and transfer behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind; the service is meant for the local network.
    pub address: String,
    /// Port to bind. Port 0 lets the OS pick one.
    pub port: u16,
    /// Directory that read requests are served from and write requests are
    /// stored into.
    pub root_directory: String,
    /// Seconds to wait for a reply before retransmitting.
    pub timeout_seconds: u64,
    /// Resend budget per in-flight packet.
    pub max_retries: u32,
    /// Reject requests whose options are all unsupported (ERROR code 8)
    /// instead of falling back to a non-extended transfer.
    pub strict_options: bool,
}

impl ServerConfig {
    /// The retry policy every session of this server runs under.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_seconds),
            max_retries: self.max_retries,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            root_directory: ".".to_string(),
            timeout_seconds: DEFAULT_TIMEOUT.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            strict_options: false,
        }
    }
}

impl Config {
    /// Load the configuration from `path`, writing defaults there first if
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the defaults cannot be written.
    pub fn load_or_create(path: &PathBuf) -> Result<Self, TftpError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save the configuration to `path` in TOML format.
    pub fn save(&self, path: &PathBuf) -> Result<(), TftpError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_the_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.timeout_seconds, 5);
        assert_eq!(config.server.max_retries, 3);
        assert!(!config.server.strict_options);

        let policy = config.server.retry_policy();
        assert_eq!(policy.timeout, Duration::from_secs(5));
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tftpd.toml");

        let mut config = Config::default();
        config.server.port = 6969;
        config.server.strict_options = true;
        config.save(&path).unwrap();

        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(loaded.server.port, 6969);
        assert!(loaded.server.strict_options);
    }

    #[test]
    fn load_or_create_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.toml");
        assert!(!path.exists());

        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "server = \"not a table\"").unwrap();

        assert!(matches!(
            Config::load_or_create(&path),
            Err(TftpError::TomlDeserialization(_))
        ));
    }
}
