//! YAML configuration for both ends of the tunnel
//!
//! Each process reads a single document at startup. Any read, parse or
//! validation failure is fatal to the caller; there is no partial start.

mod client;
mod limits;
mod server;

pub use client::{ClientConfigFile, ClientListenSection, ClientTlsSection, RemoteServerSection};
pub use limits::{LimitsSection, MAX_CONNECTIONS_LIMIT};
pub use server::{BackendSection, ServerConfigFile, ServerListenSection, ServerTlsSection};

use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Default location of the client configuration, relative to the working directory
pub const DEFAULT_CLIENT_CONFIG_PATH: &str = "../conf/client_config.yaml";

/// Default location of the server configuration, relative to the working directory
pub const DEFAULT_SERVER_CONFIG_PATH: &str = "../conf/server_config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Read and deserialize a YAML document
fn load_yaml<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    info!("Loading configuration from: {}", path.display());

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Join host and port, bracketing bare IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn require_host(value: &str, field: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} cannot be empty", field)));
    }
    Ok(())
}

fn require_dial_port(port: u16, field: &str) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::Invalid(format!("{} must be non-zero", field)));
    }
    Ok(())
}

fn require_path(path: &Path, field: &str) -> ConfigResult<()> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!("{} path cannot be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("127.0.0.1", 8443), "127.0.0.1:8443");
        assert_eq!(join_host_port("tunnel.example.com", 443), "tunnel.example.com:443");
        assert_eq!(join_host_port("::1", 9000), "[::1]:9000");
        assert_eq!(join_host_port("[::1]", 9000), "[::1]:9000");
    }

    #[test]
    fn test_shipped_sample_configs_load() {
        let conf = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../conf");

        let client = ClientConfigFile::load(conf.join("client_config.yaml")).unwrap();
        assert_eq!(client.server_addr(), "127.0.0.1:8443");

        let server = ServerConfigFile::load(conf.join("server_config.yaml")).unwrap();
        assert_eq!(server.backend_addr(), "127.0.0.1:5432");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let err = load_yaml::<ClientConfigFile>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "server: [unterminated").unwrap();

        let err = load_yaml::<ServerConfigFile>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
