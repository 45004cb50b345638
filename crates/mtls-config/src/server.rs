use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    join_host_port, load_yaml, require_dial_port, require_host, require_path, ConfigResult,
    LimitsSection,
};

/// Server-side configuration file
///
/// ```yaml
/// server:
///   listen_address: 0.0.0.0
///   listen_port: 8443
/// backend:
///   laddress: 127.0.0.1
///   port: 5432
/// tls:
///   ca_cert: certs/ca.crt
///   server_cert: certs/server.crt
///   server_key: certs/server.key
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfigFile {
    /// TLS listener
    pub server: ServerListenSection,

    /// Plaintext backend that sessions are forwarded to
    pub backend: BackendSection,

    pub tls: ServerTlsSection,

    #[serde(default)]
    pub limits: LimitsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerListenSection {
    pub listen_address: String,
    pub listen_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSection {
    pub laddress: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerTlsSection {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
}

impl ServerConfigFile {
    /// Load and validate a server configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config: Self = load_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        require_host(&self.server.listen_address, "server.listen_address")?;
        require_host(&self.backend.laddress, "backend.laddress")?;
        require_dial_port(self.backend.port, "backend.port")?;
        require_path(&self.tls.ca_cert, "tls.ca_cert")?;
        require_path(&self.tls.server_cert, "tls.server_cert")?;
        require_path(&self.tls.server_key, "tls.server_key")?;
        self.limits.validate()
    }

    /// Address the TLS listener binds to
    pub fn listen_addr(&self) -> String {
        join_host_port(&self.server.listen_address, self.server.listen_port)
    }

    /// Address of the plaintext backend
    pub fn backend_addr(&self) -> String {
        join_host_port(&self.backend.laddress, self.backend.port)
    }
}
