use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    join_host_port, load_yaml, require_dial_port, require_host, require_path, ConfigError,
    ConfigResult, LimitsSection,
};

/// Client-side configuration file
///
/// ```yaml
/// server:
///   address: tunnel.example.com
///   port: 8443
/// client:
///   listen_address: 127.0.0.1
///   listen_port: 5432
/// tls:
///   ca_cert: certs/ca.crt
///   client_cert: certs/client.crt
///   client_key: certs/client.key
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfigFile {
    /// Tunnel server to dial over TLS
    pub server: RemoteServerSection,

    /// Local plaintext listener
    pub client: ClientListenSection,

    pub tls: ClientTlsSection,

    #[serde(default)]
    pub limits: LimitsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteServerSection {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientListenSection {
    pub listen_address: String,
    pub listen_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientTlsSection {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,

    /// Name the server certificate must be valid for (defaults to `server.address`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl ClientConfigFile {
    /// Load and validate a client configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config: Self = load_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        require_host(&self.server.address, "server.address")?;
        require_dial_port(self.server.port, "server.port")?;
        require_host(&self.client.listen_address, "client.listen_address")?;
        require_path(&self.tls.ca_cert, "tls.ca_cert")?;
        require_path(&self.tls.client_cert, "tls.client_cert")?;
        require_path(&self.tls.client_key, "tls.client_key")?;
        if let Some(name) = &self.tls.server_name {
            require_host(name, "tls.server_name")?;
        }
        if self.limits.handshake_timeout_secs.is_some() {
            return Err(ConfigError::Invalid(
                "limits.handshake_timeout_secs only applies to the server; \
                 use limits.connect_timeout_secs to bound the client's TLS handshake"
                    .to_string(),
            ));
        }
        self.limits.validate()
    }

    /// Address the local listener binds to
    pub fn listen_addr(&self) -> String {
        join_host_port(&self.client.listen_address, self.client.listen_port)
    }

    /// Address of the tunnel server
    pub fn server_addr(&self) -> String {
        join_host_port(&self.server.address, self.server.port)
    }

    /// Name used to verify the server certificate
    pub fn server_name(&self) -> &str {
        match &self.tls.server_name {
            Some(name) => name,
            None => self
                .server
                .address
                .trim_start_matches('[')
                .trim_end_matches(']'),
        }
    }
}
