use mtls_config::ClientConfigFile;
use mtls_relay::{
    accept_loop, port_of, run_session, DirectionLabels, SessionContext, SessionIdGenerator,
    SessionReport,
};
use mtls_tls::{server_name, TlsError, TlsIdentity};
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ClientForwarderError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    TlsError(#[from] TlsError),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this address: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: String,
        reason: String,
    },
}

/// Why a session's outbound TLS connection could not be established
#[derive(Debug, Error)]
pub enum DialError {
    #[error("TCP connect to {address} failed: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("TLS handshake with {address} failed: {source}")]
    Handshake {
        address: String,
        source: std::io::Error,
    },

    #[error("Connecting to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct ClientForwarderConfig {
    /// Local plaintext listen address (host:port)
    pub listen_addr: String,
    /// Tunnel server address (host:port)
    pub server_addr: String,
    /// Name the server certificate is verified against
    pub server_name: ServerName<'static>,
    /// Deadline for TCP connect plus TLS handshake
    pub connect_timeout: Option<Duration>,
    /// Cap on concurrent sessions
    pub max_connections: Option<usize>,
}

impl ClientForwarderConfig {
    pub fn from_file(file: &ClientConfigFile) -> Result<Self, ClientForwarderError> {
        Ok(Self {
            listen_addr: file.listen_addr(),
            server_addr: file.server_addr(),
            server_name: server_name(file.server_name())?,
            connect_timeout: file.limits.connect_timeout(),
            max_connections: file.limits.max_connections,
        })
    }
}

pub struct ClientForwarder {
    config: ClientForwarderConfig,
    connector: TlsConnector,
    session_ids: SessionIdGenerator,
    reports: Option<mpsc::UnboundedSender<SessionReport>>,
}

impl ClientForwarder {
    /// Create a forwarder around an already built TLS client configuration
    pub fn new(config: ClientForwarderConfig, tls_config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            config,
            connector: TlsConnector::from(tls_config),
            session_ids: SessionIdGenerator::new(),
            reports: None,
        }
    }

    /// Load TLS material named by the configuration file and create a forwarder
    pub fn from_config_file(file: &ClientConfigFile) -> Result<Self, ClientForwarderError> {
        let config = ClientForwarderConfig::from_file(file)?;
        let identity =
            TlsIdentity::load(&file.tls.client_cert, &file.tls.client_key, &file.tls.ca_cert)?;
        Ok(Self::new(config, identity.client_config()?))
    }

    /// Publish the report of every finished session on `sender`
    pub fn with_session_reports(mut self, sender: mpsc::UnboundedSender<SessionReport>) -> Self {
        self.reports = Some(sender);
        self
    }

    pub fn config(&self) -> &ClientForwarderConfig {
        &self.config
    }

    /// Bind the local listener
    pub async fn bind(&self) -> Result<TcpListener, ClientForwarderError> {
        TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| ClientForwarderError::BindError {
                address: self.config.listen_addr.clone(),
                port: port_of(&self.config.listen_addr),
                reason: e.to_string(),
            })
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self) -> Result<(), ClientForwarderError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept local connections forever, one task per connection
    pub async fn serve(self, listener: TcpListener) -> Result<(), ClientForwarderError> {
        let addr = listener.local_addr()?;
        info!("Client listening on {}", addr);
        info!("Forwarding to server {}", self.config.server_addr);

        let max_connections = self.config.max_connections;
        let forwarder = Arc::new(self);
        accept_loop(&listener, max_connections, move |stream, peer_addr| {
            let forwarder = forwarder.clone();
            async move { forwarder.handle_connection(stream, peer_addr).await }
        })
        .await;

        Ok(())
    }

    async fn handle_connection(&self, local: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.session_ids.generate();
        info!(session_id, "New connection from {}", peer_addr);

        let ctx = SessionContext::new(
            session_id,
            peer_addr,
            self.config.server_addr.clone(),
            DirectionLabels::CLIENT,
        );

        // Dial failures are logged by the session and end it
        if let Ok(report) = run_session(ctx, local, self.dial()).await {
            if let Some(reports) = &self.reports {
                let _ = reports.send(report);
            }
        }
    }

    /// Open the TLS connection to the tunnel server
    async fn dial(&self) -> Result<TlsStream<TcpStream>, DialError> {
        let address = &self.config.server_addr;

        let connect = async {
            let tcp = TcpStream::connect(address)
                .await
                .map_err(|source| DialError::Connect {
                    address: address.clone(),
                    source,
                })?;
            debug!("TCP connected to {}, starting TLS handshake", address);

            self.connector
                .connect(self.config.server_name.clone(), tcp)
                .await
                .map_err(|source| DialError::Handshake {
                    address: address.clone(),
                    source,
                })
        };

        match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| DialError::Timeout {
                    address: address.clone(),
                    timeout,
                })?,
            None => connect.await,
        }
    }
}
