use mtls_config::ServerConfigFile;
use mtls_relay::{
    accept_loop, port_of, run_session, DirectionLabels, PeerIdentity, SessionContext,
    SessionIdGenerator, SessionReport,
};
use mtls_tls::{peer_common_name, TlsError, TlsIdentity};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServerForwarderError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    TlsError(#[from] TlsError),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this address: lsof -i :{port}\n  • Try using a different address or port\n  • Ports below 1024 need elevated privileges")]
    BindError {
        address: String,
        port: String,
        reason: String,
    },
}

/// Why the plaintext backend connection could not be established
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend connect to {address} failed: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("Backend connect to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct ServerForwarderConfig {
    /// TLS listen address (host:port)
    pub listen_addr: String,
    /// Plaintext backend address (host:port)
    pub backend_addr: String,
    /// Deadline for a client's TLS handshake
    pub handshake_timeout: Option<Duration>,
    /// Deadline for the backend TCP connect
    pub connect_timeout: Option<Duration>,
    /// Cap on concurrent sessions
    pub max_connections: Option<usize>,
}

impl ServerForwarderConfig {
    pub fn from_file(file: &ServerConfigFile) -> Self {
        Self {
            listen_addr: file.listen_addr(),
            backend_addr: file.backend_addr(),
            handshake_timeout: file.limits.handshake_timeout(),
            connect_timeout: file.limits.connect_timeout(),
            max_connections: file.limits.max_connections,
        }
    }
}

pub struct ServerForwarder {
    config: ServerForwarderConfig,
    acceptor: TlsAcceptor,
    session_ids: SessionIdGenerator,
    reports: Option<mpsc::UnboundedSender<SessionReport>>,
}

impl ServerForwarder {
    /// Create a forwarder around an already built TLS server configuration.
    ///
    /// The configuration is expected to require client certificates; see
    /// [`TlsIdentity::server_config`].
    pub fn new(config: ServerForwarderConfig, tls_config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            config,
            acceptor: TlsAcceptor::from(tls_config),
            session_ids: SessionIdGenerator::new(),
            reports: None,
        }
    }

    /// Load TLS material named by the configuration file and create a forwarder
    pub fn from_config_file(file: &ServerConfigFile) -> Result<Self, ServerForwarderError> {
        let identity =
            TlsIdentity::load(&file.tls.server_cert, &file.tls.server_key, &file.tls.ca_cert)?;
        Ok(Self::new(
            ServerForwarderConfig::from_file(file),
            identity.server_config()?,
        ))
    }

    /// Publish the report of every finished session on `sender`
    pub fn with_session_reports(mut self, sender: mpsc::UnboundedSender<SessionReport>) -> Self {
        self.reports = Some(sender);
        self
    }

    pub fn config(&self) -> &ServerForwarderConfig {
        &self.config
    }

    /// Bind the TLS listener
    pub async fn bind(&self) -> Result<TcpListener, ServerForwarderError> {
        TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| ServerForwarderError::BindError {
                address: self.config.listen_addr.clone(),
                port: port_of(&self.config.listen_addr),
                reason: e.to_string(),
            })
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self) -> Result<(), ServerForwarderError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept tunnel clients forever, one task per connection
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerForwarderError> {
        let addr = listener.local_addr()?;
        info!("Server listening on {}", addr);
        info!("Forwarding to backend {}", self.config.backend_addr);

        let max_connections = self.config.max_connections;
        let forwarder = Arc::new(self);
        accept_loop(&listener, max_connections, move |stream, peer_addr| {
            let forwarder = forwarder.clone();
            async move { forwarder.handle_connection(stream, peer_addr).await }
        })
        .await;

        Ok(())
    }

    async fn handle_connection(&self, tcp: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.session_ids.generate();
        debug!(session_id, "Accepted TCP connection from {}", peer_addr);

        // The backend is never dialed for a client that fails the handshake
        let tls = match self.handshake(tcp).await {
            Ok(tls) => tls,
            Err(e) => {
                warn!(session_id, peer = %peer_addr, "TLS handshake error: {}", e);
                return;
            }
        };

        let identity = PeerIdentity::from_common_name(
            tls.get_ref()
                .1
                .peer_certificates()
                .and_then(peer_common_name),
        );
        info!(session_id, "Client connected: {} [{}]", identity, peer_addr);

        let ctx = SessionContext::new(
            session_id,
            peer_addr,
            self.config.backend_addr.clone(),
            DirectionLabels::SERVER,
        )
        .with_identity(identity.clone());

        if let Ok(report) = run_session(ctx, tls, self.connect_backend()).await {
            info!(session_id, "Client disconnected: {} [{}]", identity, peer_addr);
            if let Some(reports) = &self.reports {
                let _ = reports.send(report);
            }
        }
    }

    async fn handshake(&self, tcp: TcpStream) -> std::io::Result<TlsStream<TcpStream>> {
        let accept = self.acceptor.accept(tcp);
        match self.config.handshake_timeout {
            Some(timeout) => tokio::time::timeout(timeout, accept)
                .await
                .map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("handshake not completed within {:?}", timeout),
                    )
                })?,
            None => accept.await,
        }
    }

    async fn connect_backend(&self) -> Result<TcpStream, BackendError> {
        let address = &self.config.backend_addr;
        let connect = async {
            TcpStream::connect(address)
                .await
                .map_err(|source| BackendError::Connect {
                    address: address.clone(),
                    source,
                })
        };

        match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| BackendError::Timeout {
                    address: address.clone(),
                    timeout,
                })?,
            None => connect.await,
        }
    }
}
