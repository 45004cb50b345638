use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Session ID generator for log correlation
#[derive(Clone)]
pub struct SessionIdGenerator {
    next_session_id: Arc<AtomicU64>,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn generate(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Who is on the other end of the front connection.
///
/// This is a logging label only. Authentication is whatever the TLS
/// handshake already enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    /// Plaintext local connection, nothing to identify
    Local,
    /// Subject common name of the verified client certificate
    CommonName(String),
    /// TLS peer whose certificate carried no usable common name
    Unknown,
}

impl PeerIdentity {
    pub fn from_common_name(common_name: Option<String>) -> Self {
        match common_name {
            Some(cn) if !cn.is_empty() => Self::CommonName(cn),
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::CommonName(cn) => f.write_str(cn),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Log labels for the two copy directions of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionLabels {
    pub front_to_back: &'static str,
    pub back_to_front: &'static str,
}

impl DirectionLabels {
    /// Client side: front is the local application, back is the tunnel server
    pub const CLIENT: Self = Self {
        front_to_back: "Sent to server",
        back_to_front: "Received from server",
    };

    /// Server side: front is the tunnel client, back is the backend
    pub const SERVER: Self = Self {
        front_to_back: "Received from client",
        back_to_front: "Sent to client",
    };
}

/// Everything a session needs for its log lines
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: u64,
    pub peer_addr: SocketAddr,
    pub target: String,
    pub identity: PeerIdentity,
    pub labels: DirectionLabels,
}

impl SessionContext {
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        target: impl Into<String>,
        labels: DirectionLabels,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            target: target.into(),
            identity: PeerIdentity::Local,
            labels,
        }
    }

    pub fn with_identity(mut self, identity: PeerIdentity) -> Self {
        self.identity = identity;
        self
    }
}
