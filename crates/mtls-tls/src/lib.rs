//! TLS material for the mTLS tunnel
//!
//! Loads PEM certificates, keys and CA bundles, and turns them into rustls
//! client and server configurations that enforce mutual authentication with
//! TLS 1.2 as the minimum protocol version. The resulting configurations are
//! built once at startup and shared read-only by every session.

pub mod dev_pki;
mod identity;
mod pem;
mod peer;

pub use dev_pki::{DevPki, DevPkiError, DevPkiPaths};
pub use identity::{server_name, TlsIdentity};
pub use pem::{load_ca_roots, load_certs, load_private_key};
pub use peer::peer_common_name;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to open {kind} file {path}: {source}")]
    Read {
        kind: &'static str,
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {kind} file {path}: {source}")]
    Parse {
        kind: &'static str,
        path: String,
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(String),

    #[error("No private key found in {0}")]
    NoPrivateKey(String),

    #[error("No usable CA certificates found in {0}")]
    EmptyCaPool(String),

    #[error("Invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),

    #[error("Invalid client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),
}

pub type TlsResult<T> = Result<T, TlsError>;
