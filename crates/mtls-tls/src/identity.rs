use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SupportedProtocolVersion};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::pem::{load_ca_roots, load_certs, load_private_key};
use crate::{TlsError, TlsResult};

/// TLS 1.2 is the floor on both ends
static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// Local certificate chain, its private key, and the CA pool used to verify
/// the peer
#[derive(Debug)]
pub struct TlsIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub ca_roots: RootCertStore,
}

impl TlsIdentity {
    /// Load identity material from PEM files
    pub fn load(cert_path: &Path, key_path: &Path, ca_path: &Path) -> TlsResult<Self> {
        let cert_chain = load_certs(cert_path)?;
        let private_key = load_private_key(key_path)?;
        let ca_roots = load_ca_roots(ca_path)?;

        info!(
            "Loaded TLS identity from {} ({} CA certificate(s) trusted)",
            cert_path.display(),
            ca_roots.len()
        );

        Ok(Self {
            cert_chain,
            private_key,
            ca_roots,
        })
    }

    /// Client configuration: presents our certificate and verifies the
    /// server's against the CA pool
    pub fn client_config(&self) -> TlsResult<Arc<ClientConfig>> {
        let config = ClientConfig::builder_with_provider(crypto_provider())
            .with_protocol_versions(PROTOCOL_VERSIONS)?
            .with_root_certificates(self.ca_roots.clone())
            .with_client_auth_cert(self.cert_chain.clone(), self.private_key.clone_key())?;

        Ok(Arc::new(config))
    }

    /// Server configuration: requires a client certificate that chains to the
    /// CA pool
    pub fn server_config(&self) -> TlsResult<Arc<ServerConfig>> {
        let provider = crypto_provider();
        let roots = Arc::new(self.ca_roots.clone());
        let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider.clone()).build()?;

        let config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(PROTOCOL_VERSIONS)?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.cert_chain.clone(), self.private_key.clone_key())?;

        Ok(Arc::new(config))
    }
}

/// Parse the name the server certificate has to be valid for.
///
/// IP literals are matched against IP SANs, anything else against DNS SANs.
pub fn server_name(name: &str) -> TlsResult<ServerName<'static>> {
    ServerName::try_from(name.to_string())
        .map_err(|_| TlsError::InvalidServerName(name.to_string()))
}
