// Helper functions for loading PEM material

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, warn};

use crate::{TlsError, TlsResult};

fn open(path: &Path, kind: &'static str) -> TlsResult<BufReader<File>> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        kind,
        path: path.display().to_string(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Load every certificate from a PEM file, leaf first
pub fn load_certs(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate")?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Parse {
            kind: "certificate",
            path: path.display().to_string(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }

    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file
pub fn load_private_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let mut reader = open(path, "private key")?;

    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Parse {
            kind: "private key",
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.display().to_string()))
}

/// Build a trust store from a CA bundle.
///
/// Unparsable entries are skipped, but a bundle that yields no anchor at all
/// is an error.
pub fn load_ca_roots(path: &Path) -> TlsResult<RootCertStore> {
    let mut reader = open(path, "CA certificate")?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Parse {
            kind: "CA certificate",
            path: path.display().to_string(),
            source,
        })?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if ignored > 0 {
        warn!(
            "Ignored {} invalid CA certificate(s) in {}",
            ignored,
            path.display()
        );
    }
    if added == 0 {
        return Err(TlsError::EmptyCaPool(path.display().to_string()));
    }

    debug!("Loaded {} CA certificate(s) from {}", added, path.display());
    Ok(roots)
}
