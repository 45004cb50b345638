//! Throwaway PKI for development and testing
//!
//! Generates a CA plus one server and one client certificate signed by it,
//! which is enough to run both ends of the tunnel locally.
//! **DO NOT use in production** - issue real certificates from your own CA.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Leaf certificates are valid for one year
const LEAF_VALIDITY_DAYS: i64 = 365;

/// The CA outlives its leaves
const CA_VALIDITY_DAYS: i64 = 5 * 365;

#[derive(Error, Debug)]
pub enum DevPkiError {
    #[error("Certificate generation failed: {0}")]
    GenerationFailed(#[from] rcgen::Error),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// CA, server and client material in PEM form
pub struct DevPki {
    pub ca_cert_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

/// Where [`DevPki::write_to_dir`] put each file
#[derive(Debug, Clone)]
pub struct DevPkiPaths {
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl DevPki {
    /// Generate a fresh CA and sign a server certificate for `server_names`
    /// (DNS names or IP literals) and a client certificate whose subject
    /// common name is `client_common_name`.
    pub fn generate(
        server_names: &[&str],
        client_common_name: &str,
    ) -> Result<Self, DevPkiError> {
        let now = OffsetDateTime::now_utc();

        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.distinguished_name = distinguished_name("mTLS Tunnel Development CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.not_before = now - Duration::days(1);
        ca_params.not_after = now + Duration::days(CA_VALIDITY_DAYS);

        let ca_key = KeyPair::generate()?;
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let server_names: Vec<String> = server_names.iter().map(|s| s.to_string()).collect();
        let common_name = server_names
            .first()
            .cloned()
            .unwrap_or_else(|| "localhost".to_string());
        let (server_cert_pem, server_key_pem) = sign_leaf(
            server_names,
            &common_name,
            ExtendedKeyUsagePurpose::ServerAuth,
            &ca_cert,
            &ca_key,
            now,
        )?;

        let (client_cert_pem, client_key_pem) = sign_leaf(
            Vec::new(),
            client_common_name,
            ExtendedKeyUsagePurpose::ClientAuth,
            &ca_cert,
            &ca_key,
            now,
        )?;

        Ok(Self {
            ca_cert_pem: ca_cert.pem(),
            server_cert_pem,
            server_key_pem,
            client_cert_pem,
            client_key_pem,
        })
    }

    /// Write all five PEM files into `dir`, creating it if needed
    pub fn write_to_dir(&self, dir: &Path) -> Result<DevPkiPaths, DevPkiError> {
        fs::create_dir_all(dir).map_err(|source| DevPkiError::Write {
            path: dir.display().to_string(),
            source,
        })?;

        let paths = DevPkiPaths {
            ca_cert: dir.join("ca.crt"),
            server_cert: dir.join("server.crt"),
            server_key: dir.join("server.key"),
            client_cert: dir.join("client.crt"),
            client_key: dir.join("client.key"),
        };

        for (path, contents) in [
            (&paths.ca_cert, &self.ca_cert_pem),
            (&paths.server_cert, &self.server_cert_pem),
            (&paths.server_key, &self.server_key_pem),
            (&paths.client_cert, &self.client_cert_pem),
            (&paths.client_key, &self.client_key_pem),
        ] {
            fs::write(path, contents).map_err(|source| DevPkiError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }

        Ok(paths)
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "mTLS Tunnel Dev");
    dn
}

fn sign_leaf(
    subject_alt_names: Vec<String>,
    common_name: &str,
    usage: ExtendedKeyUsagePurpose,
    ca_cert: &Certificate,
    ca_key: &KeyPair,
    now: OffsetDateTime,
) -> Result<(String, String), DevPkiError> {
    let mut params = CertificateParams::new(subject_alt_names)?;
    params.distinguished_name = distinguished_name(common_name);
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![usage];
    params.use_authority_key_identifier_extension = true;
    params.not_before = now - Duration::days(1);
    params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);

    let key = KeyPair::generate()?;
    let cert = params.signed_by(&key, ca_cert, ca_key)?;

    Ok((cert.pem(), key.serialize_pem()))
}
