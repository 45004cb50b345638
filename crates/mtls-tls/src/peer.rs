use rustls::pki_types::CertificateDer;

/// Subject common name of the leaf in a peer's certificate chain.
///
/// Returns `None` when no certificate was presented, the leaf cannot be
/// parsed, or its subject carries no common name.
pub fn peer_common_name(chain: &[CertificateDer<'_>]) -> Option<String> {
    let leaf = chain.first()?;
    let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref()).ok()?;
    let common_name = cert.subject().iter_common_name().next()?;
    common_name.as_str().ok().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DevPki;

    #[test]
    fn test_common_name_of_generated_client() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DevPki::generate(&["localhost"], "billing-gateway")
            .unwrap()
            .write_to_dir(dir.path())
            .unwrap();

        let chain = crate::load_certs(&paths.client_cert).unwrap();
        assert_eq!(peer_common_name(&chain).as_deref(), Some("billing-gateway"));
    }

    #[test]
    fn test_no_certificate_presented() {
        assert_eq!(peer_common_name(&[]), None);
    }

    #[test]
    fn test_unparsable_certificate() {
        let garbage = CertificateDer::from(vec![0x30, 0x03, 0x01, 0x01, 0xff]);
        assert_eq!(peer_common_name(&[garbage]), None);
    }
}
