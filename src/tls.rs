//! Self-signed TLS identity generated once per process. The certificate
//! terminates the two HTTPS surfaces and, served over the plaintext cert
//! side-channel, is the proxy's out-of-band proof of identity towards peers.

use rcgen::{CertificateParams, DnType, KeyPair};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("failed to generate TLS identity: {0}")]
pub struct TlsIdentityError(#[from] rcgen::Error);

/// The proxy's self-signed certificate and private key, both PEM encoded.
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a fresh self-signed certificate valid for `valid_for` with the
/// given subject alternative names.
pub fn generate_tls_identity(
    hosts: &[String],
    valid_for: Duration,
) -> Result<TlsIdentity, TlsIdentityError> {
    let mut params = CertificateParams::new(hosts.to_vec())?;
    params.distinguished_name.push(DnType::CommonName, "meshproxy");

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before +
        time::Duration::try_from(valid_for).unwrap_or(time::Duration::days(365));

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok(TlsIdentity { cert_pem: cert.pem(), key_pem: key_pair.serialize_pem() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_pem_identity() {
        let hosts = vec!["127.0.0.1".to_string(), "localhost".to_string()];
        let identity = generate_tls_identity(&hosts, Duration::from_secs(3600)).unwrap();

        assert!(identity.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(identity.key_pem.contains("PRIVATE KEY"));

        // The generated certificate is a valid pinning root for reqwest.
        reqwest::Certificate::from_pem(identity.cert_pem.as_bytes()).unwrap();
    }
}
