//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::error::TlsError;

/// Load a server configuration from PEM certificate and key files.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    // Basic validation
    if !cert_path.exists() {
        return Err(TlsError::NotFound(cert_path.to_path_buf()));
    }
    if !key_path.exists() {
        return Err(TlsError::NotFound(key_path.to_path_buf()));
    }

    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::MissingCertificate(cert_path.to_path_buf()));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| TlsError::MissingPrivateKey(key_path.to_path_buf()))?;

    tracing::info!(
        cert_path = %cert_path.display(),
        certificates = certs.len(),
        "TLS certificate chain loaded"
    );

    build_server_config(certs, key)
}

/// Build a server configuration from DER material, offering HTTP/1.1 only.
pub fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
