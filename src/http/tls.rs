//! TLS context construction from operator-supplied PEM files.
//!
//! The context is built once at startup with an explicit aws-lc-rs provider
//! and no client authentication. It is never reloaded.

use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use super::server::ServerError;

/// Load the certificate chain and private key and build the server TLS context.
pub async fn load_tls_context(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, ServerError> {
    let cert_pem = tokio::fs::read(cert_path).await.map_err(|e| {
        ServerError::TlsConfig(format!(
            "Failed to read certificate '{}': {}",
            cert_path.display(),
            e
        ))
    })?;
    let key_pem = tokio::fs::read(key_path).await.map_err(|e| {
        ServerError::TlsConfig(format!(
            "Failed to read private key '{}': {}",
            key_path.display(),
            e
        ))
    })?;

    let certs = CertificateDer::pem_slice_iter(&cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ServerError::TlsConfig(format!(
                "Invalid certificate PEM in '{}': {}",
                cert_path.display(),
                e
            ))
        })?;
    if certs.is_empty() {
        return Err(ServerError::TlsConfig(format!(
            "No certificates found in '{}'",
            cert_path.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| {
        ServerError::TlsConfig(format!(
            "No usable private key in '{}': {}",
            key_path.display(),
            e
        ))
    })?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::TlsConfig(format!("Unsupported TLS protocol set: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| {
            ServerError::TlsConfig(format!(
                "Certificate '{}' and key '{}' cannot be used together: {}",
                cert_path.display(),
                key_path.display(),
                e
            ))
        })?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    tracing::debug!(cert = %cert_path.display(), key = %key_path.display(), "Loaded TLS context");

    Ok(RustlsConfig::from_config(Arc::new(config)))
}
