//! TLS Credential Provider
//!
//! Turns a [`TlsCredsConfig`] (key, certificate and CA paths) into the TLS
//! configuration each listener needs:
//!
//! - [`grpc_server_tls`]: tonic server config for the gRPC and health listeners
//! - [`gateway_server_tls`]: rustls server config for the HTTP gateway
//! - [`gateway_as_client_tls`]: tonic client config the gateway uses to dial gRPC
//!
//! Every loader reads the files eagerly and checks they hold at least one
//! certificate or key, so a bad path fails construction rather than the
//! first handshake.
//!
//! Development certificates can be generated with [`ensure_dev_certs`].

mod generate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::infrastructure::config::TlsCredsConfig;

pub use generate::{DevCert, ensure_dev_certs, generate_dev_cert};

/// ALPN protocols advertised by the gateway listener.
const GATEWAY_ALPN: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// TLS credential errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// A credential file could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A certificate file holds no usable certificate.
    #[error("no certificates found in '{}'", path.display())]
    NoCertificates {
        /// Offending file.
        path: PathBuf,
    },

    /// A key file holds no usable private key.
    #[error("no private key found in '{}'", path.display())]
    NoPrivateKey {
        /// Offending file.
        path: PathBuf,
    },

    /// A CA certificate was rejected by the trust store.
    #[error("invalid CA certificate in '{}': {source}", path.display())]
    InvalidCa {
        /// Offending file.
        path: PathBuf,
        /// Rejection reason.
        source: rustls::Error,
    },

    /// The certificate and key were rejected as a pair.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    /// The client certificate verifier could not be built.
    #[error("client verifier error: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    /// Certificate generation failed.
    #[error("failed to generate certificate: {0}")]
    Generate(#[from] rcgen::Error),

    /// A generated credential could not be written.
    #[error("failed to write '{}': {source}", path.display())]
    Write {
        /// Target file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// Install ring as the process-wide rustls provider.
///
/// tonic's TLS builders resolve the process default, which rustls cannot
/// pick on its own when more than one provider is compiled in. A provider
/// installed earlier by the caller is kept.
pub fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Fails only when another thread installed one first.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

// =============================================================================
// PEM loading
// =============================================================================

fn read(path: &Path) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a PEM file and return its raw bytes and parsed certificates.
fn load_certs(path: &Path) -> Result<(Vec<u8>, Vec<CertificateDer<'static>>), CredentialError> {
    let pem = read(path)?;
    let certs: Vec<_> = CertificateDer::pem_slice_iter(&pem)
        .filter_map(Result::ok)
        .collect();
    if certs.is_empty() {
        return Err(CredentialError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok((pem, certs))
}

/// Read a PEM file and return its raw bytes and the first private key.
fn load_key(path: &Path) -> Result<(Vec<u8>, PrivateKeyDer<'static>), CredentialError> {
    let pem = read(path)?;
    let key = PrivateKeyDer::from_pem_slice(&pem).map_err(|_| CredentialError::NoPrivateKey {
        path: path.to_path_buf(),
    })?;
    Ok((pem, key))
}

fn root_store(path: &Path) -> Result<RootCertStore, CredentialError> {
    let (_, cas) = load_certs(path)?;
    let mut roots = RootCertStore::empty();
    for ca in cas {
        roots
            .add(ca)
            .map_err(|source| CredentialError::InvalidCa {
                path: path.to_path_buf(),
                source,
            })?;
    }
    Ok(roots)
}

// =============================================================================
// Listener configurations
// =============================================================================

/// Server TLS for a tonic listener.
///
/// Clients are not required to present a certificate; one that does is
/// verified against the configured CA.
///
/// # Errors
///
/// Returns `CredentialError` if any of the three files is missing or holds
/// no usable PEM material.
pub fn grpc_server_tls(creds: &TlsCredsConfig) -> Result<ServerTlsConfig, CredentialError> {
    install_crypto_provider();
    let (cert, _) = load_certs(&creds.tls_cert_path)?;
    let (key, _) = load_key(&creds.tls_key_path)?;
    let (ca, _) = load_certs(&creds.tls_ca_cert_path)?;

    Ok(ServerTlsConfig::new()
        .identity(Identity::from_pem(cert, key))
        .client_ca_root(Certificate::from_pem(ca))
        .client_auth_optional(true))
}

/// Server TLS for the HTTP gateway listener (HTTP/2 and HTTP/1.1 via ALPN).
///
/// # Errors
///
/// Returns `CredentialError` if the files are unusable or rustls rejects
/// the certificate/key pair.
pub fn gateway_server_tls(
    creds: &TlsCredsConfig,
) -> Result<Arc<rustls::ServerConfig>, CredentialError> {
    let (_, chain) = load_certs(&creds.tls_cert_path)?;
    let (_, key) = load_key(&creds.tls_key_path)?;
    let roots = root_store(&creds.tls_ca_cert_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .allow_unauthenticated()
        .build()?;

    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)?;
    config.alpn_protocols = GATEWAY_ALPN.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

/// Client TLS the gateway uses to reach the gRPC listener; trusts `creds`' CA.
///
/// # Errors
///
/// Returns `CredentialError` if the CA file is missing or holds no certificate.
pub fn gateway_as_client_tls(creds: &TlsCredsConfig) -> Result<ClientTlsConfig, CredentialError> {
    install_crypto_provider();
    let (ca, _) = load_certs(&creds.tls_ca_cert_path)?;
    Ok(ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca)))
}
