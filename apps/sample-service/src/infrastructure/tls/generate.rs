//! Development certificate generation.
//!
//! Each listener gets its own throwaway CA plus a leaf certificate signed
//! by it, valid for `localhost`, `127.0.0.1` and `::1`.

use std::fs;
use std::path::Path;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};

use super::CredentialError;
use crate::domain::SYSTEM_NAME;
use crate::infrastructure::config::{ApiConfig, TlsCredsConfig};

/// Subject alternative names on every generated leaf certificate.
const DEV_SANS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// PEM encoded material for one listener.
#[derive(Debug, Clone)]
pub struct DevCert {
    /// Leaf certificate.
    pub cert_pem: String,
    /// Leaf private key.
    pub key_pem: String,
    /// Issuing CA certificate.
    pub ca_pem: String,
}

impl DevCert {
    /// Generate a CA and a leaf certificate for `common_name`.
    ///
    /// # Errors
    ///
    /// Returns `rcgen::Error` if key generation or signing fails.
    pub fn generate(common_name: &str) -> Result<Self, rcgen::Error> {
        let (ca_cert, ca_key) = generate_ca(common_name)?;

        let leaf_key = KeyPair::generate()?;
        let mut params =
            CertificateParams::new(DEV_SANS.iter().map(ToString::to_string).collect::<Vec<_>>())?;
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params
            .distinguished_name
            .push(DnType::OrganizationName, SYSTEM_NAME);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.use_authority_key_identifier_extension = true;

        let leaf = params.signed_by(&leaf_key, &ca_cert, &ca_key)?;

        Ok(Self {
            cert_pem: leaf.pem(),
            key_pem: leaf_key.serialize_pem(),
            ca_pem: ca_cert.pem(),
        })
    }

    /// Write the material to the paths in `creds`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Write` naming the file that could not be written.
    pub fn write(&self, creds: &TlsCredsConfig) -> Result<(), CredentialError> {
        write_file(&creds.tls_key_path, &self.key_pem)?;
        write_file(&creds.tls_cert_path, &self.cert_pem)?;
        write_file(&creds.tls_ca_cert_path, &self.ca_pem)
    }
}

fn generate_ca(common_name: &str) -> Result<(Certificate, KeyPair), rcgen::Error> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, format!("{common_name}-ca"));
    params
        .distinguished_name
        .push(DnType::OrganizationName, SYSTEM_NAME);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let cert = params.self_signed(&key)?;
    Ok((cert, key))
}

fn write_file(path: &Path, contents: &str) -> Result<(), CredentialError> {
    let to_error = |source| CredentialError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    fs::write(path, contents).map_err(to_error)
}

/// Generate and write a development certificate for one listener.
///
/// # Errors
///
/// Returns `CredentialError` if generation or writing fails.
pub fn generate_dev_cert(common_name: &str, creds: &TlsCredsConfig) -> Result<(), CredentialError> {
    DevCert::generate(common_name)?.write(creds)?;
    tracing::info!(
        common_name,
        cert = %creds.tls_cert_path.display(),
        "Generated development certificate"
    );
    Ok(())
}

/// Generate gRPC and gateway certificates unless any of their files exist.
///
/// Returns `true` when certificates were written. Existing files are never
/// overwritten, even if the set is incomplete.
///
/// # Errors
///
/// Returns `CredentialError` if generation or writing fails.
pub fn ensure_dev_certs(api: &ApiConfig) -> Result<bool, CredentialError> {
    let existing: Vec<&Path> = api
        .grpc
        .certs
        .paths()
        .into_iter()
        .chain(api.gateway.certs.paths())
        .filter(|path| path.exists())
        .collect();

    if !existing.is_empty() {
        for path in existing {
            tracing::info!(path = %path.display(), "Using existing certificate file");
        }
        return Ok(false);
    }

    generate_dev_cert(&format!("{SYSTEM_NAME}-grpc"), &api.grpc.certs)?;
    generate_dev_cert(&format!("{SYSTEM_NAME}-gateway"), &api.gateway.certs)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_in(dir: &Path) -> ApiConfig {
        let mut api = ApiConfig::default();
        api.grpc.certs = TlsCredsConfig::in_dir(dir, "grpc");
        api.gateway.certs = TlsCredsConfig::in_dir(dir, "gateway");
        api
    }

    #[test]
    fn generated_pem_blocks() {
        let cert = DevCert::generate("unit-test").unwrap();
        assert!(cert.cert_pem.contains("-----BEGIN CERTIFICATE-----"));
        assert!(cert.ca_pem.contains("-----BEGIN CERTIFICATE-----"));
        assert!(cert.key_pem.contains("PRIVATE KEY-----"));
        assert_ne!(cert.cert_pem, cert.ca_pem);
    }

    #[test]
    fn ensure_generates_into_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_in(&dir.path().join("nested"));

        assert!(ensure_dev_certs(&api).unwrap());

        for path in api.grpc.certs.paths().into_iter().chain(api.gateway.certs.paths()) {
            assert!(path.exists(), "{} missing", path.display());
        }
    }

    #[test]
    fn ensure_skips_when_any_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_in(dir.path());
        fs::write(&api.gateway.certs.tls_ca_cert_path, "existing").unwrap();

        assert!(!ensure_dev_certs(&api).unwrap());

        assert!(!api.grpc.certs.tls_cert_path.exists());
        assert_eq!(
            fs::read_to_string(&api.gateway.certs.tls_ca_cert_path).unwrap(),
            "existing"
        );
    }

    #[test]
    fn ensure_is_stable_on_second_call() {
        let dir = tempfile::tempdir().unwrap();
        let api = api_in(dir.path());

        assert!(ensure_dev_certs(&api).unwrap());
        let first = fs::read_to_string(&api.grpc.certs.tls_cert_path).unwrap();

        assert!(!ensure_dev_certs(&api).unwrap());
        let second = fs::read_to_string(&api.grpc.certs.tls_cert_path).unwrap();
        assert_eq!(first, second);
    }
}
