//! TLS Configuration Module
//!
//! Builds the rustls client configuration used for explicit FTPS
//! (`AUTH TLS`, RFC 4217). The same configuration wraps the control
//! connection and every data connection, so rustls can resume the control
//! session on the data channel as most FTPS servers require.
//!
//! Trust comes from, in order of preference:
//! 1. A PEM bundle named by `ca_file` in the `[server]` section
//! 2. The platform's native root store
//!
//! `insecure = yes` skips verification entirely.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::certs;
use tracing::{debug, info, warn};

/// TLS configuration for the FTPS client
#[derive(Clone)]
pub struct ClientTlsConfig {
    pub config: Arc<ClientConfig>,
    pub server_name: ServerName<'static>,
}

impl ClientTlsConfig {
    /// Create a verifying client configuration
    ///
    /// # Arguments
    /// * `ca_cert_path` - Optional PEM bundle of trusted roots; the native
    ///   root store is used when absent
    /// * `server_name` - The expected server name (SNI and certificate check)
    pub fn new(ca_cert_path: Option<&Path>, server_name: &str) -> Result<Self> {
        let mut root_store = RootCertStore::empty();

        if let Some(ca_path) = ca_cert_path {
            for cert in load_certs(ca_path)? {
                root_store
                    .add(cert)
                    .context("Failed to add CA certificate to root store")?;
            }
            info!("Loaded custom CA certificate from {:?}", ca_path);
        } else {
            let native = rustls_native_certs::load_native_certs();
            for error in &native.errors {
                debug!("Skipping native root: {}", error);
            }
            let (added, ignored) = root_store.add_parsable_certificates(native.certs);
            debug!("Loaded {} native root certificate(s), ignored {}", added, ignored);
            if added == 0 {
                warn!("No trusted root certificates found, set ca_file in [server]");
            }
        }

        Self::with_roots(root_store, server_name)
    }

    /// Create an insecure client config that skips certificate verification
    ///
    /// # WARNING
    /// The connection is encrypted but the server is not authenticated, so
    /// credentials can be intercepted by anyone able to sit in the middle.
    pub fn insecure(server_name: &str) -> Result<Self> {
        warn!("⚠️  Certificate verification DISABLED for {}", server_name);

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            server_name: parse_server_name(server_name)?,
        })
    }

    fn with_roots(root_store: RootCertStore, server_name: &str) -> Result<Self> {
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
            server_name: parse_server_name(server_name)?,
        })
    }
}

fn parse_server_name(server_name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(server_name.to_owned()).context("Invalid server name for TLS")
}

/// Certificate verifier that accepts any certificate (INSECURE!)
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Load certificates from a PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open certificate file: {:?}", path))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse certificates")?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {:?}", path);
    }

    Ok(certs)
}
