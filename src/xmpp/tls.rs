//! TLS for the XMPP connection (STARTTLS upgrades and direct TLS).

use crate::error::TransportError;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{error, warn};

/// How the client treats TLS on the XMPP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsSettings {
    /// Upgrade via STARTTLS when the server offers it.
    pub starttls: bool,
    /// Skip certificate verification.
    pub insecure: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            starttls: true,
            insecure: false,
        }
    }
}

/// Initialize rustls crypto provider (must be called once at startup)
pub fn init_crypto_provider() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// TLS certificate verifier that accepts all certificates without validation.
///
/// **DANGEROUS**: Only used when `--dangerous-insecure-tls` is set, for
/// servers with self-signed certificates inside a private deployment.
#[derive(Debug)]
struct InsecureCertVerifier(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Create a TLS connector using the system's native root certificates, or one
/// that skips verification when `insecure` is set.
pub fn create_tls_connector(insecure: bool) -> Result<TlsConnector, TransportError> {
    if insecure {
        warn!("TLS certificate verification DISABLED (--dangerous-insecure-tls)");
        let provider = rustls::crypto::ring::default_provider();
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier(Arc::new(provider))))
            .with_no_client_auth();
        return Ok(TlsConnector::from(Arc::new(config)));
    }

    let mut root_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs();
    if native_certs.certs.is_empty() {
        return Err(TransportError::Tls(
            "No system root certificates found. Ensure CA certificates are installed \
            (e.g., ca-certificates package on Linux) or pass --dangerous-insecure-tls."
                .to_string(),
        ));
    }
    for cert in native_certs.certs {
        root_store
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("Failed to add cert: {}", e)))?;
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Upgrade a TCP stream to TLS using `domain` for SNI and certificate checks.
/// A handshake that does not finish within `timeout` fails.
pub async fn upgrade_to_tls(
    tcp_stream: TcpStream,
    domain: &str,
    insecure: bool,
    timeout: Duration,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TransportError> {
    let connector = create_tls_connector(insecure)?;
    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|e| TransportError::Tls(format!("Invalid server name '{}': {}", domain, e)))?;

    match tokio::time::timeout(timeout, connector.connect(server_name, tcp_stream)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => {
            error!(domain, error = %e, "TLS handshake failed");
            Err(TransportError::Tls(format!("TLS handshake with {} failed: {}", domain, e)))
        }
        Err(_) => {
            error!(domain, timeout_ms = timeout.as_millis() as u64, "TLS handshake timed out");
            Err(TransportError::Timeout("during TLS handshake"))
        }
    }
}
