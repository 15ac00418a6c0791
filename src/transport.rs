//! Transport abstraction for pooled connections.
//!
//! A [`ProtocolConnection`](crate::ProtocolConnection) speaks NNTP over any
//! [`AsyncStream`]. The stream is produced by a [`Connector`], which lets the
//! pool open plain TCP or TLS connections (via [`TcpConnector`]) or in-memory
//! streams in tests (via [`MockServer`](crate::mock::MockServer)).

use async_trait::async_trait;

use crate::config::ServerTarget;
use crate::error::{Error, Result};

/// A byte stream to an NNTP server.
///
/// Implementations must be `Send + Unpin + 'static` so a connection can move
/// into its worker task.
#[async_trait]
pub trait AsyncStream: Send + Unpin + 'static {
    /// Reads data from the stream into the provided buffer.
    ///
    /// Returns `Ok(0)` when EOF is reached.
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Writes all data from the buffer to the stream.
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Shuts down the stream.
    async fn shutdown(&mut self) -> std::io::Result<()>;
}

/// Opens transports for a [`ServerTarget`].
///
/// Called once per pooled connection when its worker starts.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a transport, negotiating TLS if the target asks for it.
    async fn connect(&self, target: &ServerTarget) -> Result<Box<dyn AsyncStream>>;
}

// ============================================================================
// Plain TCP
// ============================================================================

/// A newtype wrapper around `tokio::net::TcpStream`.
pub struct TokioStream(pub tokio::net::TcpStream);

#[async_trait]
impl AsyncStream for TokioStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.0.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        tokio::io::AsyncWriteExt::write_all(&mut self.0, buf).await
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.0).await
    }
}

// ============================================================================
// TLS
// ============================================================================

/// A newtype wrapper around a rustls client stream.
#[cfg(feature = "tls")]
#[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
pub struct TlsStream(pub Box<tokio_rustls::client::TlsStream<tokio::net::TcpStream>>);

#[cfg(feature = "tls")]
#[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
#[async_trait]
impl AsyncStream for TlsStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.0.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        tokio::io::AsyncWriteExt::write_all(&mut self.0, buf).await
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.0).await
    }
}

/// Connects over TCP, wrapping the socket in TLS when the target sets `tls`.
///
/// TLS client configurations are built on first use and shared by every
/// connection opened through this connector, so session tickets are reused.
/// Verifying and non-verifying targets get separate configurations.
#[derive(Default)]
pub struct TcpConnector {
    #[cfg(feature = "tls")]
    verifying: std::sync::OnceLock<std::sync::Arc<rustls::ClientConfig>>,
    #[cfg(feature = "tls")]
    permissive: std::sync::OnceLock<std::sync::Arc<rustls::ClientConfig>>,
}

impl TcpConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "tls")]
    fn tls_config(&self, verify: bool) -> Result<std::sync::Arc<rustls::ClientConfig>> {
        let cell = if verify {
            &self.verifying
        } else {
            &self.permissive
        };
        if let Some(config) = cell.get() {
            return Ok(config.clone());
        }
        let config = tls::build_config(verify)?;
        Ok(cell.get_or_init(|| config).clone())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, target: &ServerTarget) -> Result<Box<dyn AsyncStream>> {
        let tcp = tokio::net::TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to {}: {e}", target.addr())))?;

        if !target.tls {
            return Ok(Box::new(TokioStream(tcp)));
        }
        self.wrap_tls(tcp, target).await
    }
}

impl TcpConnector {
    #[cfg(feature = "tls")]
    async fn wrap_tls(
        &self,
        tcp: tokio::net::TcpStream,
        target: &ServerTarget,
    ) -> Result<Box<dyn AsyncStream>> {
        let config = self.tls_config(target.verify_certificates)?;
        let stream = tls::connect(tcp, &target.host, config).await?;
        Ok(Box::new(TlsStream(Box::new(stream))))
    }

    #[cfg(not(feature = "tls"))]
    async fn wrap_tls(
        &self,
        _tcp: tokio::net::TcpStream,
        _target: &ServerTarget,
    ) -> Result<Box<dyn AsyncStream>> {
        Err(Error::Tls(
            "TLS requested but the `tls` feature is disabled".to_string(),
        ))
    }
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
    use tokio::net::TcpStream;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::TlsConnector;

    use crate::error::{Error, Result};

    /// Build a TLS client configuration.
    ///
    /// With `verify` unset, any server certificate is accepted (self-signed
    /// servers).
    pub(super) fn build_config(verify: bool) -> Result<Arc<ClientConfig>> {
        let provider = rustls::crypto::ring::default_provider();
        let _ = provider.install_default();

        let config = if verify {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        } else {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier::new()))
                .with_no_client_auth()
        };

        Ok(Arc::new(config))
    }

    pub(super) async fn connect(
        tcp: TcpStream,
        hostname: &str,
        config: Arc<ClientConfig>,
    ) -> Result<TlsStream<TcpStream>> {
        let connector = TlsConnector::from(config);
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::Connection(format!("Invalid TLS server name: {hostname}")))?;

        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Connection(format!("TLS handshake with {hostname} failed: {e}")))
    }

    #[derive(Debug)]
    struct NoVerifier {
        supported_schemes: Vec<SignatureScheme>,
    }

    impl NoVerifier {
        fn new() -> Self {
            Self {
                supported_schemes: rustls::crypto::ring::default_provider()
                    .signature_verification_algorithms
                    .supported_schemes(),
            }
        }
    }

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.supported_schemes.clone()
        }
    }

}
