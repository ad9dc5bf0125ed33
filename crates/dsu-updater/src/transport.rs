//! Certificate-pinned downloads from the update server.
//!
//! Every request opens a fresh TLS connection (no pooling, no session
//! resumption) to the configured host. The server certificate must pass the
//! standard chain and hostname checks, and additionally the SHA-256 hash of
//! its SubjectPublicKeyInfo must be one of the configured pins. A pin
//! mismatch fails the handshake even if the chain is otherwise trusted.
//!
//! Response bodies are streamed to `<dest>.part` and renamed to `dest` only
//! once the body is complete, so callers never see a truncated file.

use std::error::Error as StdError;
use std::ffi::OsString;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{Resumption, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::UpdateError;

/// Downloads a server path to a local file.
///
/// Implemented by [`PinnedTransport`]; the orchestrator only depends on this
/// trait.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `path` into `dest` and return the number of bytes written.
    ///
    /// `dest` only exists after a successful return.
    async fn fetch(&self, path: &str, dest: &Path) -> Result<u64, UpdateError>;
}

/// SHA-256 hashes of accepted server public keys.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificatePins {
    pins: Vec<[u8; 32]>,
}

impl CertificatePins {
    /// Decode base64-encoded SHA-256 pins.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPin` if a pin is not valid base64, is not 32 bytes
    /// long, or if no pins are given.
    pub fn from_base64<I, S>(encoded: I) -> Result<Self, UpdateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pins = encoded
            .into_iter()
            .map(|pin| {
                let pin = pin.as_ref().trim();
                let bytes = STANDARD
                    .decode(pin)
                    .map_err(|e| UpdateError::InvalidPin(format!("{}: {}", pin, e)))?;
                <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
                    UpdateError::InvalidPin(format!(
                        "{}: expected 32 bytes, got {}",
                        pin,
                        bytes.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if pins.is_empty() {
            return Err(UpdateError::InvalidPin(
                "at least one certificate pin is required".to_string(),
            ));
        }

        Ok(Self { pins })
    }

    /// Number of pins.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Always false; an empty pin set cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Whether `digest` is one of the pins, compared in constant time.
    pub fn contains(&self, digest: &[u8; 32]) -> bool {
        self.pins
            .iter()
            .fold(0u8, |found, pin| found | pin.as_slice().ct_eq(digest.as_slice()).unwrap_u8())
            == 1
    }
}

impl fmt::Debug for CertificatePins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.pins.iter().map(|pin| STANDARD.encode(pin)))
            .finish()
    }
}

/// SHA-256 of a certificate's DER-encoded SubjectPublicKeyInfo.
pub fn spki_sha256(cert_der: &[u8]) -> Result<[u8; 32], UpdateError> {
    let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| UpdateError::InvalidPin(format!("unparseable certificate: {}", e)))?;
    Ok(Sha256::digest(cert.public_key().raw).into())
}

/// Base64 pin for a DER certificate, in the form the configuration expects.
pub fn spki_pin(cert_der: &[u8]) -> Result<String, UpdateError> {
    Ok(STANDARD.encode(spki_sha256(cert_der)?))
}

/// Parse every certificate in a PEM bundle.
pub fn certificates_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, UpdateError> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(UpdateError::ConfigError(
            "no certificates found in PEM data".to_string(),
        ));
    }
    Ok(certs)
}

/// Chain and hostname verification followed by a public key pin check.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    inner: Arc<WebPkiServerVerifier>,
    pins: Arc<CertificatePins>,
    pin_rejected: Arc<AtomicBool>,
}

impl PinnedCertVerifier {
    /// Create a verifier over `roots`.
    ///
    /// `pin_rejected` is set when a handshake fails because of the pin so the
    /// caller can tell pin failures apart from other TLS errors.
    pub fn new(
        roots: Arc<RootCertStore>,
        provider: Arc<CryptoProvider>,
        pins: Arc<CertificatePins>,
        pin_rejected: Arc<AtomicBool>,
    ) -> Result<Self, UpdateError> {
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| UpdateError::ConfigError(format!("certificate verifier: {}", e)))?;
        Ok(Self {
            inner,
            pins,
            pin_rejected,
        })
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verified = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;

        let digest = spki_sha256(end_entity.as_ref()).map_err(|e| {
            warn!(error = %e, "could not extract server public key");
            rustls::Error::InvalidCertificate(CertificateError::BadEncoding)
        })?;

        if !self.pins.contains(&digest) {
            self.pin_rejected.store(true, Ordering::SeqCst);
            error!(
                server = ?server_name,
                public_key = %STANDARD.encode(digest),
                "server public key does not match any pinned fingerprint"
            );
            return Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ));
        }

        debug!(server = ?server_name, "server public key matches pin");
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// HTTPS downloader for a single pinned host.
pub struct PinnedTransport {
    hostname: String,
    port: u16,
    pins: Arc<CertificatePins>,
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
    connect_timeout: Duration,
    read_timeout: Duration,
    resolved_address: Option<SocketAddr>,
}

impl PinnedTransport {
    /// Create a transport trusting the bundled web PKI roots.
    pub fn new(hostname: impl Into<String>, port: u16, pins: CertificatePins) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            pins: Arc::new(pins),
            roots: RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            },
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            resolved_address: None,
        }
    }

    /// Create a transport from the `[server]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns an error if the pins cannot be decoded or an extra root
    /// certificate file cannot be read.
    pub fn from_config(config: &ServerConfig) -> Result<Self, UpdateError> {
        let pins = CertificatePins::from_base64(&config.certificate_pins)?;
        let mut transport = Self::new(config.hostname.clone(), config.port, pins)
            .with_timeouts(config.connect_timeout(), config.read_timeout());

        for path in &config.extra_root_certificates {
            transport = transport.with_extra_root_file(path)?;
        }

        Ok(transport)
    }

    /// Trust additional root certificates from PEM data.
    pub fn with_extra_roots(mut self, pem: &[u8]) -> Result<Self, UpdateError> {
        for cert in certificates_from_pem(pem)? {
            self.roots
                .add(cert)
                .map_err(|e| UpdateError::ConfigError(format!("invalid root certificate: {}", e)))?;
        }
        Ok(self)
    }

    /// Trust additional root certificates from a PEM file.
    pub fn with_extra_root_file(self, path: &Path) -> Result<Self, UpdateError> {
        let pem = std::fs::read(path).map_err(|e| {
            UpdateError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        self.with_extra_roots(&pem)
    }

    /// Set connect and read timeouts.
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Connect to `addr` instead of resolving the hostname.
    ///
    /// Certificate checks still use the configured hostname.
    pub fn with_resolved_address(mut self, addr: SocketAddr) -> Self {
        self.resolved_address = Some(addr);
        self
    }

    fn url(&self, path: &str) -> String {
        let separator = if path.starts_with('/') { "" } else { "/" };
        format!("https://{}:{}{}{}", self.hostname, self.port, separator, path)
    }

    /// Build a single-use client. The returned flag reports pin rejections.
    fn client(&self) -> Result<(reqwest::Client, Arc<AtomicBool>), UpdateError> {
        let pin_rejected = Arc::new(AtomicBool::new(false));
        let verifier = PinnedCertVerifier::new(
            Arc::new(self.roots.clone()),
            Arc::clone(&self.provider),
            Arc::clone(&self.pins),
            Arc::clone(&pin_rejected),
        )?;

        let mut tls = ClientConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| UpdateError::ConfigError(format!("TLS configuration: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        tls.resumption = Resumption::disabled();

        let mut builder = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .https_only(true)
            .no_proxy()
            .pool_max_idle_per_host(0)
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .user_agent(format!("dsu-updater/{}", env!("CARGO_PKG_VERSION")));

        if let Some(addr) = self.resolved_address {
            builder = builder.resolve(&self.hostname, addr);
        }

        let client = builder
            .build()
            .map_err(|e| UpdateError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok((client, pin_rejected))
    }

    fn classify(&self, err: reqwest::Error, pin_rejected: &AtomicBool) -> UpdateError {
        if pin_rejected.load(Ordering::SeqCst) {
            return UpdateError::CertificatePinMismatch {
                host: self.hostname.clone(),
            };
        }
        if let Some(status) = err.status() {
            return UpdateError::UnexpectedStatus {
                status: status.as_u16(),
            };
        }
        UpdateError::NetworkError(error_chain(&err))
    }

    async fn stream_to(
        &self,
        response: reqwest::Response,
        part: &Path,
        pin_rejected: &AtomicBool,
    ) -> Result<u64, UpdateError> {
        let mut file = tokio::fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(e, pin_rejected))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl Fetcher for PinnedTransport {
    async fn fetch(&self, path: &str, dest: &Path) -> Result<u64, UpdateError> {
        let url = self.url(path);
        info!(url = %url, dest = %dest.display(), "starting download");

        let (client, pin_rejected) = self.client()?;
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e, &pin_rejected))?;

        let status = response.status();
        debug!(status = status.as_u16(), "received response");
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "unexpected status code");
            return Err(UpdateError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let part = partial_path(dest);
        match self.stream_to(response, &part, &pin_rejected).await {
            Ok(written) => {
                tokio::fs::rename(&part, dest).await?;
                info!(dest = %dest.display(), bytes = written, "download complete");
                Ok(written)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&part).await {
                    debug!(error = %remove_err, "no partial download to remove");
                }
                error!(url = %url, error = %e, "download failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for PinnedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedTransport")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("pins", &self.pins)
            .field("roots", &self.roots.len())
            .finish()
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    struct TestServer {
        addr: SocketAddr,
        cert_pem: String,
        cert_der: Vec<u8>,
    }

    /// Serve every request on a loopback TLS listener with a fixed response.
    async fn spawn_server(status_line: &'static str, body: Vec<u8>) -> TestServer {
        let certified_key = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert_der = certified_key.cert.der().to_vec();
        let cert_pem = certified_key.cert.pem();
        let key_der = certified_key.key_pair.serialize_der();

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(
                vec![CertificateDer::from(cert_der.clone())],
                PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_der)),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(tls));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = Arc::new(body);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let acceptor = acceptor.clone();
                let body = Arc::clone(&body);
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else { return };
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match tls.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status_line,
                        body.len()
                    );
                    let _ = tls.write_all(head.as_bytes()).await;
                    let _ = tls.write_all(&body).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        TestServer {
            addr,
            cert_pem,
            cert_der,
        }
    }

    fn transport_for(server: &TestServer, hostname: &str, pins: CertificatePins) -> PinnedTransport {
        PinnedTransport::new(hostname, server.addr.port(), pins)
            .with_extra_roots(server.cert_pem.as_bytes())
            .unwrap()
            .with_resolved_address(server.addr)
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5))
    }

    fn matching_pins(server: &TestServer) -> CertificatePins {
        CertificatePins::from_base64([spki_pin(&server.cert_der).unwrap()]).unwrap()
    }

    #[test]
    fn test_pins_decode() {
        let pin = STANDARD.encode([7u8; 32]);
        let pins = CertificatePins::from_base64([pin.as_str()]).unwrap();
        assert_eq!(pins.len(), 1);
        assert!(pins.contains(&[7u8; 32]));
        assert!(!pins.contains(&[8u8; 32]));
    }

    #[test]
    fn test_pins_reject_bad_input() {
        assert!(matches!(
            CertificatePins::from_base64(["not base64!"]),
            Err(UpdateError::InvalidPin(_))
        ));
        assert!(matches!(
            CertificatePins::from_base64([STANDARD.encode([1u8; 20])]),
            Err(UpdateError::InvalidPin(_))
        ));
        assert!(matches!(
            CertificatePins::from_base64(Vec::<String>::new()),
            Err(UpdateError::InvalidPin(_))
        ));
    }

    #[test]
    fn test_spki_pin_hashes_public_key_info() {
        let certified_key = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let expected = STANDARD.encode(Sha256::digest(certified_key.key_pair.public_key_der()));
        assert_eq!(spki_pin(certified_key.cert.der()).unwrap(), expected);
    }

    #[test]
    fn test_spki_pin_rejects_garbage() {
        assert!(spki_pin(b"not a certificate").is_err());
    }

    #[test]
    fn test_url_and_partial_path() {
        let pins = CertificatePins::from_base64([STANDARD.encode([0u8; 32])]).unwrap();
        let transport = PinnedTransport::new("updates.example.org", 443, pins);
        assert_eq!(
            transport.url("/desktop/a.json"),
            "https://updates.example.org:443/desktop/a.json"
        );
        assert_eq!(
            transport.url("a.json"),
            "https://updates.example.org:443/a.json"
        );
        assert_eq!(
            partial_path(Path::new("/tmp/x/app.zip")),
            PathBuf::from("/tmp/x/app.zip.part")
        );
    }

    #[tokio::test]
    async fn test_fetch_with_matching_pin() {
        let server = spawn_server("200 OK", b"{\"version\":\"1.0.0\"}\nsig".to_vec()).await;
        let transport = transport_for(&server, "localhost", matching_pins(&server));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("metadata.json");

        let written = transport.fetch("/desktop/metadata.json", &dest).await.unwrap();

        assert_eq!(written, 23);
        assert_eq!(std::fs::read(&dest).unwrap(), b"{\"version\":\"1.0.0\"}\nsig");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_fetch_with_pin_mismatch() {
        let server = spawn_server("200 OK", b"payload".to_vec()).await;
        let wrong = CertificatePins::from_base64([STANDARD.encode([0u8; 32])]).unwrap();
        let transport = transport_for(&server, "localhost", wrong);
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("binary.zip");

        let result = transport.fetch("/binary.zip", &dest).await;

        assert!(
            matches!(result, Err(UpdateError::CertificatePinMismatch { ref host }) if host == "localhost"),
            "unexpected result: {:?}",
            result
        );
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_with_hostname_mismatch() {
        let server = spawn_server("200 OK", b"payload".to_vec()).await;
        let transport = transport_for(&server, "updates.example.org", matching_pins(&server));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("binary.zip");

        let result = transport.fetch("/binary.zip", &dest).await;

        assert!(
            matches!(result, Err(UpdateError::NetworkError(_))),
            "unexpected result: {:?}",
            result
        );
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_unexpected_status() {
        let server = spawn_server("404 Not Found", b"missing".to_vec()).await;
        let transport = transport_for(&server, "localhost", matching_pins(&server));
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("metadata.json");

        let result = transport.fetch("/missing.json", &dest).await;

        assert!(matches!(
            result,
            Err(UpdateError::UnexpectedStatus { status: 404 })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pins = CertificatePins::from_base64([STANDARD.encode([0u8; 32])]).unwrap();
        let transport = PinnedTransport::new("localhost", addr.port(), pins)
            .with_resolved_address(addr)
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(2));
        let dir = TempDir::new().unwrap();

        let result = transport.fetch("/a.json", &dir.path().join("a.json")).await;
        assert!(matches!(result, Err(UpdateError::NetworkError(_))));
    }
}
