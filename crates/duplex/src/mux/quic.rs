//! QUIC sessions: one bidirectional stream per channel.
//!
//! A QUIC stream only becomes visible to the peer once data is sent on it, so
//! `open` writes a one-byte marker right away and `accept` consumes it before
//! handing out the channel.
//!
//! TLS 1.3 via rustls (ring provider). Both sides advertise [`PROTOCOL`] over
//! ALPN; a mismatch fails the handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{ConnectionError, Endpoint, VarInt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::ToSocketAddrs;

use super::channel::{Channel, ChannelReader, ChannelWriter};
use super::{MuxError, Session};

/// ALPN identifier shared by dialer and listener.
pub const PROTOCOL: &str = "duplex-quic";

/// Application error code sent when a session is closed.
pub const CLOSE_CODE: u32 = 42;

const CLOSE_REASON: &[u8] = b"close connection";

/// Written by the opener as the first byte of every stream.
const OPEN_MARKER: u8 = b'!';

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_err(e: impl std::fmt::Display) -> MuxError {
    MuxError::Tls(e.to_string())
}

fn quic_err(e: impl std::fmt::Display) -> MuxError {
    MuxError::Quic(e.to_string())
}

fn connection_err(e: ConnectionError) -> MuxError {
    match e {
        ConnectionError::ApplicationClosed(_) | ConnectionError::LocallyClosed => {
            MuxError::SessionClosed
        }
        other => quic_err(other),
    }
}

/// Listener certificate and key.
pub struct ServerTls {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ServerTls {
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { cert_chain, key }
    }

    /// Ephemeral key pair and self-signed certificate for `localhost`.
    pub fn self_signed() -> Result<Self, MuxError> {
        let generated =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).map_err(tls_err)?;
        let key = PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der());
        Ok(Self {
            cert_chain: vec![generated.cert.der().clone()],
            key: key.into(),
        })
    }

    /// Leaf certificate, for clients that want to pin it.
    pub fn certificate(&self) -> Option<&CertificateDer<'static>> {
        self.cert_chain.first()
    }

    fn server_config(&self) -> Result<quinn::ServerConfig, MuxError> {
        let mut crypto = rustls::ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(tls_err)?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())
            .map_err(tls_err)?;
        crypto.alpn_protocols = vec![PROTOCOL.as_bytes().to_vec()];
        let crypto = QuicServerConfig::try_from(crypto).map_err(tls_err)?;
        Ok(quinn::ServerConfig::with_crypto(Arc::new(crypto)))
    }
}

/// How a dialer verifies the listener's certificate.
#[derive(Debug)]
pub enum Trust {
    /// Accept any certificate. Only for self-signed test and interop peers.
    Insecure,
    Roots(RootCertStore),
}

impl Trust {
    /// Trusts exactly one certificate.
    pub fn certificate(cert: CertificateDer<'static>) -> Result<Self, MuxError> {
        let mut roots = RootCertStore::empty();
        roots.add(cert).map_err(tls_err)?;
        Ok(Trust::Roots(roots))
    }
}

#[derive(Debug, Clone)]
pub struct QuicClientOptions {
    /// ALPN identifier to offer.
    pub protocol: String,
    /// Local address; defaults to an ephemeral port on the target's family.
    pub bind_addr: Option<SocketAddr>,
}

impl Default for QuicClientOptions {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            bind_addr: None,
        }
    }
}

impl QuicClientOptions {
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }
}

pub async fn dial(
    addr: impl ToSocketAddrs,
    server_name: &str,
    trust: Trust,
) -> Result<QuicSession, MuxError> {
    dial_with(addr, server_name, trust, QuicClientOptions::default()).await
}

pub async fn dial_with(
    addr: impl ToSocketAddrs,
    server_name: &str,
    trust: Trust,
    options: QuicClientOptions,
) -> Result<QuicSession, MuxError> {
    let remote = tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| MuxError::Transport("address resolved to nothing".to_string()))?;

    let builder = rustls::ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_err)?;
    let mut crypto = match trust {
        Trust::Insecure => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider())))
            .with_no_client_auth(),
        Trust::Roots(roots) => builder.with_root_certificates(roots).with_no_client_auth(),
    };
    crypto.alpn_protocols = vec![options.protocol.into_bytes()];
    let crypto = QuicClientConfig::try_from(crypto).map_err(tls_err)?;

    let bind = options.bind_addr.unwrap_or_else(|| {
        if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        }
    });
    let mut endpoint = Endpoint::client(bind)?;
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

    tracing::debug!(transport = "quic", %remote, server_name, "Connecting");
    let conn = endpoint
        .connect(remote, server_name)
        .map_err(quic_err)?
        .await
        .map_err(quic_err)?;
    Ok(QuicSession {
        conn,
        endpoint,
        dialed: true,
    })
}

/// Accepts QUIC connections, one session each.
pub struct QuicListener {
    endpoint: Endpoint,
}

impl QuicListener {
    pub fn bind(addr: SocketAddr, tls: ServerTls) -> Result<Self, MuxError> {
        let endpoint = Endpoint::server(tls.server_config()?, addr)?;
        tracing::debug!(transport = "quic", addr = ?endpoint.local_addr().ok(), "Listening");
        Ok(Self { endpoint })
    }

    /// Next successfully handshaken connection. Failed handshakes are logged and
    /// skipped; returns [`MuxError::SessionClosed`] once the listener is closed.
    pub async fn accept(&self) -> Result<QuicSession, MuxError> {
        loop {
            let incoming = self.endpoint.accept().await.ok_or(MuxError::SessionClosed)?;
            let remote = incoming.remote_address();
            match incoming.await {
                Ok(conn) => {
                    tracing::debug!(transport = "quic", %remote, "Accepted connection");
                    return Ok(QuicSession {
                        conn,
                        endpoint: self.endpoint.clone(),
                        dialed: false,
                    });
                }
                Err(e) => {
                    tracing::warn!(transport = "quic", %remote, error = %e, "Handshake failed");
                }
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MuxError> {
        Ok(self.endpoint.local_addr()?)
    }

    pub fn close(&self) {
        self.endpoint.close(VarInt::from_u32(CLOSE_CODE), CLOSE_REASON);
    }
}

/// Session over one QUIC connection.
pub struct QuicSession {
    conn: quinn::Connection,
    /// Kept so the endpoint outlives a dropped listener or dialer.
    endpoint: Endpoint,
    /// The endpoint belongs to this session alone and can be drained on close.
    dialed: bool,
}

impl QuicSession {
    pub fn remote_address(&self) -> SocketAddr {
        self.conn.remote_address()
    }
}

#[async_trait]
impl Session for QuicSession {
    async fn open(&self) -> Result<Channel, MuxError> {
        let (mut send, recv) = self.conn.open_bi().await.map_err(connection_err)?;
        send.write_all(&[OPEN_MARKER]).await.map_err(quic_err)?;
        let id = send.id().index();
        tracing::debug!(channel = id, "Opened stream");
        Ok(Channel::new(
            id,
            ChannelReader::new(recv),
            ChannelWriter::new(send),
        ))
    }

    async fn accept(&self) -> Result<Channel, MuxError> {
        let (send, mut recv) = self.conn.accept_bi().await.map_err(connection_err)?;
        let mut marker = [0u8; 1];
        recv.read_exact(&mut marker)
            .await
            .map_err(|e| MuxError::Protocol(format!("stream handshake: {e}")))?;
        if marker[0] != OPEN_MARKER {
            return Err(MuxError::Protocol(format!(
                "unexpected stream marker {:#04x}",
                marker[0]
            )));
        }
        let id = recv.id().index();
        tracing::debug!(channel = id, "Accepted stream");
        Ok(Channel::new(
            id,
            ChannelReader::new(recv),
            ChannelWriter::new(send),
        ))
    }

    async fn close(&self) -> Result<(), MuxError> {
        self.conn.close(VarInt::from_u32(CLOSE_CODE), CLOSE_REASON);
        if self.dialed {
            self.endpoint.wait_idle().await;
        }
        Ok(())
    }

    async fn wait(&self) -> Result<(), MuxError> {
        match connection_err(self.conn.closed().await) {
            MuxError::SessionClosed => Ok(()),
            other => Err(other),
        }
    }
}

#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn stream_roundtrip_with_pinned_certificate() {
        let tls = ServerTls::self_signed().unwrap();
        let trust = Trust::certificate(tls.certificate().unwrap().clone()).unwrap();
        let listener = QuicListener::bind(loopback(), tls).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            let mut ch = session.accept().await.unwrap();
            let mut buf = Vec::new();
            ch.read_to_end(&mut buf).await.unwrap();
            ch.write_all(&buf).await.unwrap();
            ch.close_write().await.unwrap();
            session.wait().await
        });

        let session = dial(addr, "localhost", trust).await.unwrap();
        let mut ch = session.open().await.unwrap();
        ch.write_all(b"quic").await.unwrap();
        ch.close_write().await.unwrap();
        let mut buf = Vec::new();
        ch.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"quic");

        session.close().await.unwrap();
        let server_end = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(server_end.is_ok());
    }

    #[tokio::test]
    async fn alpn_mismatch_fails_handshake() {
        let listener = QuicListener::bind(loopback(), ServerTls::self_signed().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let _accepting = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let options = QuicClientOptions::default().with_protocol("something-else");
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            dial_with(addr, "localhost", Trust::Insecure, options),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(MuxError::Quic(_))));
    }

    #[tokio::test]
    async fn close_ends_accept_on_peer() {
        let listener = QuicListener::bind(loopback(), ServerTls::self_signed().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            session.accept().await.map(|_| ())
        });

        let session = dial(addr, "localhost", Trust::Insecure).await.unwrap();
        session.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(MuxError::SessionClosed)));
    }
}
