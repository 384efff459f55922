//! Byte-stream transports for [`IoSession`]: process stdio, TCP and Unix sockets.

use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tokio::net::ToSocketAddrs;

use super::session::{IoSession, SessionConfig, from_io_with};

/// Session over this process's stdin/stdout.
///
/// Nothing else may write to stdout while the session is live; log to stderr.
pub fn dial_stdio() -> IoSession {
    tracing::debug!(transport = "stdio", "Starting session");
    from_io_with(tokio::io::stdin(), tokio::io::stdout(), SessionConfig::default())
}

pub async fn dial_tcp(addr: impl ToSocketAddrs) -> io::Result<IoSession> {
    let stream = tokio::net::TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::debug!(transport = "tcp", peer = ?stream.peer_addr().ok(), "Connected");
    let (reader, writer) = stream.into_split();
    Ok(from_io_with(reader, writer, SessionConfig::default()))
}

pub async fn listen_tcp(addr: impl ToSocketAddrs) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Accepts TCP connections, one session each.
pub struct TcpListener {
    inner: tokio::net::TcpListener,
    config: SessionConfig,
}

impl TcpListener {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        tracing::debug!(transport = "tcp", addr = ?inner.local_addr().ok(), "Listening");
        Ok(Self {
            inner,
            config: SessionConfig::default(),
        })
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn accept(&self) -> io::Result<IoSession> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        tracing::debug!(transport = "tcp", %peer, "Accepted connection");
        let (reader, writer) = stream.into_split();
        Ok(from_io_with(reader, writer, self.config))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(unix)]
pub async fn dial_unix(path: impl AsRef<Path>) -> io::Result<IoSession> {
    let path = path.as_ref();
    tracing::trace!(transport = "unix", path = %path.display(), "Connecting to socket");
    let stream = tokio::net::UnixStream::connect(path).await?;
    let (reader, writer) = stream.into_split();
    Ok(from_io_with(reader, writer, SessionConfig::default()))
}

#[cfg(unix)]
pub fn listen_unix(path: impl AsRef<Path>) -> io::Result<UnixListener> {
    UnixListener::bind(path)
}

/// Unix domain socket listener. Removes its socket file on drop.
#[cfg(unix)]
pub struct UnixListener {
    inner: tokio::net::UnixListener,
    path: PathBuf,
    config: SessionConfig,
}

#[cfg(unix)]
impl UnixListener {
    /// Binds `path`, replacing a stale socket file left by a previous run.
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let inner = tokio::net::UnixListener::bind(&path)?;
        tracing::debug!(transport = "unix", path = %path.display(), "Bound socket");
        Ok(Self {
            inner,
            path,
            config: SessionConfig::default(),
        })
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn accept(&self) -> io::Result<IoSession> {
        let (stream, _) = self.inner.accept().await?;
        tracing::trace!(transport = "unix", path = %self.path.display(), "Client connected");
        let (reader, writer) = stream.into_split();
        Ok(from_io_with(reader, writer, self.config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Drop for UnixListener {
    fn drop(&mut self) {
        if self.path.exists()
            && let Err(e) = std::fs::remove_file(&self.path)
        {
            tracing::warn!(error = %e, path = %self.path.display(), "Failed to remove socket file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::Session;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn tcp_loopback() {
        let listener = listen_tcp("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            let mut ch = session.accept().await.unwrap();
            let mut buf = Vec::new();
            ch.read_to_end(&mut buf).await.unwrap();
            ch.write_all(&buf).await.unwrap();
            ch.close_write().await.unwrap();
            session
        });

        let session = dial_tcp(addr).await.unwrap();
        let mut ch = session.open().await.unwrap();
        ch.write_all(b"over tcp").await.unwrap();
        ch.close_write().await.unwrap();
        let mut buf = Vec::new();
        ch.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"over tcp");
        server.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_listener_cleans_up_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duplex.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = listen_unix(&path).unwrap();
        let accept = tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            (listener, session)
        });
        let _client = dial_unix(&path).await.unwrap();
        let (listener, _session) = accept.await.unwrap();

        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }
}
