//! Session/channel multiplexing.
//!
//! A [`Session`] turns one transport connection into many independent
//! [`Channel`]s. Two families of session exist:
//!
//! - [`IoSession`]: frame multiplexer over any ordered byte stream (stdio, TCP,
//!   Unix sockets, in-process pipes)
//! - [`quic::QuicSession`]: one QUIC stream per channel

mod channel;
mod frame;
mod pipe;
mod session;
mod transport;

#[cfg(feature = "quic")]
pub mod quic;

use std::io;

use async_trait::async_trait;
use thiserror::Error;

pub use channel::{Channel, ChannelReader, ChannelWriter};
pub use frame::{Frame, FrameCodec};
pub use pipe::{BufferedPipeWriter, PipeReader, PipeWriter, pair, pair_with, pipe};
pub use session::{IoSession, SessionConfig, from_io, from_io_with};
pub use transport::{TcpListener, dial_stdio, dial_tcp, listen_tcp};
#[cfg(unix)]
pub use transport::{UnixListener, dial_unix, listen_unix};

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("session closed")]
    SessionClosed,

    #[error("channel open rejected by remote")]
    OpenRejected,

    #[error("transport: {0}")]
    Transport(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[cfg(feature = "quic")]
    #[error("quic: {0}")]
    Quic(String),

    #[cfg(feature = "quic")]
    #[error("tls: {0}")]
    Tls(String),
}

impl MuxError {
    /// True when the session ended, as opposed to a failed operation on a live session.
    pub fn is_closed(&self) -> bool {
        matches!(self, MuxError::SessionClosed)
    }
}

/// A multiplexed connection producing and accepting channels.
///
/// `open` has no timeout of its own; dropping the future abandons the
/// handshake, so callers bound it with `tokio::time::timeout` or `select!`.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Opens a channel and waits for the remote to acknowledge it.
    async fn open(&self) -> Result<Channel, MuxError>;

    /// Waits for the remote to open a channel. Returns
    /// [`MuxError::SessionClosed`] once the transport has ended.
    async fn accept(&self) -> Result<Channel, MuxError>;

    /// Ends the session, failing pending `open`/`accept` calls.
    async fn close(&self) -> Result<(), MuxError>;

    /// Waits for the session to end. Returns the transport failure, if any.
    async fn wait(&self) -> Result<(), MuxError>;
}

#[async_trait]
impl<S: Session + ?Sized> Session for std::sync::Arc<S> {
    async fn open(&self) -> Result<Channel, MuxError> {
        (**self).open().await
    }

    async fn accept(&self) -> Result<Channel, MuxError> {
        (**self).accept().await
    }

    async fn close(&self) -> Result<(), MuxError> {
        (**self).close().await
    }

    async fn wait(&self) -> Result<(), MuxError> {
        (**self).wait().await
    }
}
