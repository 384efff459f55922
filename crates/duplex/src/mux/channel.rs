use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Read half of a [`Channel`].
pub struct ChannelReader(Pin<Box<dyn AsyncRead + Send>>);

/// Write half of a [`Channel`]. Shutting it down half-closes the channel.
pub struct ChannelWriter(Pin<Box<dyn AsyncWrite + Send>>);

impl ChannelReader {
    pub fn new(inner: impl AsyncRead + Send + 'static) -> Self {
        Self(Box::pin(inner))
    }
}

impl ChannelWriter {
    pub fn new(inner: impl AsyncWrite + Send + 'static) -> Self {
        Self(Box::pin(inner))
    }
}

impl fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelReader")
    }
}

impl fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelWriter")
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.0.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.0.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.0.as_mut().poll_shutdown(cx)
    }
}

/// One bidirectional logical stream within a session.
///
/// The write half can be closed on its own while replies are still read.
/// The channel is released once both halves are dropped.
#[derive(Debug)]
pub struct Channel {
    id: u64,
    reader: ChannelReader,
    writer: ChannelWriter,
}

impl Channel {
    pub fn new(id: u64, reader: ChannelReader, writer: ChannelWriter) -> Self {
        Self { id, reader, writer }
    }

    /// Session-scoped identifier, unique per side.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn into_split(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }

    pub fn split_mut(&mut self) -> (&mut ChannelReader, &mut ChannelWriter) {
        (&mut self.reader, &mut self.writer)
    }

    /// Signals "no more data" to the remote while keeping the read half open.
    pub async fn close_write(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }

    /// Half-closes and releases the channel.
    pub async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

impl AsyncRead for Channel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for Channel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}
