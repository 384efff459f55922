//! In-process pipes and back-to-back session pairs.
//!
//! [`pipe`] is lock-step: a write completes only once the reader has consumed
//! every byte of it. Two sessions wired together over bare lock-step pipes can
//! deadlock when both sides write at once and neither is reading, so [`pair`]
//! puts a [`BufferedPipeWriter`] in front of each direction.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker, ready};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use super::session::{IoSession, SessionConfig, from_io_with};

/// Queue depth between a buffered writer and its drain task.
const BUFFER_CAPACITY: usize = 4;

#[derive(Default)]
struct PipeState {
    /// Bytes of the in-flight write not yet read.
    pending: Bytes,
    /// Length of the in-flight write, reported once it has been fully read.
    in_flight: Option<usize>,
    reader_closed: bool,
    writer_closed: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

type SharedPipe = Arc<Mutex<PipeState>>;

fn lock(state: &SharedPipe) -> MutexGuard<'_, PipeState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PipeReader {
    state: SharedPipe,
}

pub struct PipeWriter {
    state: SharedPipe,
}

/// Creates a synchronous in-memory pipe.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let state = SharedPipe::default();
    (
        PipeReader {
            state: Arc::clone(&state),
        },
        PipeWriter { state },
    )
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = lock(&self.state);
        if !state.pending.is_empty() {
            let n = state.pending.len().min(buf.remaining());
            buf.put_slice(&state.pending[..n]);
            state.pending.advance(n);
            if state.pending.is_empty()
                && let Some(waker) = state.write_waker.take()
            {
                waker.wake();
            }
            return Poll::Ready(Ok(()));
        }
        if state.writer_closed {
            return Poll::Ready(Ok(()));
        }
        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.reader_closed = true;
        if let Some(waker) = state.write_waker.take() {
            waker.wake();
        }
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = lock(&self.state);
        if state.reader_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe reader closed",
            )));
        }
        if state.writer_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe writer closed",
            )));
        }
        match state.in_flight {
            Some(n) if state.pending.is_empty() => {
                state.in_flight = None;
                Poll::Ready(Ok(n))
            }
            Some(_) => {
                state.write_waker = Some(cx.waker().clone());
                Poll::Pending
            }
            None if buf.is_empty() => Poll::Ready(Ok(0)),
            None => {
                state.pending = Bytes::copy_from_slice(buf);
                state.in_flight = Some(buf.len());
                state.write_waker = Some(cx.waker().clone());
                if let Some(waker) = state.read_waker.take() {
                    waker.wake();
                }
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = lock(&self.state);
        state.writer_closed = true;
        if let Some(waker) = state.read_waker.take() {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.writer_closed = true;
        if let Some(waker) = state.read_waker.take() {
            waker.wake();
        }
    }
}

/// Decouples writes from the reader's cadence.
///
/// Writes are copied into a bounded queue drained by a background task that
/// performs the actual (possibly blocking) write. A write only waits when the
/// queue is full.
pub struct BufferedPipeWriter {
    tx: PollSender<Bytes>,
}

impl BufferedPipeWriter {
    /// Must be called from within a tokio runtime.
    pub fn new<W>(inner: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_capacity(inner, BUFFER_CAPACITY)
    }

    pub fn with_capacity<W>(mut inner: W, capacity: usize) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Bytes>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = inner.write_all(&chunk).await {
                    tracing::debug!(error = %e, "Buffered pipe write failed");
                    return;
                }
            }
            let _ = inner.shutdown().await;
        });
        Self {
            tx: PollSender::new(tx),
        }
    }
}

impl AsyncWrite for BufferedPipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let closed = || io::Error::new(io::ErrorKind::BrokenPipe, "buffered pipe closed");
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(this.tx.poll_reserve(cx)).map_err(|_| closed())?;
        this.tx
            .send_item(Bytes::copy_from_slice(buf))
            .map_err(|_| closed())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // The drain task finishes queued writes, then shuts the pipe down.
        self.get_mut().tx.close();
        Poll::Ready(Ok(()))
    }
}

/// Two sessions connected back-to-back in memory.
pub fn pair() -> (IoSession, IoSession) {
    pair_with(SessionConfig::default())
}

pub fn pair_with(config: SessionConfig) -> (IoSession, IoSession) {
    let (a_read, b_write) = pipe();
    let (b_read, a_write) = pipe();
    (
        from_io_with(a_read, BufferedPipeWriter::new(a_write), config),
        from_io_with(b_read, BufferedPipeWriter::new(b_write), config),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn write_blocks_until_read() {
        let (mut reader, mut writer) = pipe();
        let write = tokio::spawn(async move {
            writer.write_all(b"hello").await.unwrap();
            writer
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!write.is_finished());

        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hel");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!write.is_finished());

        let mut rest = [0u8; 2];
        reader.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"lo");
        let _writer = write.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_eof() {
        let (mut reader, mut writer) = pipe();
        writer.shutdown().await.unwrap();
        let mut buf = Vec::new();
        assert_eq!(reader.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_after_reader_drop_fails() {
        let (reader, mut writer) = pipe();
        drop(reader);
        let err = writer.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn both_sides_write_without_reading() {
        // With bare lock-step pipes this would hang: each side waits for the
        // other to read its first write.
        let (mut a_read, b_write) = pipe();
        let (mut b_read, a_write) = pipe();
        let mut a = BufferedPipeWriter::new(a_write);
        let mut b = BufferedPipeWriter::new(b_write);

        tokio::time::timeout(Duration::from_secs(5), async {
            a.write_all(b"from a").await.unwrap();
            b.write_all(b"from b").await.unwrap();
        })
        .await
        .unwrap();

        let mut buf = [0u8; 6];
        a_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from b");
        b_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"from a");
    }

    #[tokio::test]
    async fn pair_survives_simultaneous_open() {
        use crate::mux::Session;

        let (a, b) = pair();
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            let (a_open, b_open, a_accept, b_accept) =
                tokio::join!(a.open(), b.open(), a.accept(), b.accept());
            (a_open.is_ok(), b_open.is_ok(), a_accept.is_ok(), b_accept.is_ok())
        })
        .await
        .unwrap();
        assert_eq!(result, (true, true, true, true));
    }
}
