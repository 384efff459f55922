//! Frame multiplexer over an ordered byte stream.
//!
//! Two tasks run per session:
//! - the demux loop reads frames and routes them to channels. It never writes
//!   to the transport and never blocks on a channel, so one slow channel cannot
//!   stall the others
//! - the writer task owns the transport write half; every outgoing frame is
//!   queued to it
//!
//! Flow control is credit based: a channel writer may only send as many bytes
//! as the remote has granted, and a reader returns credit once it has consumed
//! half of its window.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::{CancellationToken, PollSemaphore};

use super::channel::{Channel, ChannelReader, ChannelWriter};
use super::frame::{Frame, FrameCodec};
use super::{MuxError, Session};

/// Tuning for the byte-stream multiplexer.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Bytes a remote may send on one channel before waiting for credit.
    pub window_size: u32,
    /// Largest data frame payload this side accepts.
    pub max_packet_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            window_size: 1024 * 1024,
            max_packet_size: 32 * 1024,
        }
    }

    pub fn with_window_size(mut self, bytes: u32) -> Self {
        self.window_size = bytes.max(2);
        self
    }

    pub fn with_max_packet_size(mut self, bytes: u32) -> Self {
        self.max_packet_size = bytes.max(1);
        self
    }

    /// Packet size actually advertised: never more than half the window, so a
    /// reader can return credit while the writer still has some left.
    pub fn effective_max_packet(&self) -> u32 {
        self.max_packet_size.min(self.window_size / 2).max(1)
    }
}

type Inbound = mpsc::UnboundedSender<io::Result<Bytes>>;

enum Slot {
    /// Locally opened, waiting for the remote's confirm.
    Pending(oneshot::Sender<Result<Opened, MuxError>>),
    Open(Route),
}

struct Route {
    remote: u32,
    /// `None` once the remote has sent Eof.
    inbound: Option<Inbound>,
    credit: Arc<Semaphore>,
}

/// Everything needed to build a local channel once both ids are known.
struct Opened {
    local: u32,
    remote: u32,
    remote_window: u32,
    remote_max_packet: u32,
    inbound: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    credit: Arc<Semaphore>,
}

struct Shared {
    config: SessionConfig,
    outbound: mpsc::UnboundedSender<Frame>,
    routes: Mutex<HashMap<u32, Slot>>,
    next_id: AtomicU32,
    closed: CancellationToken,
    /// Cancelled once the writer task has flushed and shut down the transport.
    flushed: CancellationToken,
    error: Mutex<Option<String>>,
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, HashMap<u32, Slot>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, frame: Frame) -> Result<(), MuxError> {
        if self.closed.is_cancelled() {
            return Err(MuxError::SessionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| MuxError::SessionClosed)
    }

    fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Ends the session: fails pending opens, aborts blocked reads and stops
    /// both tasks. Idempotent; the first error recorded wins.
    fn terminate(&self, error: Option<String>) {
        if let Some(e) = error {
            let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                tracing::warn!(error = %e, "Session transport failed");
                *slot = Some(e);
            }
        }

        let routes = {
            let mut routes = self.routes();
            // Cancel under the lock so no open() can register after the drain.
            self.closed.cancel();
            std::mem::take(&mut *routes)
        };

        for (id, slot) in routes {
            match slot {
                Slot::Pending(tx) => {
                    let _ = tx.send(Err(MuxError::SessionClosed));
                }
                Slot::Open(route) => {
                    if let Some(inbound) = route.inbound {
                        tracing::trace!(channel = id, "Aborting channel on session close");
                        let _ = inbound.send(Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "session closed",
                        )));
                    }
                    route.credit.close();
                }
            }
        }
    }

    fn channel(self: &Arc<Self>, opened: Opened) -> Channel {
        let link = Arc::new(Link {
            session: Arc::clone(self),
            local: opened.local,
            remote: opened.remote,
        });
        let packet = opened
            .remote_max_packet
            .min(opened.remote_window / 2)
            .max(1);
        let reader = MuxReader {
            link: Arc::clone(&link),
            inbound: opened.inbound,
            pending: Bytes::new(),
            consumed: 0,
            threshold: (self.config.window_size / 2).max(1),
        };
        let writer = MuxWriter {
            link,
            credit: PollSemaphore::new(opened.credit),
            packet,
            shutdown: false,
        };
        Channel::new(
            u64::from(opened.local),
            ChannelReader::new(reader),
            ChannelWriter::new(writer),
        )
    }

    /// Routes one inbound frame. Never blocks.
    fn dispatch(&self, frame: Frame, accept_tx: &mpsc::UnboundedSender<Opened>) {
        match frame {
            Frame::Open {
                sender,
                window,
                max_packet,
            } => {
                let local = self.allocate_id();
                let (tx, rx) = mpsc::unbounded_channel();
                let credit = Arc::new(Semaphore::new(window as usize));
                self.routes().insert(
                    local,
                    Slot::Open(Route {
                        remote: sender,
                        inbound: Some(tx),
                        credit: Arc::clone(&credit),
                    }),
                );
                let incoming = Opened {
                    local,
                    remote: sender,
                    remote_window: window,
                    remote_max_packet: max_packet,
                    inbound: rx,
                    credit,
                };
                if accept_tx.send(incoming).is_err() {
                    self.routes().remove(&local);
                    let _ = self.send(Frame::OpenFailure { recipient: sender });
                }
            }
            Frame::OpenConfirm {
                recipient,
                sender,
                window,
                max_packet,
            } => {
                let mut routes = self.routes();
                let Some(Slot::Pending(waiter)) = routes.remove(&recipient) else {
                    tracing::warn!(channel = recipient, "Confirm for unknown channel");
                    return;
                };
                let (tx, rx) = mpsc::unbounded_channel();
                let credit = Arc::new(Semaphore::new(window as usize));
                routes.insert(
                    recipient,
                    Slot::Open(Route {
                        remote: sender,
                        inbound: Some(tx),
                        credit: Arc::clone(&credit),
                    }),
                );
                drop(routes);

                let opened = Opened {
                    local: recipient,
                    remote: sender,
                    remote_window: window,
                    remote_max_packet: max_packet,
                    inbound: rx,
                    credit,
                };
                if waiter.send(Ok(opened)).is_err() {
                    // Opener gave up while the handshake was in flight.
                    tracing::debug!(channel = recipient, "Open abandoned, closing");
                    self.routes().remove(&recipient);
                    let _ = self.send(Frame::Close { recipient: sender });
                }
            }
            Frame::OpenFailure { recipient } => {
                if let Some(Slot::Pending(waiter)) = self.routes().remove(&recipient) {
                    let _ = waiter.send(Err(MuxError::OpenRejected));
                }
            }
            Frame::WindowAdjust { recipient, bytes } => {
                if let Some(Slot::Open(route)) = self.routes().get(&recipient) {
                    route.credit.add_permits(bytes as usize);
                }
            }
            Frame::Data { recipient, payload } => {
                let routes = self.routes();
                let Some(Slot::Open(route)) = routes.get(&recipient) else {
                    tracing::trace!(channel = recipient, "Data for closed channel dropped");
                    return;
                };
                let Some(inbound) = &route.inbound else {
                    tracing::warn!(channel = recipient, "Data after eof dropped");
                    return;
                };
                let len = payload.len() as u32;
                if inbound.send(Ok(payload)).is_err() {
                    // Reader is gone; hand the credit straight back so the
                    // remote writer does not stall.
                    let remote = route.remote;
                    drop(routes);
                    let _ = self.send(Frame::WindowAdjust {
                        recipient: remote,
                        bytes: len,
                    });
                }
            }
            Frame::Eof { recipient } => {
                if let Some(Slot::Open(route)) = self.routes().get_mut(&recipient) {
                    tracing::trace!(channel = recipient, "Remote closed write");
                    route.inbound = None;
                }
            }
            Frame::Close { recipient } => {
                if let Some(Slot::Open(route)) = self.routes().remove(&recipient) {
                    tracing::debug!(channel = recipient, "Remote closed channel");
                    route.credit.close();
                }
            }
        }
    }
}

/// Shared by both halves of a channel; dropping the last one releases it.
struct Link {
    session: Arc<Shared>,
    local: u32,
    remote: u32,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.session.routes().remove(&self.local);
        tracing::trace!(channel = self.local, "Releasing channel");
        let _ = self.session.send(Frame::Close {
            recipient: self.remote,
        });
    }
}

struct MuxReader {
    link: Arc<Link>,
    inbound: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    pending: Bytes,
    consumed: u32,
    threshold: u32,
}

impl AsyncRead for MuxReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                this.consumed += n as u32;
                if this.consumed >= this.threshold {
                    let bytes = std::mem::take(&mut this.consumed);
                    let _ = this.link.session.send(Frame::WindowAdjust {
                        recipient: this.link.remote,
                        bytes,
                    });
                }
                return Poll::Ready(Ok(()));
            }
            match ready!(this.inbound.poll_recv(cx)) {
                Some(Ok(chunk)) => this.pending = chunk,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl Drop for MuxReader {
    fn drop(&mut self) {
        // Credit for bytes nobody will read goes back to the remote, or a
        // writer that is still open stalls once the window is spent.
        self.inbound.close();
        let mut unread = self.consumed as usize + self.pending.len();
        while let Ok(chunk) = self.inbound.try_recv() {
            if let Ok(chunk) = chunk {
                unread += chunk.len();
            }
        }
        if unread > 0 {
            tracing::trace!(channel = self.link.local, bytes = unread, "Returning unread credit");
            let _ = self.link.session.send(Frame::WindowAdjust {
                recipient: self.link.remote,
                bytes: unread as u32,
            });
        }
    }
}

struct MuxWriter {
    link: Arc<Link>,
    credit: PollSemaphore,
    packet: u32,
    shutdown: bool,
}

impl AsyncWrite for MuxWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.shutdown {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "channel write half closed",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let want = buf.len().min(this.packet as usize) as u32;
        let Some(permit) = ready!(this.credit.poll_acquire_many(cx, want)) else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "channel closed by remote",
            )));
        };
        permit.forget();

        let frame = Frame::Data {
            recipient: this.link.remote,
            payload: Bytes::copy_from_slice(&buf[..want as usize]),
        };
        if this.link.session.send(frame).is_err() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "session closed",
            )));
        }
        Poll::Ready(Ok(want as usize))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Frames are handed to the writer task as soon as they are produced.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.shutdown {
            this.shutdown = true;
            tracing::trace!(channel = this.link.local, "Closing write");
            let _ = this.link.session.send(Frame::Eof {
                recipient: this.link.remote,
            });
        }
        Poll::Ready(Ok(()))
    }
}

/// Session multiplexing channels over a single byte stream.
pub struct IoSession {
    shared: Arc<Shared>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Opened>>,
}

/// Starts a session over a reader/writer pair with default settings.
///
/// Must be called from within a tokio runtime.
pub fn from_io<R, W>(reader: R, writer: W) -> IoSession
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    from_io_with(reader, writer, SessionConfig::default())
}

pub fn from_io_with<R, W>(reader: R, writer: W, config: SessionConfig) -> IoSession
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let config = SessionConfig {
        max_packet_size: config.effective_max_packet(),
        ..config
    };
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        config,
        outbound,
        routes: Mutex::new(HashMap::new()),
        next_id: AtomicU32::new(1),
        closed: CancellationToken::new(),
        flushed: CancellationToken::new(),
        error: Mutex::new(None),
    });

    tokio::spawn(demux_loop(
        Arc::clone(&shared),
        FramedRead::new(reader, FrameCodec),
        accept_tx,
    ));
    tokio::spawn(write_loop(
        Arc::clone(&shared),
        outbound_rx,
        FramedWrite::new(writer, FrameCodec),
    ));

    IoSession {
        shared,
        incoming: tokio::sync::Mutex::new(accept_rx),
    }
}

async fn demux_loop<R>(
    shared: Arc<Shared>,
    mut frames: FramedRead<R, FrameCodec>,
    accept_tx: mpsc::UnboundedSender<Opened>,
) where
    R: AsyncRead + Unpin,
{
    let error = loop {
        tokio::select! {
            biased;
            _ = shared.closed.cancelled() => break None,
            frame = frames.next() => match frame {
                Some(Ok(frame)) => shared.dispatch(frame, &accept_tx),
                Some(Err(e)) => break Some(e.to_string()),
                None => {
                    tracing::debug!("Transport reached end of stream");
                    break None;
                }
            },
        }
    };
    shared.terminate(error);
}

async fn write_loop<W>(
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut sink: FramedWrite<W, FrameCodec>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_batch(&mut sink, frame, &mut outbound).await {
                    shared.terminate(Some(e.to_string()));
                    break;
                }
            }
            _ = shared.closed.cancelled() => {
                // Drain what was queued before the close, e.g. final Close frames.
                while let Ok(frame) = outbound.try_recv() {
                    if sink.feed(frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Transport shutdown failed");
    }
    shared.flushed.cancel();
}

/// Writes one frame plus whatever else is already queued, then flushes once.
async fn write_batch<W: AsyncWrite + Unpin>(
    sink: &mut FramedWrite<W, FrameCodec>,
    first: Frame,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
) -> io::Result<()> {
    sink.feed(first).await?;
    while let Ok(frame) = outbound.try_recv() {
        sink.feed(frame).await?;
    }
    sink.flush().await
}

impl IoSession {
    pub fn config(&self) -> SessionConfig {
        self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }
}

#[async_trait]
impl Session for IoSession {
    async fn open(&self) -> Result<Channel, MuxError> {
        let local = self.shared.allocate_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut routes = self.shared.routes();
            if self.shared.closed.is_cancelled() {
                return Err(MuxError::SessionClosed);
            }
            routes.insert(local, Slot::Pending(tx));
        }
        tracing::debug!(channel = local, "Opening channel");
        self.shared.send(Frame::Open {
            sender: local,
            window: self.shared.config.window_size,
            max_packet: self.shared.config.max_packet_size,
        })?;

        let opened = rx.await.map_err(|_| MuxError::SessionClosed)??;
        Ok(self.shared.channel(opened))
    }

    async fn accept(&self) -> Result<Channel, MuxError> {
        let mut incoming = self.incoming.lock().await;
        let opened = tokio::select! {
            biased;
            _ = self.shared.closed.cancelled() => return Err(MuxError::SessionClosed),
            opened = incoming.recv() => opened.ok_or(MuxError::SessionClosed)?,
        };
        tracing::debug!(channel = opened.local, remote = opened.remote, "Accepted channel");
        self.shared.send(Frame::OpenConfirm {
            recipient: opened.remote,
            sender: opened.local,
            window: self.shared.config.window_size,
            max_packet: self.shared.config.max_packet_size,
        })?;
        Ok(self.shared.channel(opened))
    }

    async fn close(&self) -> Result<(), MuxError> {
        self.shared.terminate(None);
        self.shared.flushed.cancelled().await;
        Ok(())
    }

    async fn wait(&self) -> Result<(), MuxError> {
        self.shared.closed.cancelled().await;
        let error = self
            .shared
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match error {
            Some(e) => Err(MuxError::Transport(e)),
            None => Ok(()),
        }
    }
}

impl Drop for IoSession {
    fn drop(&mut self) {
        self.shared.terminate(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn connected(config: SessionConfig) -> (IoSession, IoSession) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            from_io_with(ar, aw, config),
            from_io_with(br, bw, config),
        )
    }

    #[test]
    fn packet_is_clamped_to_half_window() {
        let config = SessionConfig::new()
            .with_window_size(1024)
            .with_max_packet_size(4096);
        assert_eq!(config.effective_max_packet(), 512);
        assert_eq!(SessionConfig::default().effective_max_packet(), 32 * 1024);
    }

    #[tokio::test]
    async fn open_accept_and_exchange() {
        let (a, b) = connected(SessionConfig::default());

        let server = tokio::spawn(async move {
            let mut ch = b.accept().await.unwrap();
            let mut buf = Vec::new();
            ch.read_to_end(&mut buf).await.unwrap();
            ch.write_all(&buf).await.unwrap();
            ch.close_write().await.unwrap();
            b
        });

        let mut ch = a.open().await.unwrap();
        ch.write_all(b"ping").await.unwrap();
        ch.close_write().await.unwrap();
        let mut reply = Vec::new();
        ch.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn small_window_still_moves_large_payloads() {
        let config = SessionConfig::new()
            .with_window_size(64)
            .with_max_packet_size(16);
        let (a, b) = connected(config);
        let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let expected = payload.clone();

        let server = tokio::spawn(async move {
            let mut ch = b.accept().await.unwrap();
            let mut buf = Vec::new();
            ch.read_to_end(&mut buf).await.unwrap();
            (buf, b)
        });

        let mut ch = a.open().await.unwrap();
        ch.write_all(&payload).await.unwrap();
        ch.close_write().await.unwrap();

        let (received, _b) = server.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let (a, b) = connected(SessionConfig::new().with_window_size(32));

        let (stalled, _stalled_remote) = tokio::join!(a.open(), b.accept());
        let mut stalled = stalled.unwrap();
        // Fill the window of the first channel; nobody reads it.
        stalled.write_all(&[0u8; 32]).await.unwrap();

        let (other, other_remote) = tokio::join!(a.open(), b.accept());
        let (mut other, mut other_remote) = (other.unwrap(), other_remote.unwrap());
        other.write_all(b"through").await.unwrap();
        other.close_write().await.unwrap();

        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), other_remote.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf, b"through");
    }

    #[tokio::test]
    async fn close_unblocks_accept_and_open() {
        let (a, b) = connected(SessionConfig::default());
        let accepting = tokio::spawn(async move { b.accept().await.map(|_| ()) });

        a.close().await.unwrap();
        assert!(matches!(a.open().await, Err(MuxError::SessionClosed)));
        assert!(matches!(a.accept().await, Err(MuxError::SessionClosed)));

        let result = tokio::time::timeout(Duration::from_secs(5), accepting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(MuxError::SessionClosed)));
    }

    #[tokio::test]
    async fn remote_close_aborts_blocked_reads() {
        let (a, b) = connected(SessionConfig::default());
        let opener = tokio::spawn(async move {
            let ch = a.open().await.unwrap();
            (ch, a)
        });
        let _remote = b.accept().await.unwrap();
        let (mut ch, _a) = opener.await.unwrap();

        drop(b);
        let mut buf = [0u8; 8];
        let err = ch.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn dropped_reader_does_not_stall_remote_writer() {
        let (a, b) = connected(SessionConfig::new().with_window_size(64));
        let server = tokio::spawn(async move {
            let ch = b.accept().await.unwrap();
            let (reader, _writer) = ch.into_split();
            drop(reader);
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let mut ch = a.open().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), ch.write_all(&[7u8; 4096]))
            .await
            .unwrap()
            .unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn dropped_reader_returns_queued_credit() {
        let (a, b) = connected(SessionConfig::new().with_window_size(64));
        let (ch, remote) = tokio::join!(a.open(), b.accept());
        let mut ch = ch.unwrap();
        let (remote_reader, _remote_writer) = remote.unwrap().into_split();

        ch.write_all(&[1u8; 64]).await.unwrap();
        // Let the window's worth of data land in the remote's queue unread.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(remote_reader);

        tokio::time::timeout(Duration::from_secs(5), ch.write_all(&[2u8; 256]))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_open_is_closed_on_confirm() {
        let (a, b) = connected(SessionConfig::default());

        // Nobody accepts yet, so the open gives up.
        let abandoned = tokio::time::timeout(Duration::from_millis(10), a.open()).await;
        assert!(abandoned.is_err());

        // The late confirm finds the opener gone; the remote end sees eof.
        let mut orphan = b.accept().await.unwrap();
        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), orphan.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        // Both sessions keep working, in both directions.
        for (opener, acceptor) in [(&a, &b), (&b, &a)] {
            let (ch, remote) = tokio::join!(opener.open(), acceptor.accept());
            let (mut ch, mut remote) = (ch.unwrap(), remote.unwrap());
            ch.write_all(b"still open").await.unwrap();
            ch.close_write().await.unwrap();
            let mut got = Vec::new();
            remote.read_to_end(&mut got).await.unwrap();
            assert_eq!(got, b"still open");
        }
    }

    #[tokio::test]
    async fn wait_reports_clean_shutdown() {
        let (a, b) = connected(SessionConfig::default());
        let waiter = tokio::spawn(async move { b.wait().await });
        a.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
