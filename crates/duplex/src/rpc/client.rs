use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::error::CallError;
use super::protocol::{CallHeader, ResponseHeader};
use crate::codec::{SharedCodec, ValueReader, ValueWriter};
use crate::mux::{ChannelReader, ChannelWriter, Session};

/// Issues calls over a session, one channel per call.
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Client {
    session: Arc<dyn Session>,
    codec: SharedCodec,
    timeout: Option<Duration>,
}

impl Client {
    pub fn new(session: Arc<dyn Session>, codec: SharedCodec) -> Self {
        Self {
            session,
            codec,
            timeout: None,
        }
    }

    /// Deadline covering channel open, request and the initial reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn codec(&self) -> &SharedCodec {
        &self.codec
    }

    /// Calls `selector` and discards the reply value.
    ///
    /// The returned [`Response`] keeps the channel, so the caller can go on
    /// streaming values or bytes in either direction.
    pub async fn call<P>(&self, selector: &str, params: &P) -> Result<Response, CallError>
    where
        P: Serialize + ?Sized,
    {
        let (_, response) = self.call_value(selector, params).await?;
        Ok(response)
    }

    /// Calls `selector` and decodes the reply into `R`.
    pub async fn call_into<R, P>(&self, selector: &str, params: &P) -> Result<(R, Response), CallError>
    where
        R: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let (reply, response) = self.call_value(selector, params).await?;
        Ok((serde_json::from_value(reply)?, response))
    }

    pub async fn call_value<P>(
        &self,
        selector: &str,
        params: &P,
    ) -> Result<(Value, Response), CallError>
    where
        P: Serialize + ?Sized,
    {
        let params = serde_json::to_value(params)?;
        let exchange = self.exchange(selector, params);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| CallError::Timeout(limit))?,
            None => exchange.await,
        }
    }

    async fn exchange(&self, selector: &str, params: Value) -> Result<(Value, Response), CallError> {
        let channel = self.session.open().await?;
        let id = channel.id();
        let (reader, writer) = channel.into_split();
        let mut reader = ValueReader::new(reader, Arc::clone(&self.codec));
        let mut writer = ValueWriter::new(writer, Arc::clone(&self.codec));

        tracing::trace!(channel = id, selector, "Sending call");
        writer.send(&CallHeader::new(selector)).await?;
        writer.send_value(&params).await?;

        let header: ResponseHeader = reader.recv().await?.ok_or_else(|| {
            CallError::Protocol(format!("channel closed before reply to {selector}"))
        })?;
        if let Some(error) = header.error {
            tracing::debug!(channel = id, selector, error = %error, "Remote returned error");
            return Err(CallError::Remote(error));
        }
        let reply = reader.recv_value().await?.unwrap_or(Value::Null);

        Ok((
            reply,
            Response {
                continued: header.continued,
                reader,
                writer,
            },
        ))
    }

    pub async fn close(&self) -> Result<(), CallError> {
        Ok(self.session.close().await?)
    }
}

/// Caller's view of a call channel after the initial reply.
#[derive(Debug)]
pub struct Response {
    continued: bool,
    reader: ValueReader<ChannelReader>,
    writer: ValueWriter<ChannelWriter>,
}

impl Response {
    /// The responder kept the channel open for streaming.
    pub fn is_continued(&self) -> bool {
        self.continued
    }

    /// Next streamed value, or `None` once the responder closed its side.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CallError> {
        Ok(self.reader.recv().await?)
    }

    pub async fn receive_value(&mut self) -> Result<Option<Value>, CallError> {
        Ok(self.reader.recv_value().await?)
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CallError> {
        Ok(self.writer.send(value).await?)
    }

    /// No more values from this side; replies can still be received.
    pub async fn close_write(&mut self) -> Result<(), CallError> {
        Ok(self.writer.close().await?)
    }

    /// Separate halves for concurrent sending and receiving.
    pub fn into_split(self) -> (ValueReader<ChannelReader>, ValueWriter<ChannelWriter>) {
        (self.reader, self.writer)
    }
}

impl AsyncRead for Response {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for Response {
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
