//! Length-delimited value framing over any AsyncRead/AsyncWrite.
//!
//! Uses LengthDelimitedCodec for framing + a pluggable [`Codec`] for the payload.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::{CodecError, SharedCodec};

/// Largest single encoded value accepted on a channel.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Frames values with a 4-byte length prefix and encodes them with the bound codec.
#[derive(Debug)]
pub struct ValueCodec {
    inner: LengthDelimitedCodec,
    codec: SharedCodec,
}

impl ValueCodec {
    pub fn new(codec: SharedCodec) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(MAX_FRAME_SIZE)
                .new_codec(),
            codec,
        }
    }

    pub fn codec(&self) -> &SharedCodec {
        &self.codec
    }
}

impl Decoder for ValueCodec {
    type Item = Value;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(self.codec.decode(&frame)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<&Value> for ValueCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &Value, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = self.codec.encode(item)?;
        let size = payload.len();
        if size > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge {
                size,
                limit: MAX_FRAME_SIZE,
            });
        }
        tracing::trace!(codec = self.codec.name(), size_bytes = size, "Encoding value");
        if size > 100_000 {
            tracing::debug!(
                codec = self.codec.name(),
                size_kb = size / 1024,
                "Large value being encoded"
            );
        }
        self.inner.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}

/// Decodes values from a byte stream.
///
/// Reads ahead into an internal buffer; bytes left over after the last value
/// are handed out first through the `AsyncRead` impl, so a caller can switch
/// from values to raw bytes without losing anything.
#[derive(Debug)]
pub struct ValueReader<R> {
    inner: R,
    frames: ValueCodec,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> ValueReader<R> {
    pub fn new(inner: R, codec: SharedCodec) -> Self {
        Self {
            inner,
            frames: ValueCodec::new(codec),
            buf: BytesMut::new(),
        }
    }

    /// Next value, or `None` on a clean end of stream.
    pub async fn recv_value(&mut self) -> Result<Option<Value>, CodecError> {
        loop {
            if let Some(value) = self.frames.decode(&mut self.buf)? {
                return Ok(Some(value));
            }
            self.buf.reserve(READ_CHUNK);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended inside a frame ({} bytes pending)", self.buf.len()),
                )
                .into());
            }
        }
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        match self.recv_value().await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn codec(&self) -> &SharedCodec {
        self.frames.codec()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Bytes read ahead but not yet consumed as values.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ValueReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.buf.is_empty() {
            let n = this.buf.len().min(out.remaining());
            out.put_slice(&this.buf[..n]);
            this.buf.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, out)
    }
}

/// Encodes values onto a byte stream. Each value is flushed as it is sent.
#[derive(Debug)]
pub struct ValueWriter<W> {
    inner: W,
    frames: ValueCodec,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> ValueWriter<W> {
    pub fn new(inner: W, codec: SharedCodec) -> Self {
        Self {
            inner,
            frames: ValueCodec::new(codec),
            buf: BytesMut::new(),
        }
    }

    pub async fn send_value(&mut self, value: &Value) -> Result<(), CodecError> {
        self.buf.clear();
        self.frames.encode(value, &mut self.buf)?;
        let frame = self.buf.split().freeze();
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        let value = serde_json::to_value(value)?;
        self.send_value(&value).await
    }

    /// Shuts down the write side of the underlying stream.
    pub async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    pub fn codec(&self) -> &SharedCodec {
        self.frames.codec()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ValueWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use serde_json::json;

    #[test]
    fn frames_are_length_prefixed() {
        let mut frames = ValueCodec::new(codec::json());
        let mut buf = BytesMut::new();
        frames.encode(&json!([1, 2]), &mut buf).unwrap();
        assert_eq!(&buf[..], b"\x00\x00\x00\x05[1,2]");

        let decoded = frames.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, json!([1, 2]));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut frames = ValueCodec::new(codec::json());
        let mut full = BytesMut::new();
        frames.encode(&json!("hello"), &mut full).unwrap();

        let mut buf = BytesMut::from(&full[..6]);
        assert!(frames.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[6..]);
        assert_eq!(frames.decode(&mut buf).unwrap(), Some(json!("hello")));
    }

    #[tokio::test]
    async fn values_then_raw_bytes() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = ValueWriter::new(a, codec::cbor());
        let mut reader = ValueReader::new(b, codec::cbor());

        let send = tokio::spawn(async move {
            writer.send(&json!({"foo": "bar"})).await.unwrap();
            writer.send(&100).await.unwrap();
            writer.write_all(b"raw tail").await.unwrap();
            writer.close().await.unwrap();
        });

        assert_eq!(reader.recv_value().await.unwrap(), Some(json!({"foo": "bar"})));
        assert_eq!(reader.recv::<i64>().await.unwrap(), Some(100));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"raw tail");
        send.await.unwrap();
    }

    #[tokio::test]
    async fn clean_eof_is_none() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut reader = ValueReader::new(b, codec::json());
        assert!(reader.recv_value().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_an_error() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"\x00\x00\x00\x10{\"tr").await.unwrap();
        drop(a);
        let mut reader = ValueReader::new(b, codec::json());
        let err = reader.recv_value().await.unwrap_err();
        assert!(matches!(err, CodecError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
