//! Responder side of a call channel.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncRead, ReadBuf};

use super::client::Client;
use super::error::CallError;
use super::protocol::ResponseHeader;
use crate::codec::{ValueReader, ValueWriter};
use crate::mux::{ChannelReader, ChannelWriter};

/// An incoming call: its selector, decoded params and the rest of the
/// caller's stream.
pub struct Call {
    selector: String,
    params: Value,
    reader: ValueReader<ChannelReader>,
    caller: Client,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("selector", &self.selector)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Call {
    pub(crate) fn new(
        selector: String,
        params: Value,
        reader: ValueReader<ChannelReader>,
        caller: Client,
    ) -> Self {
        Self {
            selector,
            params,
            reader,
            caller,
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Decodes the params into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CallError> {
        Ok(serde_json::from_value(self.params.clone())?)
    }

    /// Next value streamed by the caller after the params.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CallError> {
        Ok(self.reader.recv().await?)
    }

    pub async fn receive_value(&mut self) -> Result<Option<Value>, CallError> {
        Ok(self.reader.recv_value().await?)
    }

    /// Client bound to the same session, for calling back into the caller.
    pub fn caller(&self) -> &Client {
        &self.caller
    }
}

impl AsyncRead for Call {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

/// Write half of a call channel, shared between the responder and the server
/// task so a panicking handler can still be answered.
#[derive(Clone)]
pub(crate) struct ReplySlot(Arc<Mutex<Option<ValueWriter<ChannelWriter>>>>);

impl ReplySlot {
    pub(crate) fn new(writer: ValueWriter<ChannelWriter>) -> Self {
        Self(Arc::new(Mutex::new(Some(writer))))
    }

    fn take(&self) -> Option<ValueWriter<ChannelWriter>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Replies with an error unless a reply already went out.
    pub(crate) async fn reply_error(&self, message: String) {
        self.reply_if_unanswered(ResponseHeader::error(message)).await;
    }

    /// Replies null unless a reply already went out.
    pub(crate) async fn reply_null(&self) -> bool {
        self.reply_if_unanswered(ResponseHeader::ok()).await
    }

    async fn reply_if_unanswered(&self, header: ResponseHeader) -> bool {
        let Some(mut writer) = self.take() else {
            return false;
        };
        if let Err(e) = finish(&mut writer, &header, &Value::Null).await {
            tracing::debug!(error = %e, "Failed to send fallback reply");
        }
        true
    }
}

async fn send_reply(
    writer: &mut ValueWriter<ChannelWriter>,
    header: &ResponseHeader,
    value: &Value,
) -> Result<(), CallError> {
    writer.send(header).await?;
    writer.send_value(value).await?;
    Ok(())
}

/// Sends a final reply and closes the write half.
async fn finish(
    writer: &mut ValueWriter<ChannelWriter>,
    header: &ResponseHeader,
    value: &Value,
) -> Result<(), CallError> {
    send_reply(writer, header, value).await?;
    writer.close().await?;
    Ok(())
}

/// Answers one call, either once or by switching to streaming.
///
/// Every reply method consumes the responder. If the handler finishes without
/// replying, the server answers null on its behalf.
pub struct Responder {
    slot: ReplySlot,
    selector: String,
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

impl Responder {
    pub(crate) fn new(slot: ReplySlot, selector: String) -> Self {
        Self { slot, selector }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    fn writer(&self) -> Result<ValueWriter<ChannelWriter>, CallError> {
        self.slot.take().ok_or(CallError::AlreadyReplied)
    }

    pub async fn return_value<T: Serialize + ?Sized>(self, value: &T) -> Result<(), CallError> {
        let mut writer = self.writer()?;
        match serde_json::to_value(value) {
            Ok(value) => finish(&mut writer, &ResponseHeader::ok(), &value).await,
            Err(e) => {
                let header = ResponseHeader::error(format!("encode reply: {e}"));
                finish(&mut writer, &header, &Value::Null).await?;
                Err(e.into())
            }
        }
    }

    pub async fn return_error(self, message: impl fmt::Display) -> Result<(), CallError> {
        let mut writer = self.writer()?;
        let message = message.to_string();
        tracing::debug!(selector = %self.selector, error = %message, "Replying with error");
        finish(&mut writer, &ResponseHeader::error(message), &Value::Null).await
    }

    pub async fn return_result<T, E>(self, result: Result<T, E>) -> Result<(), CallError>
    where
        T: Serialize,
        E: fmt::Display,
    {
        match result {
            Ok(value) => self.return_value(&value).await,
            Err(e) => self.return_error(e).await,
        }
    }

    /// Sends `value` as the initial reply and keeps the channel open.
    ///
    /// The returned writer streams further values (or raw bytes) to the caller;
    /// closing it ends the stream.
    pub async fn continue_with<T: Serialize + ?Sized>(
        self,
        value: &T,
    ) -> Result<ValueWriter<ChannelWriter>, CallError> {
        let mut writer = self.writer()?;
        let value = serde_json::to_value(value)?;
        send_reply(&mut writer, &ResponseHeader::continued(), &value).await?;
        Ok(writer)
    }
}
