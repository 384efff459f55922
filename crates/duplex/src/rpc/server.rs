use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::call::{Call, ReplySlot, Responder};
use super::client::Client;
use super::handler::Handler;
use super::protocol::{CallHeader, normalize_selector};
use crate::codec::{SharedCodec, ValueReader, ValueWriter};
use crate::mux::{Channel, MuxError, Session};

/// Accepts channels on a session and dispatches each call to a handler.
#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn Handler>,
    codec: SharedCodec,
}

impl Server {
    pub fn new(handler: impl Handler, codec: SharedCodec) -> Self {
        Self::from_arc(Arc::new(handler), codec)
    }

    pub fn from_arc(handler: Arc<dyn Handler>, codec: SharedCodec) -> Self {
        Self { handler, codec }
    }

    pub fn codec(&self) -> &SharedCodec {
        &self.codec
    }

    /// Serves calls until the session ends.
    ///
    /// Each accepted channel is handled on its own task. Returns `Ok` when the
    /// session closes normally.
    pub async fn respond(&self, session: Arc<dyn Session>) -> Result<(), MuxError> {
        loop {
            let channel = match session.accept().await {
                Ok(channel) => channel,
                Err(MuxError::SessionClosed) => {
                    tracing::debug!("Session closed, responder exiting");
                    return Ok(());
                }
                Err(MuxError::Protocol(e)) => {
                    tracing::warn!(error = %e, "Rejected incoming channel");
                    continue;
                }
                Err(e) => return Err(e),
            };
            tokio::spawn(self.clone().serve(Arc::clone(&session), channel));
        }
    }

    async fn serve(self, session: Arc<dyn Session>, channel: Channel) {
        let id = channel.id();
        let (reader, writer) = channel.into_split();
        let mut reader = ValueReader::new(reader, Arc::clone(&self.codec));
        let slot = ReplySlot::new(ValueWriter::new(writer, Arc::clone(&self.codec)));

        let header = match reader.recv::<CallHeader>().await {
            Ok(Some(header)) => header,
            Ok(None) => {
                tracing::debug!(channel = id, "Channel closed before call header");
                return;
            }
            Err(e) => {
                tracing::warn!(channel = id, error = %e, "Undecodable call header");
                slot.reply_error(format!("bad call header: {e}")).await;
                return;
            }
        };
        let selector = normalize_selector(&header.selector);

        let params = match reader.recv_value().await {
            Ok(params) => params.unwrap_or(Value::Null),
            Err(e) => {
                tracing::warn!(channel = id, selector = %selector, error = %e, "Undecodable call params");
                slot.reply_error(format!("bad call params: {e}")).await;
                return;
            }
        };

        tracing::debug!(channel = id, selector = %selector, "Dispatching call");
        let caller = Client::new(session, Arc::clone(&self.codec));
        let call = Call::new(selector.clone(), params, reader, caller);
        let responder = Responder::new(slot.clone(), selector.clone());

        let handling = AssertUnwindSafe(self.handler.respond(responder, call)).catch_unwind();
        match handling.await {
            Ok(()) => {
                if slot.reply_null().await {
                    tracing::debug!(channel = id, selector = %selector, "Handler returned without reply, sent null");
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(channel = id, selector = %selector, panic = %message, "Handler panicked");
                slot.reply_error(format!("panic: {message} [{selector}]")).await;
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
