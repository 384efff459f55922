//! Reference services used by `duplex check` and `duplex interop`.
//!
//! [`InteropService`] is what an implementation under test serves;
//! [`CallbackService`] is what the checker serves back on the same session.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::codec::ValueWriter;
use crate::func::Methods;
use crate::mux::ChannelWriter;
use crate::rpc::{Call, RespondMux, Responder};

/// `Unary`, `Stream`, `Bytes`, `Error` and `Callback`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InteropService;

impl InteropService {
    pub fn into_mux(self) -> RespondMux {
        Methods::new(Arc::new(self))
            .raw("Unary", Self::unary)
            .raw("Stream", Self::stream)
            .raw("Bytes", Self::bytes)
            .raw("Error", Self::error)
            .raw("Callback", Self::callback)
            .build()
    }

    /// Replies with the params.
    async fn unary(self: Arc<Self>, responder: Responder, call: Call) {
        let params = call.params().clone();
        if let Err(e) = responder.return_value(&params).await {
            tracing::debug!(error = %e, "Unary reply failed");
        }
    }

    /// Continues with the params, then echoes every streamed value.
    async fn stream(self: Arc<Self>, responder: Responder, call: Call) {
        let params = call.params().clone();
        let Some(out) = continue_with(responder, &params).await else {
            return;
        };
        echo_values(call, out).await;
    }

    /// Continues with the params, then echoes raw bytes until EOF.
    async fn bytes(self: Arc<Self>, responder: Responder, call: Call) {
        let params = call.params().clone();
        let Some(out) = continue_with(responder, &params).await else {
            return;
        };
        echo_bytes(call, out).await;
    }

    /// Replies with the params as an error message.
    async fn error(self: Arc<Self>, responder: Responder, call: Call) {
        let message = match call.params() {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let _ = responder.return_error(message).await;
    }

    /// Calls `selector` with `params` on the caller and relays its reply.
    async fn callback(self: Arc<Self>, responder: Responder, call: Call) {
        #[derive(Deserialize)]
        struct Request {
            selector: String,
            #[serde(default)]
            params: Value,
        }

        let request: Request = match call.decode() {
            Ok(request) => request,
            Err(e) => {
                let _ = responder.return_error(format!("callback: {e}")).await;
                return;
            }
        };
        let caller = call.caller().clone();
        let result = caller
            .call_value(&request.selector, &request.params)
            .await
            .map(|(reply, _)| reply);
        let _ = responder.return_result(result).await;
    }
}

/// `UnaryCallback`, `StreamCallback` and `BytesCallback`: the same echoes as
/// [`InteropService`], served by the checking side.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallbackService;

impl CallbackService {
    pub fn into_mux(self) -> RespondMux {
        Methods::new(Arc::new(self))
            .raw("UnaryCallback", Self::unary_callback)
            .raw("StreamCallback", Self::stream_callback)
            .raw("BytesCallback", Self::bytes_callback)
            .build()
    }

    async fn unary_callback(self: Arc<Self>, responder: Responder, call: Call) {
        let params = call.params().clone();
        if let Err(e) = responder.return_value(&params).await {
            tracing::debug!(error = %e, "UnaryCallback reply failed");
        }
    }

    async fn stream_callback(self: Arc<Self>, responder: Responder, call: Call) {
        let params = call.params().clone();
        if let Some(out) = continue_with(responder, &params).await {
            echo_values(call, out).await;
        }
    }

    async fn bytes_callback(self: Arc<Self>, responder: Responder, call: Call) {
        let params = call.params().clone();
        if let Some(out) = continue_with(responder, &params).await {
            echo_bytes(call, out).await;
        }
    }
}

async fn continue_with(responder: Responder, value: &Value) -> Option<ValueWriter<ChannelWriter>> {
    match responder.continue_with(value).await {
        Ok(out) => Some(out),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to continue call");
            None
        }
    }
}

async fn echo_values(mut call: Call, mut out: ValueWriter<ChannelWriter>) {
    loop {
        match call.receive_value().await {
            Ok(Some(value)) => {
                if let Err(e) = out.send_value(&value).await {
                    tracing::debug!(error = %e, "Stream echo stopped");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Stream echo failed");
                break;
            }
        }
    }
    let _ = out.close().await;
}

async fn echo_bytes(mut call: Call, mut out: ValueWriter<ChannelWriter>) {
    match tokio::io::copy(&mut call, &mut out).await {
        Ok(n) => tracing::trace!(bytes = n, "Byte echo finished"),
        Err(e) => tracing::warn!(error = %e, "Byte echo failed"),
    }
    let _ = out.close().await;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec;
    use crate::mux;
    use crate::peer::Peer;

    fn peers() -> (Peer, Peer) {
        let (a, b) = mux::pair();
        let service = Peer::new(a, codec::cbor()).with_mux(InteropService.into_mux());
        let checker = Peer::new(b, codec::cbor()).with_mux(CallbackService.into_mux());
        service.respond();
        checker.respond();
        (service, checker)
    }

    #[tokio::test]
    async fn error_uses_params_as_message() {
        let (_service, checker) = peers();
        let err = checker.call("Error", "test").await.unwrap_err();
        assert_eq!(err.remote_message(), Some("test"));
    }

    #[tokio::test]
    async fn callback_reaches_checker() {
        let (_service, checker) = peers();
        let (reply, _) = checker
            .call_into::<Value, _>(
                "Callback",
                &json!({"selector": "UnaryCallback", "params": {"foo": "bar"}}),
            )
            .await
            .unwrap();
        assert_eq!(reply, json!({"foo": "bar"}));
    }

    #[tokio::test]
    async fn stream_callback_echoes() {
        let (service, _checker) = peers();
        let mut response = service.call("StreamCallback", &()).await.unwrap();
        response.send(&1).await.unwrap();
        response.send("two").await.unwrap();
        response.close_write().await.unwrap();
        assert_eq!(response.receive_value().await.unwrap(), Some(json!(1)));
        assert_eq!(response.receive_value().await.unwrap(), Some(json!("two")));
        assert_eq!(response.receive_value().await.unwrap(), None);
    }
}
