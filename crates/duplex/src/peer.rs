//! Symmetric endpoint: one session that both calls and answers.

use std::io;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinHandle;
use url::Url;

use crate::codec::SharedCodec;
use crate::mux::{self, MuxError, Session};
use crate::rpc::{CallError, Client, Handler, RespondMux, Response, Server};

#[derive(Debug, Error)]
pub enum DialError {
    #[error("invalid address {addr:?}: {source}")]
    Url {
        addr: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme: {0}")]
    Scheme(String),

    #[error("missing host or port in {0:?}")]
    Address(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("session: {0}")]
    Session(#[from] MuxError),
}

/// A session with its own client and dispatch table.
///
/// Handlers registered with [`Peer::handle`] are served once [`Peer::respond`]
/// has been called; calls may be issued at any time.
pub struct Peer {
    session: Arc<dyn Session>,
    client: Client,
    mux: Arc<RespondMux>,
    codec: SharedCodec,
}

impl Peer {
    pub fn new(session: impl Session, codec: SharedCodec) -> Self {
        Self::from_arc(Arc::new(session), codec)
    }

    pub fn from_arc(session: Arc<dyn Session>, codec: SharedCodec) -> Self {
        Self {
            client: Client::new(Arc::clone(&session), Arc::clone(&codec)),
            session,
            mux: Arc::new(RespondMux::new()),
            codec,
        }
    }

    /// Replaces the dispatch table, e.g. with one built by
    /// [`Methods`](crate::func::Methods).
    pub fn with_mux(mut self, mux: RespondMux) -> Self {
        self.mux = Arc::new(mux);
        self
    }

    pub fn handle(&self, selector: &str, handler: impl Handler) {
        self.mux.handle(selector, handler);
    }

    /// Dispatch table served by [`Peer::respond`].
    pub fn mux(&self) -> &Arc<RespondMux> {
        &self.mux
    }

    /// Starts answering incoming calls on a background task.
    ///
    /// The task ends when the session closes.
    pub fn respond(&self) -> JoinHandle<Result<(), MuxError>> {
        let handler: Arc<dyn Handler> = self.mux.clone();
        let server = Server::from_arc(handler, Arc::clone(&self.codec));
        let session = Arc::clone(&self.session);
        tokio::spawn(async move { server.respond(session).await })
    }

    pub async fn call<P>(&self, selector: &str, params: &P) -> Result<Response, CallError>
    where
        P: Serialize + ?Sized,
    {
        self.client.call(selector, params).await
    }

    pub async fn call_into<R, P>(&self, selector: &str, params: &P) -> Result<(R, Response), CallError>
    where
        R: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.client.call_into(selector, params).await
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn codec(&self) -> &SharedCodec {
        &self.codec
    }

    /// Closes the session, ending the respond loop and failing in-flight calls.
    pub async fn close(&self) -> Result<(), MuxError> {
        self.session.close().await
    }
}

/// Connects to `tcp://host:port`, `unix:///path` or `udp://host:port` (QUIC).
///
/// QUIC dials skip certificate verification, matching listeners that use an
/// ephemeral self-signed certificate.
pub async fn dial(addr: &str, codec: SharedCodec) -> Result<Peer, DialError> {
    let url = Url::parse(addr).map_err(|source| DialError::Url {
        addr: addr.to_string(),
        source,
    })?;
    tracing::debug!(scheme = url.scheme(), addr, "Dialing peer");
    let session: Arc<dyn Session> = match url.scheme() {
        "tcp" => Arc::new(mux::dial_tcp(host_port(&url, addr)?).await?),
        #[cfg(unix)]
        "unix" => Arc::new(mux::dial_unix(url.path()).await?),
        #[cfg(feature = "quic")]
        "udp" | "quic" => Arc::new(
            mux::quic::dial(host_port(&url, addr)?, "localhost", mux::quic::Trust::Insecure)
                .await?,
        ),
        other => return Err(DialError::Scheme(other.to_string())),
    };
    Ok(Peer::from_arc(session, codec))
}

fn host_port(url: &Url, addr: &str) -> Result<String, DialError> {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => Ok(format!("{host}:{port}")),
        _ => Err(DialError::Address(addr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::codec;
    use crate::rpc::{Call, Responder, handler_fn};

    fn echo() -> impl Handler {
        handler_fn(|responder: Responder, call: Call| async move {
            let params = call.params().clone();
            let _ = responder.return_value(&params).await;
        })
    }

    #[tokio::test]
    async fn both_sides_call_each_other() {
        let (a, b) = mux::pair();
        let left = Peer::new(a, codec::cbor());
        let right = Peer::new(b, codec::cbor());
        left.handle("Echo", echo());
        right.handle("Echo", echo());
        left.respond();
        right.respond();

        let (from_right, from_left) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                left.call_into::<String, _>("Echo", "left"),
                right.call_into::<String, _>("Echo", "right"),
            )
        })
        .await
        .unwrap();
        assert_eq!(from_right.unwrap().0, "left");
        assert_eq!(from_left.unwrap().0, "right");
    }

    #[tokio::test]
    async fn handler_calls_back_into_caller() {
        let (a, b) = mux::pair();
        let server = Peer::new(a, codec::json());
        let caller = Peer::new(b, codec::json());

        caller.handle(
            "Name",
            handler_fn(|responder: Responder, _call: Call| async move {
                let _ = responder.return_value("caller").await;
            }),
        );
        server.handle(
            "Greet",
            handler_fn(|responder: Responder, call: Call| async move {
                let back = call.caller().clone();
                let result = back
                    .call_into::<String, _>("Name", &())
                    .await
                    .map(|(name, _)| format!("hello {name}"));
                let _ = responder.return_result(result).await;
            }),
        );
        server.respond();
        caller.respond();

        let (greeting, _) = caller.call_into::<String, _>("Greet", &json!(null)).await.unwrap();
        assert_eq!(greeting, "hello caller");
    }

    #[tokio::test]
    async fn close_ends_respond_and_fails_calls() {
        let (a, b) = mux::pair();
        let left = Peer::new(a, codec::json());
        let right = Peer::new(b, codec::json());
        let serving = right.respond();

        left.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(left.call("Echo", &()).await.is_err());
    }

    #[tokio::test]
    async fn dial_rejects_unknown_scheme() {
        let err = dial("http://localhost:80", codec::json()).await.err().unwrap();
        assert!(matches!(err, DialError::Scheme(s) if s == "http"));

        let err = dial("tcp://localhost", codec::json()).await.err().unwrap();
        assert!(matches!(err, DialError::Address(_)));
    }

    #[tokio::test]
    async fn dial_tcp_peer() {
        let listener = mux::listen_tcp("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            let peer = Peer::new(session, codec::json());
            peer.handle("Echo", echo());
            let _ = peer.respond().await;
        });

        let peer = dial(&format!("tcp://{addr}"), codec::json()).await.unwrap();
        let (reply, _) = peer.call_into::<i64, _>("Echo", &42).await.unwrap();
        assert_eq!(reply, 42);
    }
}
