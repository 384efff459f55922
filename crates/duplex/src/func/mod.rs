//! Serve plain async functions and service methods as handlers.
//!
//! Parameter lists are matched at compile time: [`func`] accepts any
//! `Fn(A1, .., An) -> impl Future` for up to six parameters whose types
//! deserialize, and [`func_with`] additionally takes one trailing parameter
//! that is not decoded from the params:
//!
//! - [`Call`]: the raw call, for access to the selector or the caller
//! - [`Producer<V>`]: values to stream back to the caller
//! - [`Consumer<V>`]: values the caller streams in
//!
//! Streaming functions reply `continue` with null before they run. Their
//! `Ok` output, unless null, becomes the last streamed value.

macro_rules! all_the_tuples {
    ($name:ident) => {
        $name!();
        $name!(A1);
        $name!(A1, A2);
        $name!(A1, A2, A3);
        $name!(A1, A2, A3, A4);
        $name!(A1, A2, A3, A4, A5);
        $name!(A1, A2, A3, A4, A5, A6);
    };
}

mod args;
mod invoke;
mod methods;
mod reply;
mod stream;

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, Location};

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

pub use args::{ArgsError, FromArgs};
pub use invoke::{FnInvoker, Invoke, InvokeWith, MethodInvoker};
pub use methods::Methods;
pub use reply::{IntoReply, Json};
pub use stream::{Consumer, Producer, StreamClosed};

use crate::codec::ValueWriter;
use crate::mux::ChannelWriter;
use crate::rpc::{Call, Handler, Responder, panic_message};

/// Default bound on the relay queue between a streaming function and its channel.
pub const DEFAULT_STREAM_CAPACITY: usize = 512;

/// Adapts an async function to a [`Handler`].
///
/// ```ignore
/// mux.handle("Add", func(|a: i64, b: i64| async move { a + b }));
/// ```
#[track_caller]
pub fn func<F, Args>(f: F) -> Func<FnInvoker<F>, Args>
where
    FnInvoker<F>: Invoke<Args>,
    Args: FromArgs,
{
    Func::new(FnInvoker(f), Location::caller())
}

/// Adapts an async function whose last parameter is a [`Call`],
/// [`Producer`] or [`Consumer`].
#[track_caller]
pub fn func_with<F, Args, X>(f: F) -> FuncWith<FnInvoker<F>, Args, X>
where
    FnInvoker<F>: InvokeWith<Args, X>,
    Args: FromArgs,
{
    FuncWith::new(FnInvoker(f), Location::caller())
}

/// Where a function was registered, reported when it panics.
#[derive(Clone, Copy)]
struct Site(&'static Location<'static>);

impl fmt::Debug for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.file(), self.0.line())
    }
}

impl Site {
    /// Runs `fut`, turning a panic into a reply message.
    async fn guard<Fut: Future>(
        self,
        fut: Fut,
        selector: &str,
        params: &Value,
    ) -> Result<Fut::Output, String> {
        AssertUnwindSafe(fut).catch_unwind().await.map_err(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(selector, location = ?self, panic = %message, "Function panicked");
            format!("panic: {message} [{self:?}] {selector}({params})")
        })
    }
}

/// Decodes the params, or answers the call with the decode error.
async fn decode_args<Args: FromArgs>(
    responder: Responder,
    params: Value,
) -> Option<(Args, Responder)> {
    match Args::from_args(params) {
        Ok(args) => Some((args, responder)),
        Err(e) => {
            tracing::debug!(selector = responder.selector(), error = %e, "Rejected call params");
            let _ = responder.return_error(format!("fn: args: {e}")).await;
            None
        }
    }
}

async fn reply<O: IntoReply>(responder: Responder, outcome: Result<O, String>) {
    let result = outcome.and_then(IntoReply::into_reply);
    if let Err(e) = responder.return_result(result).await {
        tracing::debug!(error = %e, "Failed to send reply");
    }
}

/// Ends a stream with the function's outcome.
async fn finish_stream<O: IntoReply>(
    mut out: ValueWriter<ChannelWriter>,
    outcome: Result<O, String>,
    selector: &str,
) {
    match outcome.and_then(IntoReply::into_reply) {
        Ok(Value::Null) => {}
        Ok(last) => {
            if let Err(e) = out.send_value(&last).await {
                tracing::debug!(selector, error = %e, "Failed to send final stream value");
            }
        }
        Err(e) => tracing::warn!(selector, error = %e, "Streaming function failed"),
    }
    if let Err(e) = out.close().await {
        tracing::debug!(selector, error = %e, "Failed to close stream");
    }
}

/// Handler for a function with only decoded parameters. See [`func`].
pub struct Func<I, Args> {
    invoker: I,
    site: Site,
    _args: PhantomData<fn() -> Args>,
}

impl<I, Args> Func<I, Args> {
    pub(crate) fn new(invoker: I, location: &'static Location<'static>) -> Self {
        Self {
            invoker,
            site: Site(location),
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<I, Args> Handler for Func<I, Args>
where
    I: Invoke<Args>,
    Args: FromArgs,
{
    async fn respond(&self, responder: Responder, call: Call) {
        let params = call.params().clone();
        let selector = call.selector().to_string();
        let Some((args, responder)) = decode_args::<Args>(responder, params.clone()).await else {
            return;
        };
        let outcome = self
            .site
            .guard(self.invoker.invoke(args), &selector, &params)
            .await;
        reply(responder, outcome).await;
    }
}

/// Handler for a function with a trailing [`Call`], [`Producer`] or
/// [`Consumer`] parameter. See [`func_with`].
pub struct FuncWith<I, Args, X> {
    invoker: I,
    site: Site,
    capacity: usize,
    _args: PhantomData<fn() -> (Args, X)>,
}

impl<I, Args, X> FuncWith<I, Args, X> {
    pub(crate) fn new(invoker: I, location: &'static Location<'static>) -> Self {
        Self {
            invoker,
            site: Site(location),
            capacity: DEFAULT_STREAM_CAPACITY,
            _args: PhantomData,
        }
    }

    /// Bound on the relay queue. Ignored for a trailing [`Call`].
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl<I, Args> Handler for FuncWith<I, Args, Call>
where
    I: InvokeWith<Args, Call>,
    Args: FromArgs,
{
    async fn respond(&self, responder: Responder, call: Call) {
        let params = call.params().clone();
        let selector = call.selector().to_string();
        let Some((args, responder)) = decode_args::<Args>(responder, params.clone()).await else {
            return;
        };
        let outcome = self
            .site
            .guard(self.invoker.invoke_with(args, call), &selector, &params)
            .await;
        reply(responder, outcome).await;
    }
}

#[async_trait]
impl<I, Args, V> Handler for FuncWith<I, Args, Producer<V>>
where
    I: InvokeWith<Args, Producer<V>>,
    Args: FromArgs,
    V: Serialize + Send + 'static,
{
    async fn respond(&self, responder: Responder, call: Call) {
        let params = call.params().clone();
        let selector = call.selector().to_string();
        let Some((args, responder)) = decode_args::<Args>(responder, params.clone()).await else {
            return;
        };
        let Ok(mut out) = responder.continue_with(&Value::Null).await else {
            return;
        };

        let (tx, mut rx) = mpsc::channel::<V>(self.capacity);
        let relay_selector = selector.clone();
        let relay = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let value = match serde_json::to_value(&value) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(selector = %relay_selector, error = %e, "Unencodable stream value");
                        break;
                    }
                };
                if let Err(e) = out.send_value(&value).await {
                    tracing::debug!(selector = %relay_selector, error = %e, "Caller stopped reading stream");
                    break;
                }
            }
            out
        });

        let outcome = self
            .site
            .guard(
                self.invoker.invoke_with(args, Producer::new(tx)),
                &selector,
                &params,
            )
            .await;
        match relay.await {
            Ok(out) => finish_stream(out, outcome, &selector).await,
            Err(e) => tracing::error!(selector = %selector, error = %e, "Stream relay failed"),
        }
    }
}

#[async_trait]
impl<I, Args, V> Handler for FuncWith<I, Args, Consumer<V>>
where
    I: InvokeWith<Args, Consumer<V>>,
    Args: FromArgs,
    V: DeserializeOwned + Send + 'static,
{
    async fn respond(&self, responder: Responder, mut call: Call) {
        let params = call.params().clone();
        let selector = call.selector().to_string();
        let Some((args, responder)) = decode_args::<Args>(responder, params.clone()).await else {
            return;
        };
        let Ok(out) = responder.continue_with(&Value::Null).await else {
            return;
        };

        let (tx, rx) = mpsc::channel::<V>(self.capacity);
        let relay_selector = selector.clone();
        let relay = tokio::spawn(async move {
            loop {
                match call.receive::<V>().await {
                    Ok(Some(value)) => {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(selector = %relay_selector, error = %e, "Undecodable stream value");
                        break;
                    }
                }
            }
        });

        let outcome = self
            .site
            .guard(
                self.invoker.invoke_with(args, Consumer::new(rx)),
                &selector,
                &params,
            )
            .await;
        relay.abort();
        finish_stream(out, outcome, &selector).await;
    }
}
