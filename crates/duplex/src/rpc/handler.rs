use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::call::{Call, Responder};

/// Dispatch target for incoming calls.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn respond(&self, responder: Responder, call: Call);
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn respond(&self, responder: Responder, call: Call) {
        (**self).respond(responder, call).await
    }
}

/// Handler built from an async closure. See [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F>(F);

/// Wraps `|responder, call| async { .. }` as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Responder, Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Responder, Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn respond(&self, responder: Responder, call: Call) {
        (self.0)(responder, call).await
    }
}
