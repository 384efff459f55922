use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use super::invoke::{Invoke, InvokeWith, MethodInvoker};
use super::{DEFAULT_STREAM_CAPACITY, FromArgs, Func, FuncWith};
use crate::rpc::{Call, Handler, RespondMux, Responder, handler_fn};

/// Builds a dispatch table from a service's methods.
///
/// Methods take `self: Arc<Self>` so each call holds its own reference to the
/// service.
///
/// ```ignore
/// let mux = Methods::new(Arc::new(Counter::default()))
///     .func("Add", Counter::add)
///     .func_with("Watch", Counter::watch)
///     .raw("Proxy", Counter::proxy)
///     .build();
/// ```
pub struct Methods<S> {
    service: Arc<S>,
    mux: RespondMux,
    capacity: usize,
}

impl<S: Send + Sync + 'static> Methods<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            mux: RespondMux::new(),
            capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Relay queue bound for streaming methods registered after this call.
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Registers a method whose parameters all decode from the params.
    #[track_caller]
    pub fn func<F, Args>(self, name: &str, f: F) -> Self
    where
        MethodInvoker<S, F>: Invoke<Args>,
        Args: FromArgs,
        Func<MethodInvoker<S, F>, Args>: Handler,
    {
        let invoker = MethodInvoker::new(Arc::clone(&self.service), f);
        self.mux.handle(name, Func::new(invoker, Location::caller()));
        self
    }

    /// Registers a method with a trailing [`Call`](crate::rpc::Call),
    /// [`Producer`](super::Producer) or [`Consumer`](super::Consumer).
    #[track_caller]
    pub fn func_with<F, Args, X>(self, name: &str, f: F) -> Self
    where
        MethodInvoker<S, F>: InvokeWith<Args, X>,
        Args: FromArgs,
        FuncWith<MethodInvoker<S, F>, Args, X>: Handler,
    {
        let invoker = MethodInvoker::new(Arc::clone(&self.service), f);
        let handler = FuncWith::new(invoker, Location::caller()).with_stream_capacity(self.capacity);
        self.mux.handle(name, handler);
        self
    }

    /// Registers a method that already has the handler shape.
    pub fn raw<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<S>, Responder, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        self.mux.handle(
            name,
            handler_fn(move |responder, call| f(Arc::clone(&service), responder, call)),
        );
        self
    }

    pub fn build(self) -> RespondMux {
        tracing::debug!(patterns = ?self.mux.patterns(), "Built method table");
        self.mux
    }
}

impl<S: Handler> Methods<S> {
    /// Registers the service itself under `/` so selectors without a method
    /// still reach it.
    pub fn fallback(self) -> Self {
        let service: Arc<dyn Handler> = self.service.clone();
        self.mux.handle_arc("/", service);
        self
    }
}
