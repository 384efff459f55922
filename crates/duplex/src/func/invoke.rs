use std::future::Future;
use std::sync::Arc;

use super::reply::IntoReply;

/// Something callable with a decoded argument tuple.
pub trait Invoke<Args>: Send + Sync + 'static {
    type Output: IntoReply;
    type Future: Future<Output = Self::Output> + Send + 'static;

    fn invoke(&self, args: Args) -> Self::Future;
}

/// Like [`Invoke`], with one trailing non-decoded parameter.
pub trait InvokeWith<Args, X>: Send + Sync + 'static {
    type Output: IntoReply;
    type Future: Future<Output = Self::Output> + Send + 'static;

    fn invoke_with(&self, args: Args, extra: X) -> Self::Future;
}

/// Plain async function or closure.
#[derive(Clone)]
pub struct FnInvoker<F>(pub(crate) F);

/// Method taking `self: Arc<S>` first, bound to a service instance.
pub struct MethodInvoker<S, F> {
    service: Arc<S>,
    f: F,
}

impl<S, F> MethodInvoker<S, F> {
    pub(crate) fn new(service: Arc<S>, f: F) -> Self {
        Self { service, f }
    }
}

macro_rules! impl_invoke {
    ($($ty:ident),*) => {
        #[allow(non_snake_case)]
        impl<F, Fut, $($ty,)*> Invoke<($($ty,)*)> for FnInvoker<F>
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: IntoReply,
        {
            type Output = Fut::Output;
            type Future = Fut;

            fn invoke(&self, ($($ty,)*): ($($ty,)*)) -> Fut {
                (self.0)($($ty),*)
            }
        }

        #[allow(non_snake_case)]
        impl<F, Fut, X, $($ty,)*> InvokeWith<($($ty,)*), X> for FnInvoker<F>
        where
            F: Fn($($ty,)* X) -> Fut + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: IntoReply,
        {
            type Output = Fut::Output;
            type Future = Fut;

            fn invoke_with(&self, ($($ty,)*): ($($ty,)*), extra: X) -> Fut {
                (self.0)($($ty,)* extra)
            }
        }

        #[allow(non_snake_case)]
        impl<S, F, Fut, $($ty,)*> Invoke<($($ty,)*)> for MethodInvoker<S, F>
        where
            S: Send + Sync + 'static,
            F: Fn(Arc<S>, $($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: IntoReply,
        {
            type Output = Fut::Output;
            type Future = Fut;

            fn invoke(&self, ($($ty,)*): ($($ty,)*)) -> Fut {
                (self.f)(Arc::clone(&self.service), $($ty),*)
            }
        }

        #[allow(non_snake_case)]
        impl<S, F, Fut, X, $($ty,)*> InvokeWith<($($ty,)*), X> for MethodInvoker<S, F>
        where
            S: Send + Sync + 'static,
            F: Fn(Arc<S>, $($ty,)* X) -> Fut + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: IntoReply,
        {
            type Output = Fut::Output;
            type Future = Fut;

            fn invoke_with(&self, ($($ty,)*): ($($ty,)*), extra: X) -> Fut {
                (self.f)(Arc::clone(&self.service), $($ty,)* extra)
            }
        }
    };
}

all_the_tuples!(impl_invoke);
