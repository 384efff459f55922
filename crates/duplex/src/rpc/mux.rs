use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::call::{Call, Responder};
use super::handler::Handler;
use super::protocol::normalize_selector;

/// Selector-keyed dispatch table.
///
/// Resolution order: exact pattern, then the longest pattern ending in `/`
/// that prefixes the selector. `/` itself is the catch-all.
#[derive(Default)]
pub struct RespondMux {
    handlers: DashMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for RespondMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespondMux")
            .field("patterns", &self.patterns())
            .finish()
    }
}

impl RespondMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `pattern`, replacing any previous one.
    pub fn handle(&self, pattern: &str, handler: impl Handler) {
        self.handle_arc(pattern, Arc::new(handler));
    }

    pub fn handle_arc(&self, pattern: &str, handler: Arc<dyn Handler>) {
        let pattern = normalize_selector(pattern);
        tracing::trace!(pattern = %pattern, "Registering handler");
        self.handlers.insert(pattern, handler);
    }

    pub fn remove(&self, pattern: &str) -> bool {
        self.handlers.remove(&normalize_selector(pattern)).is_some()
    }

    pub fn resolve(&self, selector: &str) -> Option<Arc<dyn Handler>> {
        let selector = normalize_selector(selector);
        if let Some(handler) = self.handlers.get(&selector) {
            return Some(Arc::clone(handler.value()));
        }
        self.handlers
            .iter()
            .filter(|entry| entry.key().ends_with('/') && selector.starts_with(entry.key().as_str()))
            .max_by_key(|entry| entry.key().len())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Registered patterns, sorted.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        patterns.sort();
        patterns
    }
}

#[async_trait]
impl Handler for RespondMux {
    async fn respond(&self, responder: Responder, call: Call) {
        let Some(handler) = self.resolve(call.selector()) else {
            tracing::warn!(selector = %call.selector(), "No handler for selector");
            let message = format!("no handler for selector: {}", call.selector());
            let _ = responder.return_error(message).await;
            return;
        };
        handler.respond(responder, call).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handler_fn;

    fn noop() -> impl Handler {
        handler_fn(|_responder, _call| async {})
    }

    #[test]
    fn exact_match_wins_over_prefix() {
        let mux = RespondMux::new();
        let exact: Arc<dyn Handler> = Arc::new(noop());
        mux.handle_arc("Echo", Arc::clone(&exact));
        mux.handle("/", noop());

        let resolved = mux.resolve("/Echo").unwrap();
        assert!(Arc::ptr_eq(&resolved, &exact));
    }

    #[test]
    fn longest_prefix_wins() {
        let mux = RespondMux::new();
        let outer: Arc<dyn Handler> = Arc::new(noop());
        let inner: Arc<dyn Handler> = Arc::new(noop());
        mux.handle_arc("/svc/", Arc::clone(&outer));
        mux.handle_arc("/svc/sub/", Arc::clone(&inner));

        assert!(Arc::ptr_eq(&mux.resolve("/svc/sub/Method").unwrap(), &inner));
        assert!(Arc::ptr_eq(&mux.resolve("/svc/Other").unwrap(), &outer));
        assert!(mux.resolve("/elsewhere").is_none());
    }

    #[test]
    fn root_is_catch_all() {
        let mux = RespondMux::new();
        mux.handle("/", noop());
        assert!(mux.resolve("Anything").is_some());
    }

    #[test]
    fn patterns_are_normalized() {
        let mux = RespondMux::new();
        mux.handle("Unary", noop());
        mux.handle("/Stream", noop());
        assert_eq!(mux.patterns(), vec!["/Stream", "/Unary"]);
        assert!(mux.remove("Unary"));
        assert_eq!(mux.patterns(), vec!["/Stream"]);
    }
}
