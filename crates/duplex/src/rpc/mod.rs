//! Call/response protocol over session channels.
//!
//! One channel per call. The caller writes a [`CallHeader`] and the params,
//! then reads a [`ResponseHeader`] and the reply. A responder may instead
//! `continue`, after which both sides stream values or raw bytes until they
//! close their write halves.

mod call;
mod client;
mod error;
mod handler;
mod mux;
mod protocol;
mod server;

pub use call::{Call, Responder};
pub use client::{Client, Response};
pub use error::CallError;
pub use handler::{Handler, HandlerFn, handler_fn};
pub use mux::RespondMux;
pub use protocol::{CallHeader, ResponseHeader, normalize_selector};
pub use server::Server;

pub(crate) use server::panic_message;
