//! duplex: bidirectional multiplexed RPC.
//!
//! Layers, bottom up:
//!
//! - [`codec`]: schema-free values ([`serde_json::Value`]) as JSON or CBOR frames
//! - [`mux`]: sessions of independent channels over stdio, TCP, Unix sockets,
//!   in-process pipes or QUIC
//! - [`rpc`]: one call per channel, unary or streaming, with selector dispatch
//! - [`func`]: plain async functions and service methods as handlers
//! - [`peer`]: one session that both calls and answers

pub mod codec;
pub mod func;
pub mod interop;
pub mod mux;
pub mod peer;
pub mod rpc;

pub use codec::{Codec, CodecError, SharedCodec};
pub use func::{Consumer, Methods, Producer, func, func_with};
pub use mux::{Channel, MuxError, Session};
pub use peer::{DialError, Peer, dial};
pub use rpc::{Call, CallError, Client, Handler, RespondMux, Responder, Response, Server, handler_fn};
