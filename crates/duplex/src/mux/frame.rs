//! Wire frames for the byte-stream multiplexer.
//!
//! Every frame starts with a one-byte type followed by fixed big-endian `u32`
//! fields. Only `Data` carries a payload, preceded by its length.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const OPEN: u8 = 1;
const OPEN_CONFIRM: u8 = 2;
const OPEN_FAILURE: u8 = 3;
const WINDOW_ADJUST: u8 = 4;
const DATA: u8 = 5;
const EOF: u8 = 6;
const CLOSE: u8 = 7;

/// Upper bound on a single data payload accepted from the wire.
const MAX_PAYLOAD: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Open {
        sender: u32,
        window: u32,
        max_packet: u32,
    },
    OpenConfirm {
        recipient: u32,
        sender: u32,
        window: u32,
        max_packet: u32,
    },
    OpenFailure {
        recipient: u32,
    },
    WindowAdjust {
        recipient: u32,
        bytes: u32,
    },
    Data {
        recipient: u32,
        payload: Bytes,
    },
    /// Sender will write no more data (write half-close).
    Eof {
        recipient: u32,
    },
    Close {
        recipient: u32,
    },
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Frame::Open { .. } => "open",
            Frame::OpenConfirm { .. } => "open_confirm",
            Frame::OpenFailure { .. } => "open_failure",
            Frame::WindowAdjust { .. } => "window_adjust",
            Frame::Data { .. } => "data",
            Frame::Eof { .. } => "eof",
            Frame::Close { .. } => "close",
        }
    }
}

/// Header length, including the type byte, for each frame type.
fn header_len(kind: u8) -> io::Result<usize> {
    match kind {
        OPEN => Ok(13),
        OPEN_CONFIRM => Ok(17),
        OPEN_FAILURE | EOF | CLOSE => Ok(5),
        WINDOW_ADJUST | DATA => Ok(9),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame type {other}"),
        )),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Frame>> {
        let Some(&kind) = src.first() else {
            return Ok(None);
        };
        let header = header_len(kind)?;
        if src.len() < header {
            src.reserve(header - src.len());
            return Ok(None);
        }

        if kind == DATA {
            let len = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;
            if len > MAX_PAYLOAD {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("data frame of {len} bytes exceeds limit of {MAX_PAYLOAD}"),
                ));
            }
            if src.len() < header + len {
                src.reserve(header + len - src.len());
                return Ok(None);
            }
        }

        src.advance(1);
        let frame = match kind {
            OPEN => Frame::Open {
                sender: src.get_u32(),
                window: src.get_u32(),
                max_packet: src.get_u32(),
            },
            OPEN_CONFIRM => Frame::OpenConfirm {
                recipient: src.get_u32(),
                sender: src.get_u32(),
                window: src.get_u32(),
                max_packet: src.get_u32(),
            },
            OPEN_FAILURE => Frame::OpenFailure {
                recipient: src.get_u32(),
            },
            WINDOW_ADJUST => Frame::WindowAdjust {
                recipient: src.get_u32(),
                bytes: src.get_u32(),
            },
            DATA => {
                let recipient = src.get_u32();
                let len = src.get_u32() as usize;
                Frame::Data {
                    recipient,
                    payload: src.split_to(len).freeze(),
                }
            }
            EOF => Frame::Eof {
                recipient: src.get_u32(),
            },
            _ => Frame::Close {
                recipient: src.get_u32(),
            },
        };
        tracing::trace!(kind = frame.kind(), "Decoded frame");
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> io::Result<()> {
        tracing::trace!(kind = frame.kind(), "Encoding frame");
        match frame {
            Frame::Open {
                sender,
                window,
                max_packet,
            } => {
                dst.reserve(13);
                dst.put_u8(OPEN);
                dst.put_u32(sender);
                dst.put_u32(window);
                dst.put_u32(max_packet);
            }
            Frame::OpenConfirm {
                recipient,
                sender,
                window,
                max_packet,
            } => {
                dst.reserve(17);
                dst.put_u8(OPEN_CONFIRM);
                dst.put_u32(recipient);
                dst.put_u32(sender);
                dst.put_u32(window);
                dst.put_u32(max_packet);
            }
            Frame::OpenFailure { recipient } => {
                dst.reserve(5);
                dst.put_u8(OPEN_FAILURE);
                dst.put_u32(recipient);
            }
            Frame::WindowAdjust { recipient, bytes } => {
                dst.reserve(9);
                dst.put_u8(WINDOW_ADJUST);
                dst.put_u32(recipient);
                dst.put_u32(bytes);
            }
            Frame::Data { recipient, payload } => {
                let len = u32::try_from(payload.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "data payload too large")
                })?;
                dst.reserve(9 + payload.len());
                dst.put_u8(DATA);
                dst.put_u32(recipient);
                dst.put_u32(len);
                dst.extend_from_slice(&payload);
            }
            Frame::Eof { recipient } => {
                dst.reserve(5);
                dst.put_u8(EOF);
                dst.put_u32(recipient);
            }
            Frame::Close { recipient } => {
                dst.reserve(5);
                dst.put_u8(CLOSE);
                dst.put_u32(recipient);
            }
        }
        Ok(())
    }
}
