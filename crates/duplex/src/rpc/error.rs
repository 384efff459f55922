use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::mux::MuxError;

#[derive(Debug, Error)]
pub enum CallError {
    /// Error reply produced by the remote handler.
    #[error("remote: {0}")]
    Remote(String),

    #[error("session: {0}")]
    Session(#[from] MuxError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("responder already replied")]
    AlreadyReplied,
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::Codec(CodecError::Json(e))
    }
}

impl CallError {
    /// True when the error came back from the remote handler rather than from
    /// the local side or the transport.
    pub fn is_remote(&self) -> bool {
        matches!(self, CallError::Remote(_))
    }

    /// The remote handler's message without the `remote: ` prefix.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            CallError::Remote(message) => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_are_marked() {
        let err = CallError::Remote("test".into());
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "remote: test");
        assert_eq!(err.remote_message(), Some("test"));
    }

    #[test]
    fn local_errors_are_not_remote() {
        let err = CallError::from(MuxError::SessionClosed);
        assert!(!err.is_remote());
        assert_eq!(err.remote_message(), None);
        assert_eq!(err.to_string(), "session: session closed");
    }
}
