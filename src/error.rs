//! The crate-wide error type.

use std::num::{ParseFloatError, ParseIntError};
use std::str::Utf8Error;
use std::sync::Arc;

/// Every failure mode a command handler, the codec, or the replication
/// machinery can produce. Rendered to its exact RESP wire string via
/// `Display` at the connection boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    #[error("ERR {0}")]
    Generic(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR invalid expire time in 'set' command")]
    InvalidExpire,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("ERR timeout is negative")]
    NegativeTimeout,

    #[error("ERR Unbalanced 'xread' list of streams: for each stream key an ID must be specified.")]
    UnbalancedXread,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    XaddIdTooSmall,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    XaddIdNotMonotonic,

    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error(transparent)]
    Io(#[from] Arc<std::io::Error>),

    /// Signalled by the codec's `Decoder` when a buffer holds a partial
    /// frame. Never surfaces to a client; it tells the `Framed` adapter to
    /// wait for more bytes rather than treating the input as malformed.
    #[error("incomplete frame")]
    Incomplete,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for KvError {
    fn from(e: std::io::Error) -> Self {
        KvError::Io(Arc::new(e))
    }
}

impl From<ParseIntError> for KvError {
    fn from(_: ParseIntError) -> Self {
        KvError::NotAnInteger
    }
}

impl From<ParseFloatError> for KvError {
    fn from(_: ParseFloatError) -> Self {
        KvError::NotAnInteger
    }
}

impl From<Utf8Error> for KvError {
    fn from(_: Utf8Error) -> Self {
        KvError::Protocol("invalid utf-8".into())
    }
}

impl PartialEq for KvError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
