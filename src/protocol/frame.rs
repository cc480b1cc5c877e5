//! The RESP value model.

use bytes::Bytes;

/// A single RESP value, decoded from or destined for the wire.
///
/// Only the five RESP2 shapes the command set needs are represented;
/// RESP3 types (maps, sets, booleans, doubles, ...) have no use here.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<RespFrame>),
    NullArray,
}

impl RespFrame {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespFrame::BulkString(data.into())
    }

    pub fn array_of_bulks<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespFrame::Array(
            items
                .into_iter()
                .map(|b| RespFrame::BulkString(b.into()))
                .collect(),
        )
    }

    /// Extracts the argument vector from a well-formed client request: a
    /// RESP array of bulk strings. `None` if the shape doesn't match.
    pub fn as_command_args(&self) -> Option<Vec<Bytes>> {
        match self {
            RespFrame::Array(items) => items
                .iter()
                .map(|f| match f {
                    RespFrame::BulkString(b) => Some(b.clone()),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}
