//! Streaming RESP encoder/decoder over `bytes::BytesMut`, composed into a
//! `tokio_util::codec::Framed` the same way the rest of the ambient stack's
//! protocol layers are wired up.

use crate::error::KvError;
use crate::protocol::frame::RespFrame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

/// The master's reply to `PSYNC`: a `+FULLRESYNC <id> <offset>\r\n` line
/// immediately followed by a bulk-length header and the raw RDB bytes with
/// **no** trailing CRLF. This is encoded through a dedicated `Encoder` impl
/// because it doesn't fit the ordinary bulk-string shape.
#[derive(Debug, Clone)]
pub struct FullResyncReply {
    pub replication_id: String,
    pub offset: u64,
    pub rdb: Bytes,
}

impl Decoder for RespCodec {
    type Item = RespFrame;
    type Error = KvError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RespFrame>, KvError> {
        match parse_frame(buf) {
            Ok(Some((frame, consumed))) => {
                buf.advance(consumed);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(KvError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Encoder<RespFrame> for RespCodec {
    type Error = KvError;

    fn encode(&mut self, frame: RespFrame, dst: &mut BytesMut) -> Result<(), KvError> {
        encode_frame(&frame, dst);
        Ok(())
    }
}

impl Encoder<FullResyncReply> for RespCodec {
    type Error = KvError;

    fn encode(&mut self, reply: FullResyncReply, dst: &mut BytesMut) -> Result<(), KvError> {
        encode_full_resync(&reply, dst);
        Ok(())
    }
}

fn encode_full_resync(reply: &FullResyncReply, dst: &mut BytesMut) {
    dst.put_slice(b"+FULLRESYNC ");
    dst.put_slice(reply.replication_id.as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(reply.offset.to_string().as_bytes());
    dst.put_slice(CRLF);
    dst.put_u8(b'$');
    dst.put_slice(reply.rdb.len().to_string().as_bytes());
    dst.put_slice(CRLF);
    dst.put_slice(&reply.rdb);
}

/// Encodes a `FullResyncReply` standalone, for handing off raw bytes
/// outside of a `Framed` sink (the PSYNC connection handoff).
pub fn encode_full_resync_to_vec(reply: &FullResyncReply) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_full_resync(reply, &mut buf);
    buf.to_vec()
}

/// Encodes a single `RespFrame` into a freshly allocated byte vector.
/// Used by the replication layer, which needs the exact encoded length of
/// a broadcast frame before (or independently of) writing it into a
/// connection's codec buffer.
pub fn encode_to_vec(frame: &RespFrame) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf);
    buf.to_vec()
}

fn encode_frame(frame: &RespFrame, dst: &mut BytesMut) {
    match frame {
        RespFrame::SimpleString(s) => {
            dst.put_u8(b'+');
            dst.put_slice(s.as_bytes());
            dst.put_slice(CRLF);
        }
        RespFrame::Error(s) => {
            dst.put_u8(b'-');
            dst.put_slice(s.as_bytes());
            dst.put_slice(CRLF);
        }
        RespFrame::Integer(n) => {
            dst.put_u8(b':');
            dst.put_slice(n.to_string().as_bytes());
            dst.put_slice(CRLF);
        }
        RespFrame::NullBulkString => {
            dst.put_slice(b"$-1\r\n");
        }
        RespFrame::BulkString(b) => {
            dst.put_u8(b'$');
            dst.put_slice(b.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            dst.put_slice(b);
            dst.put_slice(CRLF);
        }
        RespFrame::NullArray => {
            dst.put_slice(b"*-1\r\n");
        }
        RespFrame::Array(items) => {
            dst.put_u8(b'*');
            dst.put_slice(items.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            for item in items {
                encode_frame(item, dst);
            }
        }
    }
}

/// Finds the offset of the first `\r\n` in `buf[from..]`, relative to `from`.
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

/// Parses one line (without the trailing CRLF) starting at `pos`. Returns
/// the line's bytes and the offset just past its CRLF.
fn read_line(buf: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>, KvError> {
    match find_crlf(buf, pos) {
        Some(end) => Ok(Some((&buf[pos..end], end + 2))),
        None => Ok(None),
    }
}

/// Attempts to parse exactly one RESP value starting at offset 0 of `buf`.
/// Returns `Ok(Some((frame, bytes_consumed)))` on success, `Ok(None)` (or
/// equivalently `Err(KvError::Incomplete)`) when more bytes are needed.
fn parse_frame(buf: &[u8]) -> Result<Option<(RespFrame, usize)>, KvError> {
    if buf.is_empty() {
        return Ok(None);
    }
    parse_value(buf, 0).map(|opt| opt.map(|(frame, end)| (frame, end)))
}

fn parse_value(buf: &[u8], pos: usize) -> Result<Option<(RespFrame, usize)>, KvError> {
    if pos >= buf.len() {
        return Ok(None);
    }
    let prefix = buf[pos];
    let Some((line, after_line)) = read_line(buf, pos + 1)? else {
        return Ok(None);
    };

    match prefix {
        b'+' => {
            let s = std::str::from_utf8(line)?.to_string();
            Ok(Some((RespFrame::SimpleString(s), after_line)))
        }
        b'-' => {
            let s = std::str::from_utf8(line)?.to_string();
            Ok(Some((RespFrame::Error(s), after_line)))
        }
        b':' => {
            let s = std::str::from_utf8(line)?;
            let n: i64 = s
                .parse()
                .map_err(|_| KvError::Protocol("invalid integer".into()))?;
            Ok(Some((RespFrame::Integer(n), after_line)))
        }
        b'$' => {
            let s = std::str::from_utf8(line)?;
            let len: i64 = s
                .parse()
                .map_err(|_| KvError::Protocol("invalid bulk length".into()))?;
            if len == -1 {
                return Ok(Some((RespFrame::NullBulkString, after_line)));
            }
            if len < 0 {
                return Err(KvError::Protocol("negative bulk length".into()));
            }
            let len = len as usize;
            let data_end = after_line + len;
            let total_end = data_end + 2;
            if buf.len() < total_end {
                return Ok(None);
            }
            if &buf[data_end..total_end] != CRLF {
                return Err(KvError::Protocol("bulk string missing terminator".into()));
            }
            let data = Bytes::copy_from_slice(&buf[after_line..data_end]);
            Ok(Some((RespFrame::BulkString(data), total_end)))
        }
        b'*' => {
            let s = std::str::from_utf8(line)?;
            let count: i64 = s
                .parse()
                .map_err(|_| KvError::Protocol("invalid array length".into()))?;
            if count == -1 {
                return Ok(Some((RespFrame::NullArray, after_line)));
            }
            if count < 0 {
                return Err(KvError::Protocol("negative array length".into()));
            }
            let mut items = Vec::with_capacity(count as usize);
            let mut cursor = after_line;
            for _ in 0..count {
                match parse_value(buf, cursor)? {
                    Some((item, new_cursor)) => {
                        items.push(item);
                        cursor = new_cursor;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespFrame::Array(items), cursor)))
        }
        other => Err(KvError::Protocol(format!(
            "invalid frame prefix byte {other:#04x}"
        ))),
    }
}
