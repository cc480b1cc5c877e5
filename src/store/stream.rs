//! The stream value type: a strictly-ordered log of `(id, fields)` entries.

use crate::error::KvError;
use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// A stream entry ID: a pair of nonnegative 64-bit integers ordered
/// lexicographically by `(ms, seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: i64::MAX as u64,
        seq: i64::MAX as u64,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, KvError> {
        match s.split_once('-') {
            Some((ms, seq)) => {
                let ms: u64 = ms.parse().map_err(|_| KvError::InvalidStreamId)?;
                let seq: u64 = seq.parse().map_err(|_| KvError::InvalidStreamId)?;
                Ok(StreamId { ms, seq })
            }
            None => {
                let ms: u64 = s.parse().map_err(|_| KvError::InvalidStreamId)?;
                Ok(StreamId { ms, seq: 0 })
            }
        }
    }
}

/// An ID as specified by a caller, before resolution against the stream's
/// current state: either auto-generated entirely, auto-generated only in
/// the sequence part, or fully explicit.
#[derive(Debug, Clone, Copy)]
pub enum IdSpec {
    Auto,
    AutoSeq(u64),
    Explicit(StreamId),
}

impl FromStr for IdSpec {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, KvError> {
        if s == "*" {
            return Ok(IdSpec::Auto);
        }
        if let Some((ms, seq)) = s.split_once('-') {
            if seq == "*" {
                let ms: u64 = ms.parse().map_err(|_| KvError::InvalidStreamId)?;
                return Ok(IdSpec::AutoSeq(ms));
            }
            let ms: u64 = ms.parse().map_err(|_| KvError::InvalidStreamId)?;
            let seq: u64 = seq.parse().map_err(|_| KvError::InvalidStreamId)?;
            return Ok(IdSpec::Explicit(StreamId { ms, seq }));
        }
        let ms: u64 = s.parse().map_err(|_| KvError::InvalidStreamId)?;
        Ok(IdSpec::Explicit(StreamId { ms, seq: 0 }))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: IndexMap<Bytes, Bytes>,
}

/// A stream value: an ordered, append-only log keyed by strictly
/// increasing `StreamId`s.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    pub entries: BTreeMap<StreamId, StreamEntry>,
    pub last_generated_id: StreamId,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq_for(&self, ms: u64) -> u64 {
        if self.entries.is_empty() {
            return if ms == 0 { 1 } else { 0 };
        }
        if self.last_generated_id.ms == ms {
            self.last_generated_id.seq + 1
        } else if ms == 0 {
            1
        } else {
            0
        }
    }

    fn current_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Resolves an `IdSpec` into a concrete `StreamId`, validates it
    /// against the stream's invariants, and appends the entry.
    pub fn add_entry(
        &mut self,
        id_spec: IdSpec,
        fields: IndexMap<Bytes, Bytes>,
    ) -> Result<StreamId, KvError> {
        let id = match id_spec {
            IdSpec::Auto => {
                let ms = Self::current_millis();
                StreamId::new(ms, self.next_seq_for(ms))
            }
            IdSpec::AutoSeq(ms) => StreamId::new(ms, self.next_seq_for(ms)),
            IdSpec::Explicit(id) => id,
        };

        if id == StreamId::MIN {
            return Err(KvError::XaddIdTooSmall);
        }
        if !self.entries.is_empty() && id <= self.last_generated_id {
            return Err(KvError::XaddIdNotMonotonic);
        }

        self.entries.insert(id, StreamEntry { id, fields });
        self.last_generated_id = id;
        Ok(id)
    }

    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        self.entries
            .range(start..=end)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Entries strictly after `after`, in stream order.
    pub fn read_after(&self, after: StreamId) -> Vec<StreamEntry> {
        self.entries
            .range((
                std::ops::Bound::Excluded(after),
                std::ops::Bound::Unbounded,
            ))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&StreamEntry> {
        self.entries.values().next()
    }

    pub fn last(&self) -> Option<&StreamEntry> {
        self.entries.values().next_back()
    }
}

/// Parses an XRANGE boundary token. `for_start` selects whether a bare
/// millisecond token resolves to seq `0` (start) or seq `u64::MAX` (end).
pub fn parse_range_token(token: &str, for_start: bool) -> Result<StreamId, KvError> {
    match token {
        "-" => Ok(StreamId::MIN),
        "+" => Ok(StreamId::MAX),
        _ => {
            if let Some((ms, seq)) = token.split_once('-') {
                let ms: u64 = ms.parse().map_err(|_| KvError::InvalidStreamId)?;
                let seq: u64 = seq.parse().map_err(|_| KvError::InvalidStreamId)?;
                Ok(StreamId::new(ms, seq))
            } else {
                let ms: u64 = token.parse().map_err(|_| KvError::InvalidStreamId)?;
                Ok(StreamId::new(ms, if for_start { 0 } else { i64::MAX as u64 }))
            }
        }
    }
}
