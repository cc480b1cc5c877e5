//! The typed, TTL-aware key space: strings, lists, and streams behind a
//! single mutex, per the concurrency model's single-writer-per-component
//! rule (no sharding — this crate's scope never needs it).

pub mod stream;

use crate::error::KvError;
use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use stream::{IdSpec, Stream, StreamEntry, StreamId};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum DataValue {
    String(Bytes),
    List(VecDeque<Bytes>),
    Stream(Stream),
}

impl DataValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::List(_) => "list",
            DataValue::Stream(_) => "stream",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    data: DataValue,
    expiry: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<Bytes, StoredValue>,
}

impl StoreInner {
    /// Removes `key` if it is present and expired relative to `now`.
    /// Returns `true` if the key was live immediately beforehand.
    fn reap_if_expired(&mut self, key: &Bytes, now: Instant) {
        let expired = self.entries.get(key).is_some_and(|v| v.is_expired(now));
        if expired {
            self.entries.remove(key);
        }
    }

    fn get_live(&mut self, key: &Bytes) -> Option<&StoredValue> {
        let now = Instant::now();
        self.reap_if_expired(key, now);
        self.entries.get(key)
    }

    fn get_live_mut(&mut self, key: &Bytes) -> Option<&mut StoredValue> {
        let now = Instant::now();
        self.reap_if_expired(key, now);
        self.entries.get_mut(key)
    }
}

/// The shared key space. Every operation takes the single internal mutex
/// for the duration of its (short) critical section; no I/O happens while
/// the lock is held.
#[derive(Default)]
pub struct Store {
    inner: Mutex<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &Bytes) -> Result<Option<Bytes>, KvError> {
        let mut inner = self.inner.lock().await;
        match inner.get_live(key) {
            None => Ok(None),
            Some(v) => match &v.data {
                DataValue::String(s) => Ok(Some(s.clone())),
                _ => Err(KvError::WrongType),
            },
        }
    }

    pub async fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().await;
        let expiry = ttl.map(|d| Instant::now() + d);
        inner.entries.insert(
            key,
            StoredValue {
                data: DataValue::String(value),
                expiry,
            },
        );
    }

    pub async fn incr(&self, key: &Bytes) -> Result<i64, KvError> {
        let mut inner = self.inner.lock().await;
        let current: i64 = match inner.get_live(key) {
            None => 0,
            Some(v) => match &v.data {
                DataValue::String(s) => std::str::from_utf8(s)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or(KvError::NotAnInteger)?,
                _ => return Err(KvError::WrongType),
            },
        };
        let next = current
            .checked_add(1)
            .ok_or(KvError::NotAnInteger)?;
        let expiry = inner.entries.get(key).and_then(|v| v.expiry);
        inner.entries.insert(
            key.clone(),
            StoredValue {
                data: DataValue::String(Bytes::from(next.to_string())),
                expiry,
            },
        );
        Ok(next)
    }

    pub async fn type_of(&self, key: &Bytes) -> &'static str {
        let mut inner = self.inner.lock().await;
        match inner.get_live(key) {
            None => "none",
            Some(v) => v.data.type_name(),
        }
    }

    /// `true` if this push created (rather than mutated) the list, so the
    /// caller can decide whether/how many waiters to signal is always
    /// `values.len()` regardless of creation.
    pub async fn rpush(&self, key: &Bytes, values: Vec<Bytes>) -> Result<usize, KvError> {
        let mut inner = self.inner.lock().await;
        let list = Self::list_mut_or_create(&mut inner, key)?;
        list.extend(values);
        Ok(list.len())
    }

    pub async fn lpush(&self, key: &Bytes, values: Vec<Bytes>) -> Result<usize, KvError> {
        let mut inner = self.inner.lock().await;
        let list = Self::list_mut_or_create(&mut inner, key)?;
        for v in values {
            list.push_front(v);
        }
        Ok(list.len())
    }

    fn list_mut_or_create<'a>(
        inner: &'a mut StoreInner,
        key: &Bytes,
    ) -> Result<&'a mut VecDeque<Bytes>, KvError> {
        inner.reap_if_expired(key, Instant::now());
        let entry = inner.entries.entry(key.clone()).or_insert_with(|| StoredValue {
            data: DataValue::List(VecDeque::new()),
            expiry: None,
        });
        match &mut entry.data {
            DataValue::List(list) => Ok(list),
            _ => Err(KvError::WrongType),
        }
    }

    /// Pops up to `n` elements from the head. `None` if the key is absent;
    /// the key is deleted if the list becomes empty.
    pub async fn lpop(&self, key: &Bytes, n: usize) -> Result<Option<Vec<Bytes>>, KvError> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.get_live_mut(key) else {
            return Ok(None);
        };
        let list = match &mut stored.data {
            DataValue::List(l) => l,
            _ => return Err(KvError::WrongType),
        };
        let take = n.min(list.len());
        let popped: Vec<Bytes> = list.drain(..take).collect();
        if list.is_empty() {
            inner.entries.remove(key);
        }
        Ok(Some(popped))
    }

    pub async fn lrange(&self, key: &Bytes, start: i64, stop: i64) -> Result<Vec<Bytes>, KvError> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.get_live(key) else {
            return Ok(Vec::new());
        };
        let list = match &stored.data {
            DataValue::List(l) => l,
            _ => return Err(KvError::WrongType),
        };
        let len = list.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }
        let resolve = |idx: i64| -> i64 {
            if idx < 0 { (len + idx).max(0) } else { idx }
        };
        let start = resolve(start);
        let mut stop = resolve(stop);
        if stop >= len {
            stop = len - 1;
        }
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    pub async fn llen(&self, key: &Bytes) -> Result<usize, KvError> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.get_live(key) else {
            return Ok(0);
        };
        match &stored.data {
            DataValue::List(l) => Ok(l.len()),
            _ => Err(KvError::WrongType),
        }
    }

    pub async fn xadd(
        &self,
        key: &Bytes,
        id_spec: IdSpec,
        fields: IndexMap<Bytes, Bytes>,
    ) -> Result<StreamId, KvError> {
        let mut inner = self.inner.lock().await;
        inner.reap_if_expired(key, Instant::now());
        let entry = inner.entries.entry(key.clone()).or_insert_with(|| StoredValue {
            data: DataValue::Stream(Stream::new()),
            expiry: None,
        });
        match &mut entry.data {
            DataValue::Stream(stream) => stream.add_entry(id_spec, fields),
            _ => Err(KvError::WrongType),
        }
    }

    pub async fn xrange(
        &self,
        key: &Bytes,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>, KvError> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.get_live(key) else {
            return Ok(Vec::new());
        };
        match &stored.data {
            DataValue::Stream(s) => Ok(s.range(start, end)),
            _ => Err(KvError::WrongType),
        }
    }

    pub async fn xread_one(
        &self,
        key: &Bytes,
        after: StreamId,
    ) -> Result<Vec<StreamEntry>, KvError> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.get_live(key) else {
            return Ok(Vec::new());
        };
        match &stored.data {
            DataValue::Stream(s) => Ok(s.read_after(after)),
            _ => Err(KvError::WrongType),
        }
    }

    /// Resolves the `$` cursor for XREAD: the stream's current
    /// last-generated ID, or `(0,0)` if the stream doesn't exist.
    pub async fn xlast_id(&self, key: &Bytes) -> Result<StreamId, KvError> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.get_live(key) else {
            return Ok(StreamId::MIN);
        };
        match &stored.data {
            DataValue::Stream(s) => Ok(s.last_generated_id),
            _ => Err(KvError::WrongType),
        }
    }

    pub async fn xinfo(
        &self,
        key: &Bytes,
    ) -> Result<Option<(usize, StreamId, Option<StreamEntry>, Option<StreamEntry>)>, KvError> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.get_live(key) else {
            return Ok(None);
        };
        match &stored.data {
            DataValue::Stream(s) => Ok(Some((
                s.len(),
                s.last_generated_id,
                s.first().cloned(),
                s.last().cloned(),
            ))),
            _ => Err(KvError::WrongType),
        }
    }
}
