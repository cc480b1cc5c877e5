//! Master-side bookkeeping: attached replica sinks, the master offset, and
//! the ack condition `WAIT` rendezvous on.

use crate::protocol::{RespFrame, encode_to_vec};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

struct ReplicaEntry {
    sink: Arc<Mutex<OwnedWriteHalf>>,
    acked_offset: AtomicU64,
}

/// Tracks every replica attached via PSYNC, the master's cumulative write
/// offset, and the condition variable `WAIT` parks on.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: DashMap<u64, ReplicaEntry>,
    master_offset: AtomicU64,
    ack_event: Notify,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection_id: u64, sink: OwnedWriteHalf) {
        self.replicas.insert(
            connection_id,
            ReplicaEntry {
                sink: Arc::new(Mutex::new(sink)),
                acked_offset: AtomicU64::new(0),
            },
        );
    }

    pub fn remove(&self, connection_id: u64) {
        self.replicas.remove(&connection_id);
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn master_offset(&self) -> u64 {
        self.master_offset.load(Ordering::SeqCst)
    }

    /// Encodes a write command as a RESP array and broadcasts it to every
    /// attached replica, best-effort; then advances the master offset by
    /// the frame's byte length.
    pub async fn propagate(&self, name: &str, args: &[bytes::Bytes]) {
        let mut parts: Vec<bytes::Bytes> = vec![bytes::Bytes::copy_from_slice(
            name.to_ascii_uppercase().as_bytes(),
        )];
        parts.extend(args.iter().cloned());
        let frame = RespFrame::array_of_bulks(parts);
        let encoded = encode_to_vec(&frame);
        self.write_to_all(&encoded).await;
        self.master_offset
            .fetch_add(encoded.len() as u64, Ordering::SeqCst);
    }

    /// Broadcasts `REPLCONF GETACK *` to every attached replica. This does
    /// not advance `master_offset`: that counter only accounts for
    /// propagated write frames, not control frames.
    pub async fn broadcast_getack(&self) {
        let frame = RespFrame::array_of_bulks(["REPLCONF", "GETACK", "*"]);
        let encoded = encode_to_vec(&frame);
        self.write_to_all(&encoded).await;
    }

    async fn write_to_all(&self, encoded: &[u8]) {
        let sinks: Vec<(u64, Arc<Mutex<OwnedWriteHalf>>)> = self
            .replicas
            .iter()
            .map(|e| (*e.key(), e.value().sink.clone()))
            .collect();
        for (id, sink) in sinks {
            let mut guard = sink.lock().await;
            if let Err(e) = guard.write_all(encoded).await {
                warn!("failed to propagate to replica {id}: {e}; leaving it attached for next cycle");
            }
        }
    }

    /// Called by each replica's dedicated ack-reader task whenever it
    /// parses a `REPLCONF ACK <offset>` frame on that replica's socket.
    pub fn update_ack(&self, connection_id: u64, offset: u64) {
        if let Some(entry) = self.replicas.get(&connection_id) {
            entry.acked_offset.store(offset, Ordering::SeqCst);
        }
        self.ack_event.notify_waiters();
    }

    fn count_acked_at_least(&self, target: u64) -> usize {
        self.replicas
            .iter()
            .filter(|e| e.value().acked_offset.load(Ordering::SeqCst) >= target)
            .count()
    }

    /// Implements `WAIT numreplicas timeout`.
    pub async fn wait_for_replication(&self, numreplicas: usize, timeout: Duration) -> usize {
        if self.replica_count() == 0 {
            return 0;
        }
        let target = self.master_offset();
        if target == 0 {
            return self.replica_count();
        }

        self.broadcast_getack().await;

        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.ack_event.notified();
            let count = self.count_acked_at_least(target);
            if count >= numreplicas {
                return count;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.count_acked_at_least(target);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => {
                    return self.count_acked_at_least(target);
                }
            }
        }
    }
}
