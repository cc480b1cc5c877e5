//! Per-key FIFO wake-up for blocking reads (BLPOP, XREAD BLOCK).
//!
//! Unlike a hand-off design where the producer pops a value and gives it
//! directly to the woken waiter, this registry only *signals* — the woken
//! caller re-attempts its own read. That's deliberate: a signal can race
//! with another waiter's re-attempt, in which case the loser finds nothing
//! and behaves as if it had timed out. Handing values over directly would
//! make that race impossible to express.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

struct Waiter {
    id: u64,
    signal: oneshot::Sender<()>,
}

/// A FIFO queue of waiters per key, plus the machinery to register,
/// unregister, and fairly signal them.
#[derive(Default)]
pub struct WaiterRegistry {
    waiters: DashMap<Bytes, VecDeque<Waiter>>,
    next_id: AtomicU64,
}

/// A handle returned by `register`, used to `unregister` on every exit
/// path (woken, timed out, or the connection dropping).
pub struct WaiterHandle {
    key: Bytes,
    id: u64,
    receiver: oneshot::Receiver<()>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new waiter for `key` and returns a handle to await the
    /// signal on. Must be called before releasing whatever lock protects
    /// the non-blocking check, so a push landing in between can't be missed.
    pub fn register(&self, key: Bytes) -> WaiterHandle {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.waiters.entry(key.clone()).or_default();
        entry.push_back(Waiter { id, signal: tx });
        WaiterHandle { key, id, receiver: rx }
    }

    /// Removes a specific waiter. Safe to call even if it was already
    /// popped and signaled by `notify` (no-op in that case, since its `id`
    /// will simply no longer be found in the queue).
    pub fn unregister(&self, handle: &WaiterHandle) {
        let mut now_empty = false;
        if let Some(mut queue) = self.waiters.get_mut(&handle.key) {
            queue.retain(|w| w.id != handle.id);
            now_empty = queue.is_empty();
        }
        if now_empty {
            self.waiters.remove(&handle.key);
        }
    }

    /// Pops up to `n` waiters from the head of `key`'s queue and signals
    /// each. Returns the number actually signaled (may be less than `n`
    /// if fewer waiters were queued).
    pub fn notify(&self, key: &Bytes, n: usize) -> usize {
        let Some(mut queue) = self.waiters.get_mut(key) else {
            return 0;
        };
        let mut woken = 0;
        for _ in 0..n {
            let Some(waiter) = queue.pop_front() else {
                break;
            };
            // A send failure means the waiter already gave up (timed out
            // or was dropped); it still counts as "signaled" for fairness
            // purposes since the slot in FIFO order was consumed by it.
            let _ = waiter.signal.send(());
            woken += 1;
        }
        let now_empty = queue.is_empty();
        drop(queue);
        if now_empty {
            self.waiters.remove(key);
        }
        woken
    }
}

impl WaiterHandle {
    pub async fn wait(self) {
        let _ = self.receiver.await;
    }

    pub fn receiver_mut(&mut self) -> &mut oneshot::Receiver<()> {
        &mut self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fairness_wakes_exactly_min_m_n() {
        let registry = WaiterRegistry::new();
        let key = Bytes::from_static(b"k");
        let mut handles = Vec::new();
        for _ in 0..3 {
            handles.push(registry.register(key.clone()));
        }

        let woken = registry.notify(&key, 2);
        assert_eq!(woken, 2);

        let mut h = handles.into_iter();
        let w1 = h.next().unwrap();
        let w2 = h.next().unwrap();
        let w3 = h.next().unwrap();

        tokio::time::timeout(std::time::Duration::from_millis(50), w1.wait())
            .await
            .expect("first waiter should be signaled");
        tokio::time::timeout(std::time::Duration::from_millis(50), w2.wait())
            .await
            .expect("second waiter should be signaled");
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), w3.wait())
                .await
                .is_err(),
            "third waiter must remain blocked"
        );
    }

    #[tokio::test]
    async fn unregister_after_timeout_is_a_no_op() {
        let registry = WaiterRegistry::new();
        let key = Bytes::from_static(b"k");
        let handle = registry.register(key.clone());
        registry.unregister(&handle);
        assert_eq!(registry.notify(&key, 1), 0);
    }
}
