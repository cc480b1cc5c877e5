//! Per-connection transaction state: the MULTI/EXEC/DISCARD queue.

use bytes::Bytes;
use dashmap::DashMap;

/// A single queued command: its upper-cased name and raw argument bytes,
/// exactly as received, so it can be re-parsed and executed later.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub name: String,
    pub args: Vec<Bytes>,
}

#[derive(Debug, Default)]
struct TxState {
    in_transaction: bool,
    queue: Vec<QueuedCommand>,
}

/// The table of per-connection transaction contexts, keyed by connection
/// (session) id. One entry is created lazily on first use and removed
/// when the connection closes.
#[derive(Default)]
pub struct TxTable {
    sessions: DashMap<u64, TxState>,
}

impl TxTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, session_id: u64) {
        let mut state = self.sessions.entry(session_id).or_default();
        state.in_transaction = true;
        state.queue.clear();
    }

    pub fn is_in_transaction(&self, session_id: u64) -> bool {
        self.sessions
            .get(&session_id)
            .is_some_and(|s| s.in_transaction)
    }

    pub fn enqueue(&self, session_id: u64, command: QueuedCommand) {
        let mut state = self.sessions.entry(session_id).or_default();
        state.queue.push(command);
    }

    /// Ends the transaction, returning the queued commands in order, or
    /// `None` if the connection was not in a transaction.
    pub fn take_for_exec(&self, session_id: u64) -> Option<Vec<QueuedCommand>> {
        let mut entry = self.sessions.get_mut(&session_id)?;
        if !entry.in_transaction {
            return None;
        }
        entry.in_transaction = false;
        Some(std::mem::take(&mut entry.queue))
    }

    /// Ends the transaction without returning anything (DISCARD).
    /// Returns `false` if the connection was not in a transaction.
    pub fn discard(&self, session_id: u64) -> bool {
        let Some(mut entry) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        if !entry.in_transaction {
            return false;
        }
        entry.in_transaction = false;
        entry.queue.clear();
        true
    }

    pub fn remove_session(&self, session_id: u64) {
        self.sessions.remove(&session_id);
    }
}
