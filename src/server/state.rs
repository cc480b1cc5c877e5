//! The server-wide context threaded into every connection and into the
//! master link, instead of reaching for module-level statics.

use crate::blocking::WaiterRegistry;
use crate::config::ServerConfig;
use crate::replication::ReplicaRegistry;
use crate::store::Store;
use crate::transaction::TxTable;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct ServerState {
    pub store: Store,
    pub waiters: WaiterRegistry,
    pub tx_table: TxTable,
    pub replicas: ReplicaRegistry,
    pub config: ServerConfig,
    /// Bytes consumed from the master link since handshake completion.
    /// Only meaningful when `config.role` is `Replica`.
    pub replica_offset: AtomicU64,
    next_session_id: AtomicU64,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        ServerState {
            store: Store::new(),
            waiters: WaiterRegistry::new(),
            tx_table: TxTable::new(),
            replicas: ReplicaRegistry::new(),
            config,
            replica_offset: AtomicU64::new(0),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}
