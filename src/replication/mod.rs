//! Replication: the master-side registry of attached replicas plus the
//! WAIT rendezvous, and the replica-side link to a configured master.

mod master_link;
mod registry;

pub use master_link::run_master_link;
pub use registry::ReplicaRegistry;
