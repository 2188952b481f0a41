//! Cluster Lifecycle
//!
//! Everything between a resolved `ClusterSpec` and a formed cloud:
//! - `types`: spec, host addressing, formation state
//! - `flatfile`: deterministic peer list
//! - `launcher`: local processes and ssh/scp provisioning
//! - `manager`: start, quorum, teardown

pub mod flatfile;
pub mod launcher;
pub mod manager;
pub mod types;

pub use flatfile::{Peer, PeerList};
pub use manager::{await_quorum, formation_timeout, ClusterHandle, ClusterManager};
pub use types::{ClusterSpec, ClusterState, Credentials, HostAddr, WorkerBinary};
