//! Cluster Types
//!
//! Resolved cluster description and lifecycle state:
//! - Host addressing and remote credentials
//! - The immutable `ClusterSpec` produced by config resolution
//! - Formation state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Address every local worker binds to and the loopback-only config value.
pub const LOOPBACK: &str = "127.0.0.1";

/// Ports claimed per worker: one control, one data.
pub const PORTS_PER_WORKER: u16 = 2;

/// A host that runs workers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAddr(pub String);

impl HostAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Login used for binary upload and worker launch on remote hosts
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

// keep passwords out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// How a worker process is started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerBinary {
    /// JVM launcher
    pub java: String,
    /// Worker archive, uploaded to remote hosts before launch
    pub jar: PathBuf,
}

impl Default for WorkerBinary {
    fn default() -> Self {
        Self {
            java: "java".to_string(),
            jar: PathBuf::from("target/h2o.jar"),
        }
    }
}

/// Fully resolved cluster description. Never mutated after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Worker processes started on each host
    pub workers_per_host: usize,
    /// Remote hosts; empty means every worker runs locally on loopback
    pub hosts: Vec<HostAddr>,
    /// First port of the cluster's range
    pub base_port: u16,
    /// Hand every worker the peer list instead of relying on multicast discovery
    pub use_flatfile: bool,
    pub use_hdfs: bool,
    pub hdfs_name_node: Option<String>,
    /// Passed through to the worker JVM as `-Xmx<n>g`
    pub java_heap_gb: Option<u32>,
    pub credentials: Option<Credentials>,
    /// Enable host-resource stats collection on the workers
    pub sigar: bool,
    /// Stretch the upload timeout for hosts behind slow links
    pub slow_connection: bool,
    /// Put worker ice roots under the remote user's home instead of /tmp
    pub use_home_for_ice: bool,
    pub worker: WorkerBinary,
}

impl ClusterSpec {
    /// Local mode skips every remote-provisioning step.
    pub fn is_local(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Quorum size every worker must report before the cloud counts as formed.
    pub fn expected_size(&self) -> usize {
        self.workers_per_host * self.hosts.len().max(1)
    }
}

/// Formation state of one cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    /// Nothing started yet
    Unformed,
    /// Workers launched, waiting for quorum
    Forming,
    /// Every worker reports the expected cloud size
    Formed,
    /// Terminal
    TornDown,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Unformed => write!(f, "UNFORMED"),
            ClusterState::Forming => write!(f, "FORMING"),
            ClusterState::Formed => write!(f, "FORMED"),
            ClusterState::TornDown => write!(f, "TORN_DOWN"),
        }
    }
}
