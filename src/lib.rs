pub mod cli;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod stabilize;

// Re-export common types
pub use cluster::{ClusterHandle, ClusterManager, ClusterSpec, ClusterState};
pub use config::{ConfigOverrides, ConfigSource};
pub use error::{HarnessError, Result};
pub use node::NodeClient;
pub use stabilize::{stabilize, stabilize_job, PollOutcome, ProgressInvariants};
