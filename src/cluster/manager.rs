//! Cluster Manager
//!
//! Handles:
//! - Sandbox preparation and peer list distribution
//! - Worker launch, locally or on provisioned remote hosts
//! - Waiting for every worker to agree on the cloud size
//! - Best-effort teardown

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::flatfile::{self, PeerList};
use super::launcher::{self, RemoteShell};
use super::types::{ClusterSpec, ClusterState};
use crate::error::{HarnessError, Result};
use crate::node::NodeClient;
use crate::stabilize::{stabilize, PollOutcome};

/// Minimum time allowed for a cloud to form
pub const MIN_FORMATION_TIMEOUT: Duration = Duration::from_secs(60);
/// Extra formation time per expected worker on remote clouds
pub const FORMATION_SECS_PER_WORKER: u64 = 2;
const DEFAULT_QUORUM_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A launched cloud. The node list never changes after `start`.
#[derive(Debug)]
pub struct ClusterHandle {
    nodes: Vec<Arc<dyn NodeClient>>,
    expected_size: usize,
    state: ClusterState,
    peers: PeerList,
    sandbox: Option<PathBuf>,
    formed_at: Option<DateTime<Utc>>,
}

impl ClusterHandle {
    /// Wrap workers that are already running, e.g. a cloud started by hand.
    pub fn attach(nodes: Vec<Arc<dyn NodeClient>>, expected_size: usize) -> Self {
        Self {
            nodes,
            expected_size,
            state: ClusterState::Forming,
            peers: PeerList::default(),
            sandbox: None,
            formed_at: None,
        }
    }

    pub fn nodes(&self) -> &[Arc<dyn NodeClient>] {
        &self.nodes
    }

    /// Node `index`, for callers that drive one worker at a time
    pub fn node(&self, index: usize) -> Option<&Arc<dyn NodeClient>> {
        self.nodes.get(index)
    }

    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn peers(&self) -> &PeerList {
        &self.peers
    }

    pub fn sandbox(&self) -> Option<&Path> {
        self.sandbox.as_deref()
    }

    pub fn formed_at(&self) -> Option<DateTime<Utc>> {
        self.formed_at
    }
}

/// Formation timeout for `spec`: the 60s floor locally, grown by two
/// seconds per worker for remote clouds.
pub fn formation_timeout(spec: &ClusterSpec) -> Duration {
    if spec.is_local() {
        MIN_FORMATION_TIMEOUT
    } else {
        MIN_FORMATION_TIMEOUT.max(Duration::from_secs(
            FORMATION_SECS_PER_WORKER * spec.expected_size() as u64,
        ))
    }
}

/// Poll every node until all report `cloud_size == expected`. A single
/// dissenting or unreachable node keeps the cloud unformed.
pub async fn await_quorum(
    nodes: &[Arc<dyn NodeClient>],
    expected: usize,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    // with no nodes every size check passes vacuously
    if nodes.is_empty() {
        return Err(HarnessError::InvalidParam(format!(
            "no nodes to form a cloud of {} from",
            expected
        )));
    }
    let last_sizes: Mutex<Vec<Option<usize>>> = Mutex::new(vec![None; nodes.len()]);

    let result = stabilize(
        || async {
            let statuses = join_all(nodes.iter().map(|n| n.get_cloud_status())).await;
            let sizes: Vec<Option<usize>> = statuses
                .iter()
                .zip(nodes)
                .map(|(status, node)| match status {
                    Ok(s) => Some(s.cloud_size),
                    Err(e) => {
                        debug!("{} not answering yet: {}", node.endpoint(), e);
                        None
                    }
                })
                .collect();

            let formed = sizes.iter().all(|s| *s == Some(expected));
            if !formed {
                debug!("Cloud sizes {:?}, want {} everywhere", sizes, expected);
            }
            if let Ok(mut last) = last_sizes.lock() {
                *last = sizes;
            }
            Ok(if formed {
                PollOutcome::Done(())
            } else {
                PollOutcome::Pending
            })
        },
        &format!("cloud of {}", expected),
        timeout,
        interval,
    )
    .await;

    match result {
        Err(HarnessError::StabilizationTimeout { .. }) => {
            let last_sizes = last_sizes.lock().map(|s| s.clone()).unwrap_or_default();
            Err(HarnessError::ClusterFormationTimeout {
                expected,
                timeout,
                last_sizes,
            })
        }
        other => other,
    }
}

/// Builds, forms and tears down clouds. Owns the sandbox directory.
#[derive(Debug, Clone)]
pub struct ClusterManager {
    sandbox: PathBuf,
    poll_interval: Duration,
    formation_timeout: Option<Duration>,
}

impl Default for ClusterManager {
    fn default() -> Self {
        Self::new(PathBuf::from("sandbox"))
    }
}

impl ClusterManager {
    pub fn new(sandbox: PathBuf) -> Self {
        Self {
            sandbox,
            poll_interval: DEFAULT_QUORUM_POLL_INTERVAL,
            formation_timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replace the computed formation timeout
    pub fn with_formation_timeout(mut self, timeout: Duration) -> Self {
        self.formation_timeout = Some(timeout);
        self
    }

    pub fn sandbox(&self) -> &Path {
        &self.sandbox
    }

    fn clean_sandbox(&self) -> Result<()> {
        if self.sandbox.exists() {
            fs::remove_dir_all(&self.sandbox)?;
        }
        fs::create_dir_all(&self.sandbox)?;
        Ok(())
    }

    /// Launch every worker of `spec`. The handle comes back `Forming`.
    pub async fn start(&self, spec: &ClusterSpec) -> Result<ClusterHandle> {
        self.clean_sandbox()?;

        let peers = flatfile::compute(spec);
        // written before any worker exists, since discovery happens at boot
        let flatfile_path = flatfile::write(&peers, &self.sandbox)?;
        let worker_flatfile = spec.use_flatfile.then_some(flatfile_path.as_path());

        info!(
            "Starting cloud of {} ({} host(s), base port {})",
            spec.expected_size(),
            spec.hosts.len().max(1),
            spec.base_port
        );

        let mut handle = ClusterHandle {
            nodes: Vec::with_capacity(peers.len()),
            expected_size: spec.expected_size(),
            state: ClusterState::Unformed,
            peers: peers.clone(),
            sandbox: Some(self.sandbox.clone()),
            formed_at: None,
        };

        let launched = if spec.is_local() {
            self.launch_local(spec, &peers, worker_flatfile, &mut handle).await
        } else {
            self.launch_remote(spec, &peers, worker_flatfile, &mut handle).await
        };
        handle.state = ClusterState::Forming;

        if let Err(e) = launched {
            error!("Worker launch failed: {}", e);
            self.teardown(&mut handle).await;
            return Err(e);
        }
        Ok(handle)
    }

    async fn launch_local(
        &self,
        spec: &ClusterSpec,
        peers: &PeerList,
        flatfile: Option<&Path>,
        handle: &mut ClusterHandle,
    ) -> Result<()> {
        for peer in peers.iter() {
            let node = launcher::spawn_local(spec, peer, flatfile, &self.sandbox).await?;
            handle.nodes.push(Arc::new(node));
        }
        Ok(())
    }

    async fn launch_remote(
        &self,
        spec: &ClusterSpec,
        peers: &PeerList,
        flatfile: Option<&Path>,
        handle: &mut ClusterHandle,
    ) -> Result<()> {
        let shells: Vec<RemoteShell> = spec
            .hosts
            .iter()
            .map(|h| RemoteShell::new(h.clone(), spec.credentials.clone()))
            .collect();

        // every upload completes before the uploaded jar is launched anywhere
        for shell in &shells {
            launcher::provision_host(spec, shell, flatfile).await?;
        }
        for shell in &shells {
            for peer in peers.on_host(shell.host()) {
                let node = launcher::spawn_remote(spec, shell, peer).await?;
                handle.nodes.push(Arc::new(node));
            }
        }
        Ok(())
    }

    /// Wait for quorum. On timeout the handle stays `Forming`, so the
    /// caller can inspect the workers before tearing down.
    pub async fn await_formed(&self, handle: &mut ClusterHandle, timeout: Duration) -> Result<()> {
        match handle.state {
            ClusterState::Formed => return Ok(()),
            ClusterState::TornDown => {
                return Err(HarnessError::process("cloud already torn down"));
            }
            ClusterState::Unformed | ClusterState::Forming => {}
        }

        handle.state = ClusterState::Forming;
        await_quorum(&handle.nodes, handle.expected_size, timeout, self.poll_interval).await?;

        handle.state = ClusterState::Formed;
        handle.formed_at = Some(Utc::now());
        info!("Cloud of {} formed", handle.expected_size);
        Ok(())
    }

    /// `start` + `await_formed`. A failed build tears down whatever it
    /// started, since the caller never receives a handle to do it.
    pub async fn build(&self, spec: &ClusterSpec) -> Result<ClusterHandle> {
        let mut handle = self.start(spec).await?;
        let timeout = self.formation_timeout.unwrap_or_else(|| formation_timeout(spec));
        if let Err(e) = self.await_formed(&mut handle, timeout).await {
            error!("Cloud formation failed: {}", e);
            for log in launcher::sandbox_logs(&self.sandbox) {
                error!("Worker output kept in {}", log.display());
            }
            self.teardown(&mut handle).await;
            return Err(e);
        }
        Ok(handle)
    }

    /// Ask every worker to stop. Failures are logged, never returned;
    /// calling this again on a torn-down handle does nothing.
    pub async fn teardown(&self, handle: &mut ClusterHandle) {
        if handle.state == ClusterState::TornDown {
            debug!("Cloud already torn down");
            return;
        }

        info!("Tearing down cloud of {} worker(s)", handle.nodes.len());
        let results = join_all(handle.nodes.iter().map(|n| n.shutdown())).await;
        for (node, result) in handle.nodes.iter().zip(results) {
            if let Err(e) = result {
                warn!("Worker {} did not shut down cleanly: {}", node.endpoint(), e);
            }
        }
        handle.state = ClusterState::TornDown;
    }
}
