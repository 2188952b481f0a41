//! Peer list ("flatfile") generation.
//!
//! Workers find each other at boot from this list, so it must be computed
//! and written before the first worker starts.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::{ClusterSpec, HostAddr, LOOPBACK, PORTS_PER_WORKER};
use crate::error::Result;

pub const FLATFILE_NAME: &str = "flatfile.txt";

/// One worker endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub address: HostAddr,
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Every worker endpoint of a cloud, in launch order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerList {
    peers: Vec<Peer>,
}

impl PeerList {
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// Peers hosted on `host`
    pub fn on_host<'a>(&'a self, host: &'a HostAddr) -> impl Iterator<Item = &'a Peer> + 'a {
        self.peers.iter().filter(move |p| &p.address == host)
    }

    /// Flatfile text: one `address:port` per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for peer in &self.peers {
            out.push_str(&peer.to_string());
            out.push('\n');
        }
        out
    }
}

/// Enumerate `hosts × workers_per_host`, giving worker `i` on each host the
/// port `base_port + 2·i`.
pub fn compute(spec: &ClusterSpec) -> PeerList {
    let hosts: Vec<HostAddr> = if spec.hosts.is_empty() {
        vec![HostAddr::new(LOOPBACK)]
    } else {
        spec.hosts.clone()
    };

    let peers = hosts
        .iter()
        .flat_map(|host| {
            (0..spec.workers_per_host).map(move |i| Peer {
                address: host.clone(),
                port: spec.base_port + PORTS_PER_WORKER * i as u16,
            })
        })
        .collect();

    PeerList { peers }
}

/// Write the flatfile into `dir` and return its path.
pub fn write(peers: &PeerList, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(FLATFILE_NAME);
    fs::write(&path, peers.render())?;
    debug!("Wrote {} peer(s) to {}", peers.len(), path.display());
    Ok(path)
}
