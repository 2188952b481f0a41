//! Configuration Resolution
//!
//! Turns a host configuration document plus caller overrides into a
//! `ClusterSpec`. Precedence, highest first:
//! - explicit `ConfigOverrides`
//! - values present in the document
//! - built-in defaults
//!
//! Resolution is pure apart from reading the document and drawing the
//! random base-port offset.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cluster::types::{
    ClusterSpec, Credentials, HostAddr, WorkerBinary, LOOPBACK, PORTS_PER_WORKER,
};
use crate::error::{HarnessError, Result};

/// Start of the default port window; kept clear of a demo cloud on 54321.
pub const DEFAULT_BASE_PORT: u16 = 55300;
/// Width of the random offset added to `DEFAULT_BASE_PORT` so back-to-back
/// runs are less likely to hit ports still held by a previous cloud.
pub const BASE_PORT_JITTER: u16 = 31;

/// Where the host configuration document comes from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Look for `name` (or the per-user default) in the search locations
    Search { name: Option<String> },
    /// Read exactly this file
    Path(PathBuf),
    /// Document given as a JSON string
    Inline(String),
    /// No document; defaults and overrides only
    Defaults,
}

/// Caller-supplied values that beat anything in the document
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub workers_per_host: Option<usize>,
    pub base_port: Option<u16>,
    pub use_flatfile: Option<bool>,
    pub use_hdfs: Option<bool>,
    pub hdfs_name_node: Option<String>,
    pub java_heap_gb: Option<u32>,
    pub sigar: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum IpList {
    One(String),
    Many(Vec<String>),
}

impl IpList {
    fn into_vec(self) -> Vec<String> {
        match self {
            IpList::One(ip) => vec![ip],
            IpList::Many(ips) => ips,
        }
    }
}

/// On-disk shape of the host configuration. Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HostDocument {
    #[serde(default = "default_ip")]
    ip: IpList,
    #[serde(default = "default_per_host")]
    h2o_per_host: usize,
    #[serde(default)]
    base_port: Option<u16>,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    use_flatfile: bool,
    #[serde(default)]
    use_hdfs: bool,
    #[serde(default = "default_name_node")]
    hdfs_name_node: String,
    #[serde(default, rename = "java_heap_GB")]
    java_heap_gb: Option<u32>,
    #[serde(default)]
    sigar: bool,
    #[serde(default)]
    slow_connection: bool,
    #[serde(default)]
    use_home_for_ice: bool,
    #[serde(default = "default_java")]
    java: String,
    #[serde(default = "default_jar")]
    jar: PathBuf,
}

impl Default for HostDocument {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            h2o_per_host: default_per_host(),
            base_port: None,
            username: String::new(),
            password: None,
            use_flatfile: false,
            use_hdfs: false,
            hdfs_name_node: default_name_node(),
            java_heap_gb: None,
            sigar: false,
            slow_connection: false,
            use_home_for_ice: false,
            java: default_java(),
            jar: default_jar(),
        }
    }
}

fn default_ip() -> IpList {
    IpList::Many(vec![LOOPBACK.to_string()])
}

fn default_per_host() -> usize {
    2
}

fn default_name_node() -> String {
    "192.168.1.151".to_string()
}

fn default_java() -> String {
    WorkerBinary::default().java
}

fn default_jar() -> PathBuf {
    WorkerBinary::default().jar
}

/// Per-user document name, e.g. `harness_config-alice.json`.
pub fn default_config_name() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("harness_config-{}.json", user)
}

/// Locations searched for `name`, in order.
pub fn search_paths(name: &str) -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from(name),
        PathBuf::from("testdir_hosts").join(name),
    ];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("cluster-harness").join(name));
    }
    paths
}

fn locate(name: &str) -> Result<PathBuf> {
    let candidates = search_paths(name);
    for path in &candidates {
        if path.exists() {
            return Ok(path.clone());
        }
    }
    Err(HarnessError::ConfigNotFound {
        searched: candidates,
    })
}

fn parse_document(content: &str, origin: &str) -> Result<HostDocument> {
    serde_json::from_str(content)
        .map_err(|e| HarnessError::ConfigMalformed(format!("{}: {}", origin, e)))
}

fn read_document(path: &Path) -> Result<HostDocument> {
    debug!("Loading host config from {}", path.display());
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => HarnessError::ConfigNotFound {
            searched: vec![path.to_path_buf()],
        },
        _ => HarnessError::ConfigMalformed(format!("{}: {}", path.display(), e)),
    })?;
    parse_document(&content, &path.display().to_string())
}

fn load(source: &ConfigSource) -> Result<HostDocument> {
    match source {
        ConfigSource::Search { name } => {
            let name = name.clone().unwrap_or_else(default_config_name);
            read_document(&locate(&name)?)
        }
        ConfigSource::Path(path) => read_document(path),
        ConfigSource::Inline(json) => parse_document(json, "inline config"),
        ConfigSource::Defaults => Ok(HostDocument::default()),
    }
}

fn random_base_port() -> u16 {
    DEFAULT_BASE_PORT + rand::rng().random_range(0..=BASE_PORT_JITTER)
}

/// Resolve overrides and a config document into a `ClusterSpec`.
pub fn resolve(overrides: &ConfigOverrides, source: &ConfigSource) -> Result<ClusterSpec> {
    let doc = load(source)?;

    let workers_per_host = overrides.workers_per_host.unwrap_or(doc.h2o_per_host);
    if workers_per_host == 0 {
        return Err(HarnessError::ConfigMalformed(
            "h2o_per_host must be at least 1".to_string(),
        ));
    }

    let ips: Vec<String> = doc
        .ip
        .into_vec()
        .into_iter()
        .map(|ip| ip.trim().to_string())
        .collect();
    if ips.iter().any(|ip| ip.is_empty()) {
        return Err(HarnessError::ConfigMalformed(
            "ip entries must not be empty".to_string(),
        ));
    }
    // a loopback-only document is plain local mode, not a one-host remote cloud
    let hosts: Vec<HostAddr> = if ips.len() == 1 && ips[0] == LOOPBACK {
        Vec::new()
    } else {
        ips.into_iter().map(HostAddr).collect()
    };

    let base_port = overrides
        .base_port
        .or(doc.base_port)
        .unwrap_or_else(random_base_port);
    let ports_needed = workers_per_host * PORTS_PER_WORKER as usize;
    if base_port as usize + ports_needed > u16::MAX as usize + 1 {
        return Err(HarnessError::ConfigMalformed(format!(
            "base_port {} leaves no room for {} workers per host",
            base_port, workers_per_host
        )));
    }

    let hdfs_name_node = overrides
        .hdfs_name_node
        .clone()
        .or(Some(doc.hdfs_name_node))
        .filter(|nn| !nn.is_empty());

    let credentials = if doc.username.is_empty() {
        None
    } else {
        Some(Credentials {
            username: doc.username,
            password: doc.password.filter(|p| !p.is_empty()),
        })
    };

    let spec = ClusterSpec {
        workers_per_host,
        hosts,
        base_port,
        use_flatfile: overrides.use_flatfile.unwrap_or(doc.use_flatfile),
        use_hdfs: overrides.use_hdfs.unwrap_or(doc.use_hdfs),
        hdfs_name_node,
        java_heap_gb: overrides.java_heap_gb.or(doc.java_heap_gb),
        credentials,
        sigar: overrides.sigar.unwrap_or(doc.sigar),
        slow_connection: doc.slow_connection,
        use_home_for_ice: doc.use_home_for_ice,
        worker: WorkerBinary {
            java: doc.java,
            jar: doc.jar,
        },
    };

    debug!(
        "Resolved cluster: {} worker(s) x {} host(s), base port {}, flatfile={}, hdfs={}",
        spec.workers_per_host,
        spec.hosts.len().max(1),
        spec.base_port,
        spec.use_flatfile,
        spec.use_hdfs
    );
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(json: &str) -> ConfigSource {
        ConfigSource::Inline(json.to_string())
    }

    #[test]
    fn test_defaults() {
        let spec = resolve(&ConfigOverrides::default(), &ConfigSource::Defaults).unwrap();
        assert_eq!(spec.workers_per_host, 2);
        assert!(spec.is_local());
        assert!(spec.base_port >= DEFAULT_BASE_PORT);
        assert!(spec.base_port <= DEFAULT_BASE_PORT + BASE_PORT_JITTER);
        assert!(!spec.use_flatfile);
        assert!(!spec.use_hdfs);
        assert!(spec.credentials.is_none());
        assert_eq!(spec.hdfs_name_node.as_deref(), Some("192.168.1.151"));
    }

    #[test]
    fn test_worker_count_override_wins() {
        let overrides = ConfigOverrides {
            workers_per_host: Some(5),
            ..Default::default()
        };
        let spec = resolve(&overrides, &inline(r#"{"h2o_per_host": 3}"#)).unwrap();
        assert_eq!(spec.workers_per_host, 5);
    }

    #[test]
    fn test_document_beats_defaults() {
        let spec = resolve(
            &ConfigOverrides::default(),
            &inline(r#"{"h2o_per_host": 3, "base_port": 56000, "use_flatfile": true}"#),
        )
        .unwrap();
        assert_eq!(spec.workers_per_host, 3);
        assert_eq!(spec.base_port, 56000);
        assert!(spec.use_flatfile);
    }

    #[test]
    fn test_loopback_document_is_local_mode() {
        let spec = resolve(&ConfigOverrides::default(), &inline(r#"{"ip": ["127.0.0.1"]}"#)).unwrap();
        assert!(spec.is_local());

        let spec = resolve(&ConfigOverrides::default(), &inline(r#"{"ip": "127.0.0.1"}"#)).unwrap();
        assert!(spec.is_local());
    }

    #[test]
    fn test_remote_hosts_and_credentials() {
        let spec = resolve(
            &ConfigOverrides::default(),
            &inline(
                r#"{"ip": ["192.168.1.17", "192.168.1.18"], "h2o_per_host": 1,
                    "username": "0xdiag", "password": "0xdiag", "java_heap_GB": 4}"#,
            ),
        )
        .unwrap();
        assert!(!spec.is_local());
        assert_eq!(spec.hosts.len(), 2);
        assert_eq!(spec.expected_size(), 2);
        assert_eq!(spec.java_heap_gb, Some(4));
        let creds = spec.credentials.unwrap();
        assert_eq!(creds.username, "0xdiag");
        assert_eq!(creds.password.as_deref(), Some("0xdiag"));
    }

    #[test]
    fn test_malformed_document() {
        let err = resolve(&ConfigOverrides::default(), &inline("{ not json")).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigMalformed(_)));

        let err = resolve(&ConfigOverrides::default(), &inline("[1, 2, 3]")).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigMalformed(_)));

        let err = resolve(&ConfigOverrides::default(), &inline(r#"{"h2o_per_host": "two"}"#)).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigMalformed(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let overrides = ConfigOverrides {
            workers_per_host: Some(0),
            ..Default::default()
        };
        let err = resolve(&overrides, &ConfigSource::Defaults).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigMalformed(_)));
    }

    #[test]
    fn test_port_range_overflow_rejected() {
        let overrides = ConfigOverrides {
            base_port: Some(65530),
            workers_per_host: Some(4),
            ..Default::default()
        };
        let err = resolve(&overrides, &ConfigSource::Defaults).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigMalformed(_)));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(
            &ConfigOverrides::default(),
            &ConfigSource::Path(dir.path().join("absent.json")),
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_search_for_unknown_name_is_not_found() {
        let err = resolve(
            &ConfigOverrides::default(),
            &ConfigSource::Search {
                name: Some(format!("no-such-config-{}.json", uuid::Uuid::new_v4())),
            },
        )
        .unwrap_err();
        match err {
            HarnessError::ConfigNotFound { searched } => assert!(searched.len() >= 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_reads_file_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json");
        fs::write(&path, r#"{"h2o_per_host": 4, "base_port": 57000, "sigar": true}"#).unwrap();

        let spec = resolve(&ConfigOverrides::default(), &ConfigSource::Path(path)).unwrap();
        assert_eq!(spec.workers_per_host, 4);
        assert_eq!(spec.base_port, 57000);
        assert!(spec.sigar);
    }
}
