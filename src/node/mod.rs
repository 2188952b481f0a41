//! Worker Node Access
//!
//! One `NodeClient` per worker process of a formed cloud:
//! - `LocalNode` owns a worker started as a child of this process
//! - `RemoteNode` drives a worker launched over ssh on another host
//! - `AttachedNode` talks to a worker somebody else started
//!
//! All of them speak to the worker through `RestClient`; only lifecycle differs.

pub mod attached;
pub mod local;
pub mod params;
pub mod remote;
pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

pub use attached::AttachedNode;
pub use local::LocalNode;
pub use params::{ParamValue, TrainParams};
pub use remote::RemoteNode;
pub use rest::RestClient;

/// A worker's view of the cloud it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudStatus {
    pub cloud_name: String,
    pub cloud_size: usize,
    /// Whether the worker believes membership has settled
    pub consensus: bool,
}

/// Key of raw uploaded data inside the worker's store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataKey(pub String);

impl DataKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Destination conventionally used for the parsed form of this key
    pub fn parsed_name(&self) -> String {
        format!("{}.hex", self.0)
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub destination_key: String,
}

/// Server-side data a worker can import without an upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSource {
    /// Directory visible on every host (NFS or a shared mount)
    Folder(String),
    /// S3 bucket
    S3(String),
    /// Directory on the cloud's HDFS name node
    Hdfs(String),
}

impl ImportSource {
    pub fn import_path(&self) -> &'static str {
        match self {
            ImportSource::Folder(_) => "/ImportFiles.json",
            ImportSource::S3(_) => "/ImportS3.json",
            ImportSource::Hdfs(_) => "/ImportHdfs.json",
        }
    }

    pub fn path_param(&self) -> &'static str {
        match self {
            ImportSource::S3(_) => "bucket",
            _ => "path",
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            ImportSource::Folder(_) => "nfs",
            ImportSource::S3(_) => "s3",
            ImportSource::Hdfs(_) => "hdfs",
        }
    }

    pub fn location(&self) -> &str {
        match self {
            ImportSource::Folder(l) | ImportSource::S3(l) | ImportSource::Hdfs(l) => l,
        }
    }

    /// Key under which an imported `file` is known, e.g. `s3:/bucket/covtype.data`
    pub fn key_for(&self, file: &str) -> DataKey {
        DataKey(format!("{}:/{}/{}", self.scheme(), self.location(), file))
    }
}

/// Outcome of an import: keys now visible to the cloud, and files that
/// could not be imported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub keys: Vec<String>,
    pub failed: Vec<String>,
    pub raw: serde_json::Value,
}

/// Training algorithms the workers expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Tree ensemble; trains in the background and is polled through its view
    RandomForest,
    Glm,
    GlmGrid,
    LinearRegression,
}

impl Algorithm {
    pub fn submit_path(&self) -> &'static str {
        match self {
            Algorithm::RandomForest => "/RF.json",
            Algorithm::Glm => "/GLM.json",
            Algorithm::GlmGrid => "/GLMGrid.json",
            Algorithm::LinearRegression => "/LR.json",
        }
    }

    /// Progress endpoint, `None` when the submit call returns the finished model
    pub fn view_path(&self) -> Option<&'static str> {
        match self {
            Algorithm::RandomForest => Some("/RFView.json"),
            _ => None,
        }
    }

    /// Query parameter naming the parsed source data
    pub fn source_param(&self) -> &'static str {
        match self {
            Algorithm::RandomForest => "data_key",
            _ => "key",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::RandomForest => write!(f, "random forest"),
            Algorithm::Glm => write!(f, "GLM"),
            Algorithm::GlmGrid => write!(f, "GLM grid"),
            Algorithm::LinearRegression => write!(f, "linear regression"),
        }
    }
}

/// Handle to a submitted training job. The worker owns the job's state;
/// this only records what is needed to ask about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub algorithm: Algorithm,
    pub data_key: String,
    pub model_key: Option<String>,
    /// Work units the worker acknowledged at submission (e.g. trees)
    pub units_requested: i64,
    /// Final body for algorithms that finish during submission
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Done,
}

/// One poll's worth of job progress, exactly as reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub progress: i64,
    pub progress_total: i64,
    pub units_completed: i64,
    pub units_requested: i64,
    pub status: JobStatus,
    pub raw: serde_json::Value,
}

impl JobStatusSnapshot {
    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }
}

impl fmt::Display for JobStatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status: {:?}, progress: {}/{}, units: {}/{}",
            self.status, self.progress, self.progress_total, self.units_completed, self.units_requested
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub col_type: Option<String>,
}

/// What `inspect` learns about a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    pub rows: Option<u64>,
    pub cols: Option<u64>,
    pub columns: Vec<ColumnInfo>,
    pub raw: serde_json::Value,
}

/// Control surface of one worker. Every failure to get a well-formed answer
/// (unreachable, non-2xx, unparsable or missing fields) is a `Transport`
/// error and may be retried. Only an error the worker reports itself in
/// its body is `Remote`, which is never retried.
#[async_trait]
pub trait NodeClient: Send + Sync + fmt::Debug {
    /// `address:port` of the worker's control port
    fn endpoint(&self) -> String;

    async fn get_cloud_status(&self) -> Result<CloudStatus>;

    async fn submit_data(&self, name: &str, bytes: Vec<u8>) -> Result<DataKey>;

    async fn submit_parse(&self, source: &DataKey, destination: &str) -> Result<ParseResult>;

    async fn import_files(&self, source: &ImportSource) -> Result<ImportResult>;

    async fn submit_train_job(
        &self,
        source_key: &str,
        algorithm: Algorithm,
        params: &TrainParams,
    ) -> Result<JobHandle>;

    async fn poll_job_status(&self, job: &JobHandle) -> Result<JobStatusSnapshot>;

    async fn inspect(&self, key: &str) -> Result<Metadata>;

    /// Network statistics, only served by workers started with sigar
    async fn netstat(&self) -> Result<serde_json::Value>;

    /// Ask the worker to stop. Must be safe to call more than once.
    async fn shutdown(&self) -> Result<()>;
}
