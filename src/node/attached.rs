use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{
    Algorithm, CloudStatus, DataKey, ImportResult, ImportSource, JobHandle, JobStatusSnapshot,
    Metadata, NodeClient, ParseResult, RestClient, TrainParams,
};
use crate::error::Result;

/// Worker this process did not start, reachable only over HTTP. Shutdown
/// is a single request; there is no process to fall back on.
#[derive(Debug)]
pub struct AttachedNode {
    rest: RestClient,
    stopped: AtomicBool,
}

impl AttachedNode {
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            stopped: AtomicBool::new(false),
        }
    }

    /// Attach to `address:port`
    pub fn connect(address: &str, port: u16) -> Result<Self> {
        Ok(Self::new(RestClient::new(address, port)?))
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }
}

#[async_trait]
impl NodeClient for AttachedNode {
    fn endpoint(&self) -> String {
        self.rest.endpoint()
    }

    async fn get_cloud_status(&self) -> Result<CloudStatus> {
        self.rest.cloud().await
    }

    async fn submit_data(&self, name: &str, bytes: Vec<u8>) -> Result<DataKey> {
        self.rest.put_file(name, bytes).await
    }

    async fn submit_parse(&self, source: &DataKey, destination: &str) -> Result<ParseResult> {
        self.rest.parse(source, destination).await
    }

    async fn import_files(&self, source: &ImportSource) -> Result<ImportResult> {
        self.rest.import_files(source).await
    }

    async fn submit_train_job(
        &self,
        source_key: &str,
        algorithm: Algorithm,
        params: &TrainParams,
    ) -> Result<JobHandle> {
        self.rest.train(source_key, algorithm, params).await
    }

    async fn poll_job_status(&self, job: &JobHandle) -> Result<JobStatusSnapshot> {
        self.rest.job_status(job).await
    }

    async fn inspect(&self, key: &str) -> Result<Metadata> {
        self.rest.inspect(key).await
    }

    async fn netstat(&self) -> Result<serde_json::Value> {
        self.rest.netstat().await
    }

    async fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.rest.shutdown().await
    }
}
