use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use super::{
    Algorithm, CloudStatus, DataKey, ImportResult, ImportSource, JobHandle, JobStatusSnapshot,
    Metadata, NodeClient, ParseResult, RestClient, TrainParams,
};
use crate::cluster::launcher::RemoteShell;
use crate::error::Result;

const KILL_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker started over ssh on another host
#[derive(Debug)]
pub struct RemoteNode {
    rest: RestClient,
    shell: RemoteShell,
    stopped: AtomicBool,
}

impl RemoteNode {
    pub fn new(rest: RestClient, shell: RemoteShell) -> Self {
        Self {
            rest,
            shell,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }
}

#[async_trait]
impl NodeClient for RemoteNode {
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
        match self.rest.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    "Shutdown request to {} failed ({}), killing over ssh",
                    self.rest.endpoint(),
                    e
                );
                self.shell
                    .run(&format!("pkill -f -- '--port={}'", self.rest.port()), KILL_TIMEOUT)
                    .await
                    .map(|_| ())
            }
        }
    }
}
