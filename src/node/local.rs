use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::{
    Algorithm, CloudStatus, DataKey, ImportResult, ImportSource, JobHandle, JobStatusSnapshot,
    Metadata, NodeClient, ParseResult, RestClient, TrainParams,
};
use crate::error::Result;

const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Worker running as a child process of the harness
#[derive(Debug)]
pub struct LocalNode {
    rest: RestClient,
    child: Mutex<Option<Child>>,
}

impl LocalNode {
    pub fn new(rest: RestClient, child: Child) -> Self {
        Self {
            rest,
            child: Mutex::new(Some(child)),
        }
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(|c| c.id())
    }

    /// SIGTERM, then SIGKILL once the grace period runs out.
    async fn terminate(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        if let Some(pid) = child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("Failed to send SIGTERM to worker {}: {}", pid, e);
            }
        }

        match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Worker {} exited with {}", self.rest.endpoint(), status);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                error!("Worker {} did not stop gracefully, sending SIGKILL", self.rest.endpoint());
                child.kill().await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl NodeClient for LocalNode {
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
        if self.child.lock().await.is_none() {
            return Ok(());
        }
        // the process gets signalled either way
        if let Err(e) = self.rest.shutdown().await {
            warn!("Shutdown request to {} failed: {}", self.rest.endpoint(), e);
        }
        self.terminate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_shutdown_reaps_child_and_is_idempotent() {
        let child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        // nothing answers on port 1, so the HTTP shutdown fails and the signal path runs
        let rest = RestClient::with_timeout("127.0.0.1", 1, Duration::from_secs(1)).unwrap();
        let node = LocalNode::new(rest, child);
        assert!(node.pid().await.is_some());

        node.shutdown().await.unwrap();
        assert!(node.pid().await.is_none());

        node.shutdown().await.unwrap();
    }
}
