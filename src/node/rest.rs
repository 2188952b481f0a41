//! HTTP client for a worker's JSON control surface.
//!
//! All knowledge of endpoint paths and response key names lives here; the
//! rest of the crate only sees the logical types from `node`.

use reqwest::{multipart, Client};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};

use super::{
    Algorithm, CloudStatus, ColumnInfo, DataKey, ImportResult, ImportSource, JobHandle, JobStatus,
    JobStatusSnapshot, Metadata, ParseResult, TrainParams,
};
use crate::error::{HarnessError, Result};
use crate::stabilize::DEFAULT_COMMIT_STEPS;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RestClient {
    address: String,
    port: u16,
    base_url: String,
    client: Client,
}

impl RestClient {
    pub fn new(address: &str, port: u16) -> Result<Self> {
        Self::with_timeout(address, port, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(address: &str, port: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::transport(format!("{}:{}", address, port), e))?;

        Ok(Self {
            address: address.to_string(),
            port,
            base_url: format!("http://{}:{}", address, port),
            client,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode(&self, path: &str, response: reqwest::Response) -> Result<Value> {
        let url = self.url(path);
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response".to_string());
            return Err(HarnessError::transport(url, format!("HTTP {}: {}", status, text)));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| HarnessError::transport(url.clone(), format!("Failed to parse response: {}", e)))?;
        trace!("{} -> {}", url, body);
        check_remote_error(&url, &body)?;
        Ok(body)
    }

    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        debug!("GET {} {:?}", self.url(path), query);
        let response = self.client.get(self.url(path)).query(query).send().await?;
        self.decode(path, response).await
    }

    pub async fn cloud(&self) -> Result<CloudStatus> {
        let path = "/Cloud.json";
        let body = self.get_json(path, &[]).await?;
        let url = self.url(path);
        Ok(CloudStatus {
            cloud_name: body["cloud_name"].as_str().unwrap_or_default().to_string(),
            cloud_size: require_i64(&url, &body, "/cloud_size")? as usize,
            consensus: body["consensus"].as_bool().unwrap_or(false),
        })
    }

    pub async fn put_file(&self, name: &str, bytes: Vec<u8>) -> Result<DataKey> {
        let path = "/PutFile.json";
        let part = multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = multipart::Form::new().part("File", part);
        debug!("POST {} ({})", self.url(path), name);
        let response = self
            .client
            .post(self.url(path))
            .query(&[("key", name)])
            .multipart(form)
            .send()
            .await?;
        let body = self.decode(path, response).await?;
        Ok(DataKey(require_str(&self.url(path), &body, "/key")?))
    }

    pub async fn parse(&self, source: &DataKey, destination: &str) -> Result<ParseResult> {
        let path = "/Parse.json";
        let query = vec![
            ("Key".to_string(), source.to_string()),
            ("Key2".to_string(), destination.to_string()),
        ];
        let body = self.get_json(path, &query).await?;
        Ok(ParseResult {
            destination_key: require_str(&self.url(path), &body, "/destination_key")?,
        })
    }

    pub async fn train(
        &self,
        source_key: &str,
        algorithm: Algorithm,
        params: &TrainParams,
    ) -> Result<JobHandle> {
        let path = algorithm.submit_path();
        let url = self.url(path);
        let mut query = vec![(algorithm.source_param().to_string(), source_key.to_string())];
        query.extend(params.to_query());
        let body = self.get_json(path, &query).await?;

        match algorithm {
            Algorithm::RandomForest => Ok(JobHandle {
                algorithm,
                data_key: body["data_key"].as_str().unwrap_or(source_key).to_string(),
                model_key: Some(require_str(&url, &body, "/model_key")?),
                // the submit response is the authoritative count of trees asked for
                units_requested: require_i64(&url, &body, "/ntree")?,
                result: None,
            }),
            _ => Ok(JobHandle {
                algorithm,
                data_key: source_key.to_string(),
                model_key: body["model_key"]
                    .as_str()
                    .or_else(|| body["destination_key"].as_str())
                    .map(str::to_string),
                units_requested: 1,
                result: Some(body),
            }),
        }
    }

    pub async fn job_status(&self, job: &JobHandle) -> Result<JobStatusSnapshot> {
        let Some(path) = job.algorithm.view_path() else {
            // finished during submission
            let total = job.units_requested + DEFAULT_COMMIT_STEPS;
            return Ok(JobStatusSnapshot {
                progress: total,
                progress_total: total,
                units_completed: job.units_requested,
                units_requested: job.units_requested,
                status: JobStatus::Done,
                raw: job.result.clone().unwrap_or(Value::Null),
            });
        };

        let url = self.url(path);
        let mut query = vec![
            ("data_key".to_string(), job.data_key.clone()),
            ("ntree".to_string(), job.units_requested.to_string()),
        ];
        if let Some(model_key) = &job.model_key {
            query.push(("model_key".to_string(), model_key.clone()));
        }
        let body = self.get_json(path, &query).await?;

        let status = match require_str(&url, &body, "/response/status")?.as_str() {
            "poll" => JobStatus::Running,
            "done" => JobStatus::Done,
            other => {
                return Err(HarnessError::transport(url, format!("Unexpected status: {}", other)));
            }
        };

        // a running job must report both counters; a finished view may drop them
        let (progress, progress_total) = match status {
            JobStatus::Running => (
                require_i64(&url, &body, "/response/progress")?,
                require_i64(&url, &body, "/response/progress_total")?,
            ),
            JobStatus::Done => {
                let total = body
                    .pointer("/response/progress_total")
                    .and_then(Value::as_i64)
                    .unwrap_or(job.units_requested + DEFAULT_COMMIT_STEPS);
                let progress = body
                    .pointer("/response/progress")
                    .and_then(Value::as_i64)
                    .unwrap_or(total);
                (progress, total)
            }
        };

        Ok(JobStatusSnapshot {
            progress,
            progress_total,
            units_completed: require_i64(&url, &body, "/trees/number_built")?,
            units_requested: require_i64(&url, &body, "/ntree")?,
            status,
            raw: body,
        })
    }

    /// Make server-side data visible to the cloud. The returned keys can be
    /// parsed without an upload.
    pub async fn import_files(&self, source: &ImportSource) -> Result<ImportResult> {
        let path = source.import_path();
        let url = self.url(path);
        let body = self
            .get_json(path, &[(source.path_param().to_string(), source.location().to_string())])
            .await?;

        let succeeded = body["succeeded"]
            .as_array()
            .ok_or_else(|| HarnessError::transport(url.clone(), "missing array field /succeeded"))?;
        let keys = succeeded
            .iter()
            .filter_map(|entry| entry["key"].as_str().map(str::to_string))
            .collect();
        let failed = body["failed"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| e["file"].as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(ImportResult { keys, failed, raw: body })
    }

    pub async fn inspect(&self, key: &str) -> Result<Metadata> {
        let path = "/Inspect.json";
        let body = self.get_json(path, &[("key".to_string(), key.to_string())]).await?;
        let columns = body["columns"]
            .as_array()
            .map(|cols| {
                cols.iter()
                    .map(|c| ColumnInfo {
                        name: c["name"].as_str().unwrap_or_default().to_string(),
                        col_type: c["type"].as_str().map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Metadata {
            key: body["key"].as_str().unwrap_or(key).to_string(),
            rows: body["rows"].as_u64(),
            cols: body["cols"].as_u64(),
            columns,
            raw: body,
        })
    }

    pub async fn netstat(&self) -> Result<Value> {
        self.get_json("/Netstat.json", &[]).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.get_json("/Shutdown.json", &[]).await.map(|_| ())
    }
}

/// Workers report failures inside a 200 body under `error` or `Error`.
fn check_remote_error(url: &str, body: &Value) -> Result<()> {
    for field in ["error", "Error"] {
        if let Some(err) = body.get(field) {
            let message = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
            return Err(HarnessError::remote(url, message));
        }
    }
    Ok(())
}

/// A missing or ill-typed field is a garbled answer, not a worker verdict,
/// so it counts as a transport failure.
fn require_i64(url: &str, body: &Value, pointer: &str) -> Result<i64> {
    body.pointer(pointer)
        .and_then(Value::as_i64)
        .ok_or_else(|| HarnessError::transport(url, format!("missing integer field {}", pointer)))
}

fn require_str(url: &str, body: &Value, pointer: &str) -> Result<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HarnessError::transport(url, format!("missing string field {}", pointer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_error_detection() {
        let url = "http://127.0.0.1:55300/RF.json";
        assert!(check_remote_error(url, &json!({"model_key": "m"})).is_ok());

        let err = check_remote_error(url, &json!({"Error": "Only integer or enum columns can be classes!"}))
            .unwrap_err();
        match err {
            HarnessError::Remote { message, .. } => assert!(message.contains("enum columns")),
            other => panic!("unexpected error: {}", other),
        }
        assert!(check_remote_error(url, &json!({"error": {"code": 3}})).is_err());
    }

    #[test]
    fn test_required_fields() {
        let body = json!({"response": {"status": "poll"}, "trees": {"number_built": 4}});
        assert_eq!(require_i64("u", &body, "/trees/number_built").unwrap(), 4);
        assert_eq!(require_str("u", &body, "/response/status").unwrap(), "poll");
        assert!(matches!(
            require_i64("u", &body, "/ntree"),
            Err(HarnessError::Transport { .. })
        ));
        assert!(require_str("u", &body, "/trees/number_built").unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_completed_job_snapshot_without_view() {
        let client = RestClient::new("127.0.0.1", 1).unwrap();
        let job = JobHandle {
            algorithm: Algorithm::Glm,
            data_key: "hastie.hex".to_string(),
            model_key: None,
            units_requested: 1,
            result: Some(json!({"coefficients": {"x": 1.0}})),
        };
        let snapshot = client.job_status(&job).await.unwrap();
        assert!(snapshot.is_done());
        assert_eq!(snapshot.units_completed, snapshot.units_requested);
        assert_eq!(snapshot.progress_total, snapshot.units_requested + DEFAULT_COMMIT_STEPS);
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_transport_error() {
        // nothing listens on port 1
        let client = RestClient::with_timeout("127.0.0.1", 1, Duration::from_secs(2)).unwrap();
        let err = client.cloud().await.unwrap_err();
        assert!(err.is_transport());
    }
}
