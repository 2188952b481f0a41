//! Scenario helpers: the upload, parse, train and verify steps every test
//! scenario strings together against one node of a formed cloud.

use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cluster::ClusterSpec;
use crate::error::{HarnessError, Result};
use crate::node::{
    Algorithm, ImportResult, ImportSource, JobHandle, JobStatusSnapshot, Metadata, NodeClient,
    ParseResult, TrainParams,
};
use crate::stabilize::{stabilize_job_with, ProgressInvariants};

/// Poll interval for background training jobs
pub const TRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Smallest parse budget granted by `run_random_forest`
pub const MIN_PARSE_TIMEOUT: Duration = Duration::from_secs(10);

/// A verified, finished training job
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub job: JobHandle,
    /// Final view of the job, re-read after it stabilized
    pub snapshot: JobStatusSnapshot,
    pub elapsed: Duration,
}

/// Upload the file at `path` and parse it into `destination`, defaulting to
/// `<key>.hex`.
pub async fn parse_file(
    node: &dyn NodeClient,
    path: &Path,
    destination: Option<&str>,
) -> Result<ParseResult> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| HarnessError::InvalidParam(format!("not a file: {}", path.display())))?;
    let bytes = tokio::fs::read(path).await?;

    let start = Instant::now();
    debug!("Uploading {} ({} bytes) to {}", name, bytes.len(), node.endpoint());
    let key = node.submit_data(&name, bytes).await?;

    let destination = destination
        .map(str::to_string)
        .unwrap_or_else(|| key.parsed_name());
    let parsed = node.submit_parse(&key, &destination).await?;
    info!(
        "Parsed {} into {} in {:.1}s",
        key,
        parsed.destination_key,
        start.elapsed().as_secs_f64()
    );
    Ok(parsed)
}

/// Import `source` on `node`. Files the worker could not import are
/// logged; an import where nothing succeeded is an error.
pub async fn import_files(node: &dyn NodeClient, source: &ImportSource) -> Result<ImportResult> {
    let result = node.import_files(source).await?;
    for file in &result.failed {
        warn!("{} failed to import {}", node.endpoint(), file);
    }
    if result.keys.is_empty() {
        return Err(HarnessError::remote(
            node.endpoint(),
            format!("nothing imported from {}:/{}", source.scheme(), source.location()),
        ));
    }
    info!("Imported {} key(s) from {}", result.keys.len(), source.location());
    Ok(result)
}

/// Parse `file` from an already imported `source` into `destination`,
/// defaulting to `<file>.hex`.
pub async fn parse_imported(
    node: &dyn NodeClient,
    source: &ImportSource,
    file: &str,
    destination: Option<&str>,
) -> Result<ParseResult> {
    if file.is_empty() {
        return Err(HarnessError::InvalidParam("no file to parse".to_string()));
    }
    let key = source.key_for(file);
    let destination = destination
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.hex", file));

    let start = Instant::now();
    let parsed = node.submit_parse(&key, &destination).await?;
    info!(
        "Parsed {} into {} in {:.1}s",
        key,
        parsed.destination_key,
        start.elapsed().as_secs_f64()
    );
    Ok(parsed)
}

/// HDFS import source for a cloud whose workers were started against a
/// name node.
pub fn hdfs_source(spec: &ClusterSpec, dir: &str) -> Result<ImportSource> {
    if !spec.use_hdfs || spec.hdfs_name_node.is_none() {
        return Err(HarnessError::InvalidParam(
            "cloud was not started with HDFS enabled".to_string(),
        ));
    }
    Ok(ImportSource::Hdfs(dir.trim_matches('/').to_string()))
}

pub async fn run_inspect(node: &dyn NodeClient, key: &str) -> Result<Metadata> {
    let metadata = node.inspect(key).await?;
    debug!(
        "Inspected {}: {:?} rows, {:?} cols",
        metadata.key, metadata.rows, metadata.cols
    );
    Ok(metadata)
}

/// Submit a training job on parsed data and wait for it to stabilize.
/// The final view is read once more after completion and must still pass
/// the same checks.
pub async fn run_train(
    node: &dyn NodeClient,
    parse: &ParseResult,
    algorithm: Algorithm,
    params: &TrainParams,
    timeout: Duration,
    interval: Duration,
) -> Result<TrainOutcome> {
    let start = Instant::now();
    let job = node
        .submit_train_job(&parse.destination_key, algorithm, params)
        .await?;
    info!(
        "Submitted {} on {} ({} units)",
        algorithm, parse.destination_key, job.units_requested
    );

    let invariants = ProgressInvariants::new(job.units_requested);
    stabilize_job_with(node, &job, invariants, timeout, interval).await?;

    let snapshot = node.poll_job_status(&job).await?;
    let final_check = invariants.verify(&snapshot).and_then(|()| {
        if snapshot.is_done() {
            Ok(())
        } else {
            Err(format!("job no longer done on final read ({})", snapshot))
        }
    });
    if let Err(reason) = final_check {
        return Err(HarnessError::StabilizationInconsistent {
            description: format!("final view of {}", algorithm),
            reason,
        });
    }

    Ok(TrainOutcome {
        job,
        snapshot,
        elapsed: start.elapsed(),
    })
}

/// Parse budget for a scenario with an overall `timeout`
pub fn parse_timeout(timeout: Duration) -> Duration {
    (timeout / 10).max(MIN_PARSE_TIMEOUT)
}

/// Parse `path`, then train a forest of `trees` trees on it. A model key
/// is generated unless `params` carries one.
pub async fn run_random_forest(
    node: &dyn NodeClient,
    path: &Path,
    trees: u32,
    params: &TrainParams,
    timeout: Duration,
) -> Result<TrainOutcome> {
    if trees == 0 {
        return Err(HarnessError::InvalidParam("a forest needs at least one tree".to_string()));
    }

    let budget = parse_timeout(timeout);
    let parse = tokio::time::timeout(budget, parse_file(node, path, None))
        .await
        .map_err(|_| HarnessError::StabilizationTimeout {
            description: format!("parse of {}", path.display()),
            timeout: budget,
            polls: 1,
        })??;

    let mut params = params.clone();
    params.set("ntree", trees)?;
    if params.get("model_key").is_none() {
        params.set("model_key", format!("model_{}", Uuid::new_v4().simple()))?;
    }

    run_train(
        node,
        &parse,
        Algorithm::RandomForest,
        &params,
        timeout,
        TRAIN_POLL_INTERVAL,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::types::test_utils::local_spec;

    #[test]
    fn test_hdfs_source_requires_hdfs_cloud() {
        let mut spec = local_spec(1, 55300);
        assert!(hdfs_source(&spec, "datasets").is_err());

        spec.use_hdfs = true;
        spec.hdfs_name_node = Some("192.168.1.151".to_string());
        let source = hdfs_source(&spec, "/datasets/").unwrap();
        assert_eq!(source.key_for("a.csv").as_str(), "hdfs:/datasets/a.csv");
    }

    #[test]
    fn test_parse_timeout_floor() {
        assert_eq!(parse_timeout(Duration::from_secs(30)), MIN_PARSE_TIMEOUT);
        assert_eq!(parse_timeout(Duration::from_secs(600)), Duration::from_secs(60));
    }
}
