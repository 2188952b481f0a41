//! CLI for the cluster harness
//!
//! Provides command-line access to:
//! - Printing the peer list a configuration resolves to
//! - Bringing a cloud up, reporting on it and tearing it down
//! - Running a stabilized random forest against a fresh cloud

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cluster::{flatfile, launcher, ClusterHandle, ClusterManager, ClusterSpec};
use crate::commands;
use crate::config::{self, ConfigOverrides, ConfigSource};
use crate::error::HarnessError;
use crate::node::TrainParams;

#[derive(Parser, Debug)]
#[command(name = "harness", author, version, about, long_about = None)]
pub struct Cli {
    /// Host configuration file to read instead of searching for one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Name of the configuration file to search for
    #[arg(long, global = true)]
    pub config_name: Option<String>,

    /// Ignore any configuration file and run locally with defaults
    #[arg(long, global = true)]
    pub local: bool,

    /// Directory for worker output, flatfile and ice roots (wiped on start)
    #[arg(long, global = true, default_value = "sandbox")]
    pub sandbox: PathBuf,

    /// Directory for the harness's own logs
    #[arg(long, global = true, default_value = "logs")]
    pub log_dir: PathBuf,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default)]
pub struct OverrideArgs {
    /// Workers per host
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[arg(long, global = true)]
    pub base_port: Option<u16>,

    /// Hand workers the peer list instead of relying on multicast
    #[arg(long, global = true)]
    pub use_flatfile: bool,

    /// Worker heap size in GB
    #[arg(long, global = true)]
    pub java_heap_gb: Option<u32>,

    /// Enable host-resource stats on the workers
    #[arg(long, global = true)]
    pub sigar: bool,
}

impl OverrideArgs {
    pub fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            workers_per_host: self.workers,
            base_port: self.base_port,
            use_flatfile: self.use_flatfile.then_some(true),
            java_heap_gb: self.java_heap_gb,
            sigar: self.sigar.then_some(true),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the peer list the configuration resolves to
    Flatfile,
    /// Build a cloud, report its state and tear it down
    Cloud {
        /// Keep the cloud up until Ctrl+C
        #[arg(long)]
        hold: bool,
        /// Formation timeout in seconds, replacing the computed one
        #[arg(long)]
        formation_timeout: Option<u64>,
    },
    /// Build a cloud, parse a file and train a random forest on it
    Rf {
        /// Data file to upload
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = 10)]
        trees: u32,
        /// Seconds allowed for the whole training run
        #[arg(long, default_value_t = 300)]
        timeout: u64,
        /// Index of the node to drive
        #[arg(long, default_value_t = 0)]
        node: usize,
    },
}

fn config_source(cli: &Cli) -> ConfigSource {
    if cli.local {
        ConfigSource::Defaults
    } else if let Some(path) = &cli.config {
        ConfigSource::Path(path.clone())
    } else {
        ConfigSource::Search {
            name: cli.config_name.clone(),
        }
    }
}

/// Resolve the cluster spec. A missing per-user default configuration
/// means a local cloud; a missing named one is an error.
pub fn resolve_spec(cli: &Cli) -> anyhow::Result<ClusterSpec> {
    let overrides = cli.overrides.to_overrides();
    let source = config_source(cli);
    match config::resolve(&overrides, &source) {
        Err(HarnessError::ConfigNotFound { searched })
            if matches!(source, ConfigSource::Search { name: None }) =>
        {
            info!("No host configuration in {:?}, running locally", searched);
            Ok(config::resolve(&overrides, &ConfigSource::Defaults)?)
        }
        other => Ok(other?),
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let spec = resolve_spec(&cli)?;
    match &cli.command {
        Commands::Flatfile => {
            print!("{}", flatfile::compute(&spec).render());
            Ok(())
        }
        Commands::Cloud {
            hold,
            formation_timeout,
        } => {
            let mut manager = ClusterManager::new(cli.sandbox.clone());
            if let Some(secs) = formation_timeout {
                manager = manager.with_formation_timeout(Duration::from_secs(*secs));
            }
            let mut handle = build(&manager, &spec).await?;
            let report = report(&handle, spec.sigar).await;
            if report.is_ok() && *hold {
                info!("Cloud is up, press Ctrl+C to tear it down");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
            }
            manager.teardown(&mut handle).await;
            report
        }
        Commands::Rf {
            file,
            trees,
            timeout,
            node,
        } => {
            let manager = ClusterManager::new(cli.sandbox.clone());
            let mut handle = build(&manager, &spec).await?;
            let outcome = tokio::select! {
                res = run_forest(&handle, *node, file, *trees, Duration::from_secs(*timeout)) => res,
                _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
            };
            manager.teardown(&mut handle).await;
            outcome
        }
    }
}

async fn build(manager: &ClusterManager, spec: &ClusterSpec) -> anyhow::Result<ClusterHandle> {
    match manager.build(spec).await {
        Ok(handle) => Ok(handle),
        Err(e) => {
            let logs = launcher::sandbox_logs(manager.sandbox());
            if !logs.is_empty() {
                error!("Check worker output in {}", manager.sandbox().display());
            }
            Err(e).context("cloud did not come up")
        }
    }
}

async fn report(handle: &ClusterHandle, sigar: bool) -> anyhow::Result<()> {
    println!(
        "Cloud of {} {} at {}",
        handle.expected_size(),
        handle.state(),
        handle
            .formed_at()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
    for node in handle.nodes() {
        let status = node.get_cloud_status().await?;
        println!(
            "  {} cloud={} size={} consensus={}",
            node.endpoint(),
            status.cloud_name,
            status.cloud_size,
            status.consensus
        );
        if sigar {
            match node.netstat().await {
                Ok(stats) => println!("    netstat: {}", stats),
                Err(e) => warn!("No network stats from {}: {}", node.endpoint(), e),
            }
        }
    }
    Ok(())
}

async fn run_forest(
    handle: &ClusterHandle,
    index: usize,
    file: &Path,
    trees: u32,
    timeout: Duration,
) -> anyhow::Result<()> {
    let node = handle
        .node(index)
        .ok_or_else(|| anyhow!("no node {} in a cloud of {}", index, handle.nodes().len()))?;
    let outcome =
        commands::run_random_forest(node.as_ref(), file, trees, &TrainParams::new(), timeout).await?;
    println!(
        "Forest {} finished in {:.1}s: {}",
        outcome.job.model_key.as_deref().unwrap_or("-"),
        outcome.elapsed.as_secs_f64(),
        outcome.snapshot
    );
    Ok(())
}
