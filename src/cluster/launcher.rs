//! Worker process launching, locally or over ssh.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::flatfile::{Peer, FLATFILE_NAME};
use super::types::{ClusterSpec, Credentials, HostAddr};
use crate::error::{HarnessError, Result};
use crate::node::{LocalNode, RemoteNode, RestClient};

/// Command line for one worker. `flatfile` and `ice_root` are paths as seen
/// by the host the worker runs on.
pub fn worker_args(spec: &ClusterSpec, peer: &Peer, flatfile: Option<&str>, ice_root: &str) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(gb) = spec.java_heap_gb {
        args.push(format!("-Xmx{}g", gb));
    }
    args.push("-jar".to_string());
    args.push(jar_arg(spec));
    args.push(format!("--port={}", peer.port));
    args.push(format!("--ip={}", peer.address));
    if let Some(flatfile) = flatfile {
        args.push(format!("--flatfile={}", flatfile));
    }
    args.push(format!("--ice_root={}", ice_root));
    if spec.use_hdfs {
        if let Some(name_node) = &spec.hdfs_name_node {
            args.push(format!("--hdfs=hdfs://{}", name_node));
        }
    }
    if spec.sigar {
        args.push("--sigar".to_string());
    }
    args
}

fn jar_arg(spec: &ClusterSpec) -> String {
    if spec.is_local() {
        spec.worker.jar.display().to_string()
    } else {
        // uploaded next to the flatfile in the remote work dir
        spec.worker
            .jar
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Start one local worker; stdout/stderr go to files in `sandbox`.
pub async fn spawn_local(
    spec: &ClusterSpec,
    peer: &Peer,
    flatfile: Option<&Path>,
    sandbox: &Path,
) -> Result<LocalNode> {
    if !spec.worker.jar.exists() {
        return Err(HarnessError::process(format!(
            "worker jar {} not found",
            spec.worker.jar.display()
        )));
    }

    let ice_root = sandbox.join(format!("ice{}", peer.port));
    let flatfile = flatfile.map(|p| p.display().to_string());
    let args = worker_args(spec, peer, flatfile.as_deref(), &ice_root.display().to_string());

    let stdout = File::create(sandbox.join(format!("local-{}.stdout.log", peer.port)))?;
    let stderr = File::create(sandbox.join(format!("local-{}.stderr.log", peer.port)))?;

    debug!("Spawning {} {}", spec.worker.java, args.join(" "));
    let child = Command::new(&spec.worker.java)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HarnessError::process(format!("Failed to start {}: {}", spec.worker.java, e)))?;

    info!("Started local worker {} (pid {:?})", peer, child.id());
    let rest = RestClient::new(peer.address.as_str(), peer.port)?;
    Ok(LocalNode::new(rest, child))
}

/// ssh/scp access to one remote host. A configured password is fed through
/// `sshpass`; without one, key-based batch mode is required.
#[derive(Debug, Clone)]
pub struct RemoteShell {
    host: HostAddr,
    credentials: Option<Credentials>,
}

impl RemoteShell {
    pub fn new(host: HostAddr, credentials: Option<Credentials>) -> Self {
        Self { host, credentials }
    }

    pub fn host(&self) -> &HostAddr {
        &self.host
    }

    fn target(&self) -> String {
        match &self.credentials {
            Some(c) => format!("{}@{}", c.username, self.host),
            None => self.host.to_string(),
        }
    }

    fn password(&self) -> Option<&str> {
        self.credentials.as_ref().and_then(|c| c.password.as_deref())
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = match self.password() {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.env("SSHPASS", password).arg("-e").arg(program);
                cmd
            }
            None => {
                let mut cmd = Command::new(program);
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };
        cmd.args(["-o", "StrictHostKeyChecking=no"])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn run_command(&self, mut cmd: Command, what: &str, timeout: Duration) -> Result<String> {
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| HarnessError::process(format!("{} on {} timed out after {:?}", what, self.host, timeout)))?
            .map_err(|e| HarnessError::process(format!("{} on {}: {}", what, self.host, e)))?;

        if !output.status.success() {
            return Err(HarnessError::process(format!(
                "{} on {} failed ({}): {}",
                what,
                self.host,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Copy `local` into `remote_dir` on the host.
    pub async fn upload(&self, local: &Path, remote_dir: &str, timeout: Duration) -> Result<()> {
        let mut cmd = self.command("scp");
        cmd.arg("-q")
            .arg(local)
            .arg(format!("{}:{}/", self.target(), remote_dir));
        self.run_command(cmd, &format!("upload of {}", local.display()), timeout)
            .await
            .map(|_| ())
    }

    /// Run a shell command on the host and return its stdout.
    pub async fn run(&self, remote_cmd: &str, timeout: Duration) -> Result<String> {
        let mut cmd = self.command("ssh");
        cmd.arg(self.target()).arg(remote_cmd);
        self.run_command(cmd, remote_cmd, timeout).await
    }
}

const REMOTE_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-user work directory on remote hosts
pub fn remote_work_dir(spec: &ClusterSpec) -> String {
    let user = spec
        .credentials
        .as_ref()
        .map(|c| c.username.clone())
        .unwrap_or_else(|| "harness".to_string());
    format!("/tmp/harness-{}", user)
}

/// Upload floor for binaries: `max(60s, 2s per host)`, stretched 4x for
/// slow links.
pub fn upload_timeout(spec: &ClusterSpec) -> Duration {
    let secs = 60u64.max(2 * spec.hosts.len() as u64);
    let secs = if spec.slow_connection { secs * 4 } else { secs };
    Duration::from_secs(secs)
}

/// Ship the worker jar and flatfile to `shell`'s host. Must finish before
/// any worker on that host is launched.
pub async fn provision_host(spec: &ClusterSpec, shell: &RemoteShell, flatfile: Option<&Path>) -> Result<()> {
    let work_dir = remote_work_dir(spec);
    shell
        .run(&format!("mkdir -p {}", work_dir), REMOTE_COMMAND_TIMEOUT)
        .await?;

    let timeout = upload_timeout(spec);
    info!("Uploading {} to {}:{}", spec.worker.jar.display(), shell.host(), work_dir);
    shell.upload(&spec.worker.jar, &work_dir, timeout).await?;
    if let Some(flatfile) = flatfile {
        shell.upload(flatfile, &work_dir, timeout).await?;
    }
    Ok(())
}

/// Start one worker on a provisioned host, detached from the ssh session.
pub async fn spawn_remote(spec: &ClusterSpec, shell: &RemoteShell, peer: &Peer) -> Result<RemoteNode> {
    let work_dir = remote_work_dir(spec);
    let ice_root = if spec.use_home_for_ice {
        format!("~/ice{}", peer.port)
    } else {
        format!("{}/ice{}", work_dir, peer.port)
    };
    let flatfile = spec
        .use_flatfile
        .then(|| format!("{}/{}", work_dir, FLATFILE_NAME));
    let args = worker_args(spec, peer, flatfile.as_deref(), &ice_root);

    let remote_cmd = format!(
        "cd {dir} && nohup {java} {args} > {dir}/remote-{port}.log 2>&1 < /dev/null &",
        dir = work_dir,
        java = spec.worker.java,
        args = args.join(" "),
        port = peer.port
    );
    shell.run(&remote_cmd, REMOTE_COMMAND_TIMEOUT).await?;
    info!("Started remote worker {}", peer);

    let rest = RestClient::new(peer.address.as_str(), peer.port)?;
    Ok(RemoteNode::new(rest, shell.clone()))
}

/// Where worker logs for this cloud end up locally
pub fn sandbox_logs(sandbox: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(sandbox)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.to_string_lossy().ends_with(".log"))
                .collect()
        })
        .unwrap_or_default()
}
