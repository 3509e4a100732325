//! Container Runtime Adapter: shells out to a rootless OCI runtime binary (`podman`) to
//! run, exec into, kill, and inspect containers.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// How often the memory sampler polls `podman stats` while an ephemeral container runs.
const STATS_POLL_INTERVAL: Duration = Duration::from_millis(200);

const RUNTIME_BIN: &str = "podman";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The argument vector and resource envelope for a single container run.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    /// Stock OCI image to run the container from (e.g. `docker.io/library/python:3-slim`).
    pub image: String,
    pub argv: Vec<String>,
    pub memory_mib: u32,
    pub cpu_limit: f32,
    pub tmpfs_mib: u32,
    pub network: bool,
    pub read_only_root: bool,
    pub drop_privileges: bool,
    /// `(host_path, container_path)` read-only bind mount, used by the isolation tier to
    /// hand the snippet file to the container without baking it into an image.
    pub code_mount: Option<(String, String)>,
    pub timeout: Duration,
}

/// Output captured from a one-shot or `exec` invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Peak memory observed while the container was running, in MiB. `0` if no sample was
    /// taken (e.g. the container exited before the first poll).
    pub memory_mib: u64,
}

/// Runtime availability and identification, as reported by `podman system info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Adapts the rootless OCI runtime CLI to the engine's container lifecycle needs.
#[derive(Debug, Clone)]
pub struct RuntimeAdapter {
    available: bool,
}

impl RuntimeAdapter {
    /// Probes for the runtime binary by running `<runtime> --version` with a 5-second
    /// deadline, recording whether it succeeded.
    #[instrument(level = "debug")]
    pub async fn probe() -> Self {
        let mut cmd = Command::new(RUNTIME_BIN);
        cmd.arg("--version").stdout(Stdio::piped()).stderr(Stdio::piped());

        let available = match timeout(PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(e)) => {
                debug!(error = %e, "runtime binary not found");
                false
            }
            Err(_) => {
                warn!("runtime version probe timed out");
                false
            }
        };

        debug!(available, "runtime probe complete");
        RuntimeAdapter { available }
    }

    /// Whether the runtime was detected at construction time.
    pub fn available(&self) -> bool {
        self.available
    }

    /// Runs a one-shot, self-removing container and waits (up to `spec.timeout`) for it to
    /// exit, returning its captured streams and a best-effort memory sample. The container
    /// is gone by the time the process exits (`--rm`), so memory is sampled by polling
    /// `podman stats` concurrently with the run rather than afterward.
    #[instrument(level = "debug", skip(self, spec), fields(name = %spec.name))]
    pub async fn run_ephemeral(&self, spec: &ContainerSpec) -> anyhow::Result<CommandOutput> {
        let mut cmd = Command::new(RUNTIME_BIN);
        cmd.arg("run").arg("--rm");
        self.apply_isolation_flags(&mut cmd, spec);
        cmd.arg(&spec.image);
        cmd.args(&spec.argv);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().context("failed to spawn container")?;

        let peak_memory = Arc::new(AtomicU64::new(0));
        let sampler = {
            let peak_memory = peak_memory.clone();
            let runtime = self.clone();
            let name = spec.name.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(STATS_POLL_INTERVAL).await;
                    let sample = runtime.stats(&name).await;
                    if sample > peak_memory.load(Ordering::Relaxed) {
                        peak_memory.store(sample, Ordering::Relaxed);
                    }
                }
            })
        };

        let wait_result = timeout(spec.timeout, child.wait_with_output()).await;
        sampler.abort();

        let output = wait_result.context("container run timed out")??;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            memory_mib: peak_memory.load(Ordering::Relaxed),
        })
    }

    /// Starts a long-lived, detached container running an idle command, returning the
    /// runtime-assigned container id.
    #[instrument(level = "debug", skip(self, spec), fields(name = %spec.name))]
    pub async fn start_detached(&self, spec: &ContainerSpec) -> anyhow::Result<String> {
        let mut cmd = Command::new(RUNTIME_BIN);
        cmd.arg("run").arg("-d");
        self.apply_isolation_flags(&mut cmd, spec);
        cmd.arg(&spec.image);
        cmd.args(["sh", "-c", "sleep 3600"]);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = cmd.output().await.context("failed to start detached container")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("failed to start session container: {stderr}"));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    /// Attaches to a running container and runs `argv`, optionally piping `stdin_bytes` in.
    #[instrument(level = "debug", skip(self, argv, stdin_bytes))]
    pub async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        stdin_bytes: Option<&[u8]>,
    ) -> anyhow::Result<CommandOutput> {
        let mut cmd = Command::new(RUNTIME_BIN);
        cmd.arg("exec");
        if stdin_bytes.is_some() {
            cmd.arg("-i");
        }
        cmd.arg(container_id);
        cmd.args(argv);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().context("failed to spawn exec")?;
        if let Some(bytes) = stdin_bytes {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(bytes).await.ok();
            }
        } else {
            child.stdin.take();
        }

        let output = child.wait_with_output().await.context("exec failed")?;
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // `exec` targets a long-lived session container that is still running
            // afterward, so the caller samples memory separately via `stats()`.
            memory_mib: 0,
        })
    }

    /// Best-effort kill; errors are swallowed since the caller is tearing down anyway.
    #[instrument(level = "debug", skip(self))]
    pub async fn kill(&self, container_id: &str) {
        let result = Command::new(RUNTIME_BIN)
            .args(["kill", container_id])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Err(e) = result {
            debug!(error = %e, container_id, "kill failed, ignoring");
        }

        let _ = Command::new(RUNTIME_BIN)
            .args(["rm", "-f", container_id])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }

    /// Parses the runtime's JSON stats output into a memory figure in MiB. Returns 0 on any
    /// parse failure rather than propagating an error, since memory usage is best-effort.
    #[instrument(level = "debug", skip(self))]
    pub async fn stats(&self, container_id: &str) -> u64 {
        let output = match Command::new(RUNTIME_BIN)
            .args(["stats", "--no-stream", "--format", "json", container_id])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
        {
            Ok(o) if o.status.success() => o,
            _ => return 0,
        };

        parse_stats_mib(&output.stdout).unwrap_or(0)
    }

    /// Summarizes runtime availability and, if available, basic system info.
    #[instrument(level = "debug", skip(self))]
    pub async fn system_info(&self) -> SystemInfo {
        if !self.available {
            return SystemInfo {
                status: "unavailable".into(),
                version: None,
                host: None,
                store: None,
                reason: Some("runtime binary not found on PATH".into()),
            };
        }

        let output = Command::new(RUNTIME_BIN)
            .args(["version", "--format", "{{.Client.Version}}"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(o) if o.status.success() => SystemInfo {
                status: "available".into(),
                version: Some(String::from_utf8_lossy(&o.stdout).trim().to_owned()),
                host: None,
                store: None,
                reason: None,
            },
            Ok(o) => SystemInfo {
                status: "error".into(),
                version: None,
                host: None,
                store: None,
                reason: Some(String::from_utf8_lossy(&o.stderr).trim().to_owned()),
            },
            Err(e) => SystemInfo {
                status: "error".into(),
                version: None,
                host: None,
                store: None,
                reason: Some(e.to_string()),
            },
        }
    }

    fn apply_isolation_flags(&self, cmd: &mut Command, spec: &ContainerSpec) {
        cmd.args(["--name", &spec.name]);
        cmd.args(["--memory", &format!("{}m", spec.memory_mib)]);
        cmd.args(["--cpus", &spec.cpu_limit.to_string()]);
        cmd.args(["--tmpfs", &format!("/tmp:rw,size={}m,mode=1777", spec.tmpfs_mib)]);

        if !spec.network {
            cmd.args(["--network", "none"]);
        }
        if spec.read_only_root {
            cmd.arg("--read-only");
        }
        if spec.drop_privileges {
            cmd.arg("--security-opt").arg("no-new-privileges");
            cmd.arg("--cap-drop").arg("ALL");
            cmd.args(["--user", "nobody"]);
        }
        if let Some((host, container)) = &spec.code_mount {
            cmd.arg("-v").arg(format!("{host}:{container}:ro"));
        }
    }
}

/// Accepts strings ending in `MB` or `KB`; KiB figures are converted by integer division.
fn parse_stats_mib(raw: &[u8]) -> Option<u64> {
    #[derive(Deserialize)]
    struct Entry {
        #[serde(rename = "MemUsage", alias = "mem_usage")]
        mem_usage: Option<String>,
    }

    let text = std::str::from_utf8(raw).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let entries: Vec<Entry> = serde_json::from_str(trimmed)
        .or_else(|_| serde_json::from_str::<Entry>(trimmed).map(|e| vec![e]))
        .ok()?;

    let usage = entries.first()?.mem_usage.as_deref()?;
    let usage = usage.split('/').next().unwrap_or(usage).trim();

    if let Some(mb) = usage.strip_suffix("MB") {
        mb.trim().parse::<f64>().ok().map(|v| v as u64)
    } else if let Some(kb) = usage.strip_suffix("KB") {
        kb.trim().parse::<u64>().ok().map(|v| v / 1024)
    } else if let Some(gb) = usage.strip_suffix("GB") {
        gb.trim().parse::<f64>().ok().map(|v| (v * 1024.0) as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mb_stats() {
        let raw = br#"[{"MemUsage": "42.5MB / 128MB"}]"#;
        assert_eq!(parse_stats_mib(raw), Some(42));
    }

    #[test]
    fn parses_kb_stats() {
        let raw = br#"[{"MemUsage": "2048KB / 65536KB"}]"#;
        assert_eq!(parse_stats_mib(raw), Some(2));
    }

    #[test]
    fn returns_none_on_garbage() {
        assert_eq!(parse_stats_mib(b"not json"), None);
    }
}
