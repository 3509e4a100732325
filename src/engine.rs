//! Execution Engine: runs a code snippet either inside a tiered, rootless OCI container
//! or, when no runtime is available, as a direct host subprocess.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use dashmap::DashMap;
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::runtime::{ContainerSpec, RuntimeAdapter};
use crate::types::{ExecutionResult, Language, Method, SessionContainer, Tier};

const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the runtime adapter, the persistent-session registry, and the fallback
/// subprocess path. Cloning an `Engine` is cheap — it shares the adapter and registry.
#[derive(Clone, Debug)]
pub struct Engine {
    runtime: Arc<RuntimeAdapter>,
    sessions: Arc<DashMap<String, SessionContainer>>,
    config: Arc<Config>,
}

impl Engine {
    pub async fn new(config: Arc<Config>) -> Self {
        let runtime = RuntimeAdapter::probe().await;
        if !runtime.available() {
            warn!("no container runtime detected, all executions will use the subprocess fallback");
        }

        Engine {
            runtime: Arc::new(runtime),
            sessions: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn runtime(&self) -> &RuntimeAdapter {
        &self.runtime
    }

    /// Executes `code` as `language` under `tier`. An unrecognized `tier` string is
    /// already normalized to `isolation` by the caller (`Tier::parse_or_isolation`); this
    /// method just dispatches on the enum.
    #[instrument(level = "info", skip(self, code), fields(%language, ?tier))]
    pub async fn execute(&self, code: &str, language: Language, tier: Tier) -> ExecutionResult {
        if !self.runtime.available() {
            return self.run_fallback(code, language).await;
        }

        match tier {
            Tier::Isolation => self.run_isolation(code, language).await,
            Tier::Persistent => self.run_persistent(code, language).await,
            Tier::Development => self.run_development(code, language).await,
        }
    }

    /// Runs via the host subprocess path regardless of container availability. Used
    /// directly by the `/run` command and the `execute_code` tool's non-slash branch.
    #[instrument(level = "info", skip(self, code), fields(%language))]
    pub async fn execute_fallback(&self, code: &str, language: Language) -> ExecutionResult {
        self.run_fallback(code, language).await
    }

    async fn run_isolation(&self, code: &str, language: Language) -> ExecutionResult {
        let limits = self.config.isolation;
        self.run_ephemeral_tier(code, language, limits, "ephemeral", "isolation", true, true, false)
            .await
    }

    async fn run_development(&self, code: &str, language: Language) -> ExecutionResult {
        let limits = self.config.development;
        self.run_ephemeral_tier(code, language, limits, "dev", "development", false, false, true)
            .await
    }

    /// Shared implementation for the *isolation* and *development* tiers: both write the
    /// snippet to a host temp file, bind-mount it read-only into a fresh container, and
    /// differ only in resource limits and the isolation flags applied.
    #[allow(clippy::too_many_arguments)]
    async fn run_ephemeral_tier(
        &self,
        code: &str,
        language: Language,
        limits: crate::config::ResourceLimits,
        name_prefix: &str,
        security_level: &str,
        read_only_root: bool,
        drop_privileges: bool,
        network: bool,
    ) -> ExecutionResult {
        let start = Instant::now();

        let dir = match tempdir() {
            Ok(d) => d,
            Err(e) => return engine_error(start, security_level, e),
        };

        let file_name = format!("code.{}", language.extension());
        let host_path = dir.path().join(&file_name);
        if let Err(e) = tokio::fs::write(&host_path, code).await {
            return engine_error(start, security_level, e);
        }

        let container_path = format!("/code/{file_name}");
        let argv = language.container_argv(&container_path);
        let name = format!("{name_prefix}-{language}-{}", short_id());

        let spec = ContainerSpec {
            name: name.clone(),
            image: language.container_image().to_string(),
            argv,
            memory_mib: limits.memory_mib,
            cpu_limit: limits.cpu_limit,
            tmpfs_mib: limits.tmpfs_mib,
            network,
            read_only_root,
            drop_privileges,
            code_mount: Some((host_path.to_string_lossy().into_owned(), container_path)),
            timeout: limits.timeout,
        };

        info!(container = %name, security_level, "running container");
        match self.runtime.run_ephemeral(&spec).await {
            Ok(output) => ExecutionResult::new(
                output.exit_code == 0,
                output.stdout,
                output.stderr,
                start.elapsed().as_secs_f64(),
                output.memory_mib,
                Some(name),
                security_level,
                Method::Podman,
            ),
            Err(e) if e.to_string().contains("timed out") => {
                self.runtime.kill(&name).await;
                ExecutionResult::new(
                    false,
                    "",
                    "execution timed out".to_string(),
                    start.elapsed().as_secs_f64(),
                    0,
                    Some(name),
                    security_level,
                    Method::PodmanTimeout,
                )
            }
            Err(e) => {
                self.runtime.kill(&name).await;
                ExecutionResult::new(
                    false,
                    "",
                    e.to_string(),
                    start.elapsed().as_secs_f64(),
                    0,
                    Some(name),
                    security_level,
                    Method::PodmanError,
                )
            }
        }
    }

    async fn run_persistent(&self, code: &str, language: Language) -> ExecutionResult {
        let start = Instant::now();
        let key = format!("session-{language}");

        let container_id = match self.session_container_id(&key, language).await {
            Ok(id) => id,
            Err(e) => {
                debug!(error = %e, "persistent session unavailable, downgrading to isolation");
                return self.run_isolation(code, language).await;
            }
        };

        let file_name = format!("code_{}.{}", short_id(), language.extension());
        let remote_path = format!("/tmp/{file_name}");

        let write_argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > {remote_path}"),
        ];

        if let Err(e) = self
            .runtime
            .exec(&container_id, &write_argv, Some(code.as_bytes()))
            .await
        {
            warn!(error = %e, "failed to write code into session container, downgrading to isolation");
            return self.run_isolation(code, language).await;
        }

        let run_argv = language.container_argv(&remote_path);
        match self.runtime.exec(&container_id, &run_argv, None).await {
            Ok(output) => {
                let memory = self.runtime.stats(&container_id).await;
                ExecutionResult::new(
                    output.exit_code == 0,
                    output.stdout,
                    output.stderr,
                    start.elapsed().as_secs_f64(),
                    memory,
                    Some(container_id),
                    "persistent",
                    Method::Podman,
                )
            }
            Err(e) => {
                warn!(error = %e, "exec in session container failed, downgrading to isolation");
                self.run_isolation(code, language).await
            }
        }
    }

    /// Looks up or lazily creates the detached session container for `language`. `DashMap`
    /// serializes concurrent lookup-or-create attempts on the same key via its internal
    /// shard locks, so two callers racing on the same language cannot both start a
    /// container.
    async fn session_container_id(&self, key: &str, language: Language) -> anyhow::Result<String> {
        if let Some(entry) = self.sessions.get(key) {
            return Ok(entry.container_id.clone());
        }

        let limits = self.config.isolation;
        let name = format!("session-{language}-{}", short_id());
        let spec = ContainerSpec {
            name: name.clone(),
            image: language.container_image().to_string(),
            argv: vec![],
            memory_mib: limits.memory_mib,
            cpu_limit: limits.cpu_limit,
            tmpfs_mib: limits.tmpfs_mib,
            network: false,
            read_only_root: true,
            drop_privileges: true,
            code_mount: None,
            timeout: limits.timeout,
        };

        let container_id = self.runtime.start_detached(&spec).await?;

        self.sessions.entry(key.to_string()).or_insert_with(|| SessionContainer {
            language,
            container_id: container_id.clone(),
            created_at: Instant::now(),
        });

        // Another task may have won the race and inserted first; always return the
        // registry's copy so every caller converges on one container per language.
        Ok(self
            .sessions
            .get(key)
            .map(|e| e.container_id.clone())
            .unwrap_or(container_id))
    }

    async fn run_fallback(&self, code: &str, language: Language) -> ExecutionResult {
        let start = Instant::now();

        if matches!(language, Language::Rust | Language::Go) {
            return ExecutionResult::new(
                true,
                format!("Unsupported language: {language}"),
                "",
                start.elapsed().as_secs_f64(),
                0,
                None,
                "subprocess",
                Method::Fallback,
            );
        }

        let result = match language {
            Language::Python => run_python_fallback(code).await,
            Language::Javascript => run_js_fallback(code).await,
            Language::Bash => run_bash_fallback(code).await,
            Language::Rust | Language::Go => unreachable!("handled above"),
        };

        match result {
            Ok((success, text)) => ExecutionResult::new(
                success,
                text,
                "",
                start.elapsed().as_secs_f64(),
                0,
                None,
                "subprocess",
                Method::Fallback,
            ),
            Err(e) => ExecutionResult::new(
                false,
                "",
                e.to_string(),
                start.elapsed().as_secs_f64(),
                0,
                None,
                "subprocess",
                Method::FallbackError,
            ),
        }
    }

    /// Kills a named session, or every session if `session_id` is `None`, and removes it
    /// (them) from the registry.
    #[instrument(level = "info", skip(self))]
    pub async fn cleanup(&self, session_id: Option<&str>) -> usize {
        let to_remove: Vec<(String, String)> = match session_id {
            Some(id) => self
                .sessions
                .get(id)
                .map(|e| vec![(id.to_string(), e.container_id.clone())])
                .unwrap_or_default(),
            None => self
                .sessions
                .iter()
                .map(|e| (e.key().clone(), e.container_id.clone()))
                .collect(),
        };

        for (key, container_id) in &to_remove {
            self.runtime.kill(container_id).await;
            self.sessions.remove(key);
        }

        to_remove.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions_snapshot(&self) -> HashMap<String, SessionContainer> {
        self.sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

fn engine_error(start: Instant, level: &str, e: impl std::fmt::Display) -> ExecutionResult {
    ExecutionResult::new(
        false,
        "",
        e.to_string(),
        start.elapsed().as_secs_f64(),
        0,
        None,
        level,
        Method::PodmanError,
    )
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Writes the snippet to a host temp file and runs it with `python3`.
async fn run_python_fallback(code: &str) -> anyhow::Result<(bool, String)> {
    let dir = tempdir()?;
    let path = dir.path().join("snippet.py");
    tokio::fs::write(&path, code).await?;

    let mut cmd = Command::new("python3");
    cmd.arg(&path).stdout(Stdio::piped()).stderr(Stdio::piped());

    let output = timeout(FALLBACK_TIMEOUT, cmd.output())
        .await
        .context("execution timed out")??;
    Ok((
        output.status.success(),
        format_fallback_output(&output.stdout, &output.stderr, "Code executed successfully (no output)"),
    ))
}

/// Passes the snippet to `node -e`.
async fn run_js_fallback(code: &str) -> anyhow::Result<(bool, String)> {
    let mut cmd = Command::new("node");
    cmd.arg("-e").arg(code).stdout(Stdio::piped()).stderr(Stdio::piped());

    let output = timeout(FALLBACK_TIMEOUT, cmd.output())
        .await
        .context("execution timed out")??;
    Ok((
        output.status.success(),
        format_fallback_output(&output.stdout, &output.stderr, "Code executed successfully (no output)"),
    ))
}

/// Pipes the snippet into `sh` over stdin.
async fn run_bash_fallback(code: &str) -> anyhow::Result<(bool, String)> {
    let mut cmd = Command::new("sh");
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(code.as_bytes()).await?;
    }

    let output = timeout(FALLBACK_TIMEOUT, child.wait_with_output())
        .await
        .context("execution timed out")??;
    Ok((
        output.status.success(),
        format_fallback_output(&output.stdout, &output.stderr, "Command executed successfully (no output)"),
    ))
}

fn format_fallback_output(stdout: &[u8], stderr: &[u8], empty_message: &str) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);

    if stdout.trim().is_empty() && stderr.trim().is_empty() {
        return empty_message.to_string();
    }

    let mut text = String::new();
    if !stdout.trim().is_empty() {
        text.push_str("Output:\n");
        text.push_str(&stdout);
    }
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str("Errors/Warnings:\n");
        text.push_str(&stderr);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_empty_output() {
        assert_eq!(
            format_fallback_output(b"", b"", "Code executed successfully (no output)"),
            "Code executed successfully (no output)"
        );
    }

    #[test]
    fn formats_stdout_only() {
        let text = format_fallback_output(b"hello\n", b"", "no output");
        assert_eq!(text, "Output:\nhello\n");
    }

    #[test]
    fn formats_stdout_and_stderr() {
        let text = format_fallback_output(b"ok\n", b"warn\n", "no output");
        assert_eq!(text, "Output:\nok\n\nErrors/Warnings:\nwarn\n");
    }

    #[tokio::test]
    async fn fallback_python_success_text() {
        let (success, text) = run_python_fallback("print(2 + 2)").await.unwrap();
        assert!(success);
        assert!(text.contains('4'));
    }

    #[tokio::test]
    async fn fallback_python_error_is_not_success() {
        let (success, _text) = run_python_fallback("import sys; sys.exit(1)").await.unwrap();
        assert!(!success);
    }

    #[tokio::test]
    #[ignore = "exercises the real 30s fallback deadline"]
    async fn fallback_python_timeout_is_reported() {
        let config = Arc::new(Config::from_env());
        let engine = Engine::new(config).await;
        let result = engine
            .execute_fallback("import time; time.sleep(60)", Language::Python)
            .await;
        assert!(!result.success);
        assert!(result.display_text().contains("timed out"));
    }

    #[tokio::test]
    async fn execution_result_invariant_holds() {
        let r = ExecutionResult::new(true, "x", "", 0.0, 0, None, "subprocess", Method::PodmanTimeout);
        assert!(!r.success);
    }
}
