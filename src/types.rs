//! Shared data types for the execution engine, command router, and inspector.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Languages the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Bash,
    Rust,
    Go,
}

impl Language {
    /// Parses a language name, case-insensitively. Unknown names fall back to `None` so
    /// callers can decide whether that means `isolation` tier or a hard error.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Language::Python),
            "javascript" | "js" | "node" => Some(Language::Javascript),
            "bash" | "sh" | "shell" => Some(Language::Bash),
            "rust" | "rs" => Some(Language::Rust),
            "go" | "golang" => Some(Language::Go),
            _ => None,
        }
    }

    /// File extension used when writing the snippet to disk.
    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Javascript => "js",
            Language::Bash => "sh",
            Language::Rust => "rs",
            Language::Go => "go",
        }
    }

    /// Argument vector used to run a file of this language inside a container.
    pub fn container_argv(self, file: &str) -> Vec<String> {
        match self {
            Language::Python => vec!["python3".into(), file.into()],
            Language::Javascript => vec!["node".into(), file.into()],
            Language::Bash => vec!["sh".into(), file.into()],
            Language::Rust => vec![
                "sh".into(),
                "-c".into(),
                format!("cd /tmp && rustc {file} -o /tmp/program && /tmp/program"),
            ],
            Language::Go => vec![
                "sh".into(),
                "-c".into(),
                format!("cd /tmp && go run {file}"),
            ],
        }
    }

    /// Base OCI image the container tiers run the snippet against. Pre-built, stock
    /// language images — the engine never builds or bakes its own (see Non-goals).
    pub fn container_image(self) -> &'static str {
        match self {
            Language::Python => "docker.io/library/python:3-slim",
            Language::Javascript => "docker.io/library/node:20-slim",
            Language::Bash => "docker.io/library/bash:5",
            Language::Rust => "docker.io/library/rust:1-slim",
            Language::Go => "docker.io/library/golang:1-alpine",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Bash => "bash",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Isolation tier requested for a container execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Isolation,
    Persistent,
    Development,
}

impl Tier {
    /// An unknown tier name is treated as `isolation`, per the engine contract.
    pub fn parse_or_isolation(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "persistent" => Tier::Persistent,
            "development" | "dev" => Tier::Development,
            _ => Tier::Isolation,
        }
    }

    /// Strict parse used where an unrecognized tier must be rejected outright
    /// (the `/container` command).
    pub fn parse_strict(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "isolation" => Some(Tier::Isolation),
            "persistent" => Some(Tier::Persistent),
            "development" | "dev" => Some(Tier::Development),
            _ => None,
        }
    }

    pub fn security_level(self) -> &'static str {
        match self {
            Tier::Isolation => "isolation",
            Tier::Persistent => "persistent",
            Tier::Development => "development",
        }
    }
}

/// Terminal disposition of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Podman,
    Fallback,
    PodmanTimeout,
    PodmanError,
    FallbackError,
}

impl Method {
    /// `success` can only be true for these two terminal methods.
    pub fn can_succeed(self) -> bool {
        matches!(self, Method::Podman | Method::Fallback)
    }
}

/// Immutable result of a single execution, container-backed or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub execution_time: f64,
    pub memory_usage: u64,
    pub container_id: Option<String>,
    pub security_level: String,
    pub method: Method,
}

impl ExecutionResult {
    /// Builds a result, clamping `success` to the method's terminal disposition so the
    /// `(success = true) => method in {podman, fallback}` invariant can never be violated
    /// by a caller forgetting to check it.
    pub fn new(
        success: bool,
        output: impl Into<String>,
        error: impl Into<String>,
        execution_time: f64,
        memory_usage: u64,
        container_id: Option<String>,
        security_level: impl Into<String>,
        method: Method,
    ) -> Self {
        ExecutionResult {
            success: success && method.can_succeed(),
            output: output.into(),
            error: error.into(),
            execution_time,
            memory_usage,
            container_id,
            security_level: security_level.into(),
            method,
        }
    }

    /// Renders the result as the single text blob returned across the tool boundary.
    pub fn display_text(&self) -> String {
        let mut text = self.output.clone();
        if !self.error.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&self.error);
        }
        text
    }
}

/// A long-lived container reused across calls within the same language (persistent tier).
#[derive(Debug, Clone)]
pub struct SessionContainer {
    pub language: Language,
    pub container_id: String,
    pub created_at: std::time::Instant,
}

/// Direction of a recorded RPC event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A single recorded inbound or outbound protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEvent {
    pub timestamp: f64,
    pub direction: Direction,
    pub message_type: String,
    pub method: Option<String>,
    pub id: Option<serde_json::Value>,
    pub content: serde_json::Value,
    pub execution_time_ms: Option<f64>,
    pub error: Option<String>,
}

/// Per-method aggregate, derived incrementally from the event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodStats {
    pub count: u64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
    pub errors: u64,
}

/// Aggregate performance metrics tracked by the inspector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_messages: u64,
    pub avg_response_time: f64,
    pub error_count: u64,
    pub method_stats: HashMap<String, MethodStats>,
}

/// Host resource snapshot reported alongside the MCP metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
}
