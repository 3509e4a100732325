//! Command Router: parses human-typed `/command` strings, dispatches to handlers, and
//! maintains session statistics and a bounded history.

mod quantum;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::instrument;

use crate::config::Config;
use crate::engine::Engine;
use crate::security;
use crate::types::{Language, Tier};

const HISTORY_CAPACITY: usize = 1_000;

/// Metadata for a single registered command, used by `/help` and the status report.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub usage: &'static str,
    pub examples: &'static [&'static str],
    pub aliases: &'static [&'static str],
}

const REGISTRY: &[Command] = &[
    Command {
        name: "run",
        description: "Execute code directly as a host subprocess (no container).",
        category: "execution",
        usage: "/run <language> <code>",
        examples: &["/run python print(2 + 2)"],
        aliases: &["r"],
    },
    Command {
        name: "container",
        description: "Execute code inside a container at the given isolation tier.",
        category: "execution",
        usage: "/container <isolation|persistent|development> <language> <code>",
        examples: &["/container isolation python print('hi')"],
        aliases: &["c"],
    },
    Command {
        name: "secure_run",
        description: "Scan code for risky patterns, then run it at the isolation tier.",
        category: "execution",
        usage: "/secure_run <language> <code>",
        examples: &["/secure_run python import os"],
        aliases: &[],
    },
    Command {
        name: "dev_run",
        description: "Execute code at the development tier (relaxed isolation).",
        category: "execution",
        usage: "/dev_run <language> <code>",
        examples: &["/dev_run javascript console.log(1)"],
        aliases: &[],
    },
    Command {
        name: "quantum",
        description: "Run a canned performance-comparison demonstration.",
        category: "demonstration",
        usage: "/quantum <sort|prime|sum of squares|...>",
        examples: &["/quantum sort"],
        aliases: &["q"],
    },
    Command {
        name: "quantum_container",
        description: "Describe a multi-container quantum comparison (documentation stub).",
        category: "demonstration",
        usage: "/quantum_container <task>",
        examples: &["/quantum_container sort"],
        aliases: &[],
    },
    Command {
        name: "benchmark",
        description: "Time `iterations` runs of a snippet (default 10).",
        category: "demonstration",
        usage: "/benchmark <language> <code> [iterations]",
        examples: &["/benchmark python print(1) 100"],
        aliases: &["bench"],
    },
    Command {
        name: "podman_status",
        description: "Report whether a container runtime is available.",
        category: "diagnostics",
        usage: "/podman_status",
        examples: &["/podman_status"],
        aliases: &[],
    },
    Command {
        name: "cleanup",
        description: "Kill and remove a named session container, or all of them.",
        category: "diagnostics",
        usage: "/cleanup [session]",
        examples: &["/cleanup", "/cleanup session-python"],
        aliases: &[],
    },
    Command {
        name: "status",
        description: "Show session statistics and active container sessions.",
        category: "diagnostics",
        usage: "/status",
        examples: &["/status"],
        aliases: &["stats"],
    },
    Command {
        name: "help",
        description: "List commands, or show usage for one.",
        category: "diagnostics",
        usage: "/help [command]",
        examples: &["/help", "/help quantum"],
        aliases: &["h", "?"],
    },
];

#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub commands_executed: u64,
    pub quantum_tests_run: u64,
    pub performance_gains_found: u64,
    pub bugs_prevented: u64,
    pub containers_used: u64,
    pub security_violations_prevented: u64,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    input: String,
}

/// Parses `/name args...` strings and dispatches to the matching handler. The registry is
/// populated once at construction and never mutated; only the stats counters and history
/// are written afterward, and only monotonically.
#[derive(Debug)]
pub struct CommandRouter {
    engine: Engine,
    config: Arc<Config>,
    alias_map: HashMap<&'static str, &'static str>,
    stats: RwLock<Stats>,
    history: RwLock<VecDeque<HistoryEntry>>,
}

impl CommandRouter {
    pub fn new(engine: Engine, config: Arc<Config>) -> Self {
        let mut alias_map = HashMap::new();
        for cmd in REGISTRY {
            for alias in cmd.aliases {
                alias_map.insert(*alias, cmd.name);
            }
        }

        CommandRouter {
            engine,
            config,
            alias_map,
            stats: RwLock::new(Stats::default()),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    pub fn registry(&self) -> &'static [Command] {
        REGISTRY
    }

    fn resolve(&self, name: &str) -> Option<&'static Command> {
        let name = name.to_ascii_lowercase();
        let canonical = self
            .alias_map
            .get(name.as_str())
            .copied()
            .unwrap_or(name.as_str());
        REGISTRY.iter().find(|c| c.name == canonical || c.name == name)
    }

    /// Parses and dispatches a `/command` line, returning the handler's text block.
    #[instrument(level = "debug", skip(self, input))]
    pub async fn dispatch(&self, input: &str) -> String {
        let input = input.trim().strip_prefix('/').unwrap_or(input.trim());
        let mut parts = input.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("").to_string();
        let rest = parts.next().unwrap_or("").trim();

        self.record_history(input).await;

        let Some(command) = self.resolve(&name) else {
            return format!(
                "Unknown command: '{name}'. Send /help to see the list of available commands."
            );
        };

        self.increment_commands_executed().await;

        match command.name {
            "run" => self.handle_run(rest).await,
            "container" => self.handle_container(rest).await,
            "secure_run" => self.handle_secure_run(rest).await,
            "dev_run" => self.handle_dev_run(rest).await,
            "quantum" => self.handle_quantum(rest).await,
            "quantum_container" => self.handle_quantum_container(rest).await,
            "benchmark" => self.handle_benchmark(rest).await,
            "podman_status" => self.handle_podman_status().await,
            "cleanup" => self.handle_cleanup(rest).await,
            "status" => self.handle_status().await,
            "help" => self.handle_help(rest).await,
            other => format!("Command '{other}' is registered but has no handler wired up."),
        }
    }

    pub async fn stats(&self) -> Stats {
        self.stats.read().await.clone()
    }

    async fn record_history(&self, input: &str) {
        let mut history = self.history.write().await;
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(HistoryEntry { input: input.to_string() });
    }

    async fn increment_commands_executed(&self) {
        self.stats.write().await.commands_executed += 1;
    }

    fn split_language_and_code(args: &str) -> Option<(&str, &str)> {
        let mut parts = args.splitn(2, char::is_whitespace);
        let lang = parts.next()?;
        let code = parts.next().unwrap_or("").trim();
        if lang.is_empty() || code.is_empty() {
            return None;
        }
        Some((lang, code))
    }

    async fn handle_run(&self, args: &str) -> String {
        let Some((lang, code)) = Self::split_language_and_code(args) else {
            return "Usage: /run <language> <code>".to_string();
        };
        let Some(language) = Language::parse(lang) else {
            return format!("Unsupported language: '{lang}'");
        };
        let result = self.engine.execute_fallback(code, language).await;
        result.display_text()
    }

    async fn handle_container(&self, args: &str) -> String {
        let mut parts = args.splitn(3, char::is_whitespace);
        let Some(tier_str) = parts.next().filter(|s| !s.is_empty()) else {
            return "Usage: /container <isolation|persistent|development> <language> <code>".to_string();
        };
        let Some(lang_str) = parts.next().filter(|s| !s.is_empty()) else {
            return "Usage: /container <isolation|persistent|development> <language> <code>".to_string();
        };
        let code = parts.next().unwrap_or("").trim();
        if code.is_empty() {
            return "Usage: /container <isolation|persistent|development> <language> <code>".to_string();
        }

        let Some(tier) = Tier::parse_strict(tier_str) else {
            return format!(
                "Unknown isolation tier '{tier_str}'. Expected one of: isolation, persistent, development."
            );
        };
        let Some(language) = Language::parse(lang_str) else {
            return format!("Unsupported language: '{lang_str}'");
        };

        let result = self.engine.execute(code, language, tier).await;
        self.stats.write().await.containers_used += 1;
        result.display_text()
    }

    async fn handle_secure_run(&self, args: &str) -> String {
        let Some((lang, code)) = Self::split_language_and_code(args) else {
            return "Usage: /secure_run <language> <code>".to_string();
        };
        let Some(language) = Language::parse(lang) else {
            return format!("Unsupported language: '{lang}'");
        };

        let findings = security::analyze(code);
        let mut report = String::new();
        if !findings.is_empty() {
            self.stats.write().await.security_violations_prevented += 1;
            report.push_str("Security Analyzer findings:\n");
            for finding in &findings {
                report.push_str(&format!("  - {} (matched: '{}')\n", finding.category, finding.token));
            }
            report.push('\n');
        }

        let result = self.engine.execute(code, language, Tier::Isolation).await;
        report.push_str(&result.display_text());
        report
    }

    async fn handle_dev_run(&self, args: &str) -> String {
        let Some((lang, code)) = Self::split_language_and_code(args) else {
            return "Usage: /dev_run <language> <code>".to_string();
        };
        let Some(language) = Language::parse(lang) else {
            return format!("Unsupported language: '{lang}'");
        };
        let result = self.engine.execute(code, language, Tier::Development).await;
        result.display_text()
    }

    async fn handle_quantum(&self, task: &str) -> String {
        if task.is_empty() {
            return "Usage: /quantum <task>".to_string();
        }
        self.stats.write().await.quantum_tests_run += 1;
        let report = quantum::run_demo(&self.engine, task).await;
        if report.contains("Speedup:") {
            self.stats.write().await.performance_gains_found += 1;
        }
        report
    }

    async fn handle_quantum_container(&self, task: &str) -> String {
        format!(
            "Multi-container quantum comparison for '{task}' is not implemented — this is a \
             documentation stub. A full implementation would spin up one container per \
             candidate implementation and compare them under identical resource limits."
        )
    }

    async fn handle_benchmark(&self, args: &str) -> String {
        let tokens: Vec<&str> = args.split_whitespace().collect();
        if tokens.len() < 2 {
            return "Usage: /benchmark <language> <code> [iterations]".to_string();
        }

        let (iterations, code_tokens) = match tokens.last() {
            Some(last) if last.chars().all(|c| c.is_ascii_digit()) && tokens.len() > 2 => {
                (last.parse::<u32>().unwrap_or(10), &tokens[..tokens.len() - 1])
            }
            _ => (10, tokens.as_slice()),
        };

        let lang = code_tokens[0];
        let code = code_tokens[1..].join(" ");
        if code.is_empty() {
            return "Usage: /benchmark <language> <code> [iterations]".to_string();
        }

        let Some(language) = Language::parse(lang) else {
            return format!("Unsupported language: '{lang}'");
        };

        let driver = build_benchmark_driver(language, &code, iterations);
        let result = self.engine.execute_fallback(&driver, language).await;
        result.display_text()
    }

    async fn handle_podman_status(&self) -> String {
        let info = self.engine.runtime().system_info().await;
        match info.status.as_str() {
            "available" => format!(
                "Container runtime available (podman{}).",
                info.version.map(|v| format!(", version {v}")).unwrap_or_default()
            ),
            "unavailable" => format!(
                "No container runtime detected{}. All executions will use the subprocess fallback.",
                info.reason.map(|r| format!(": {r}")).unwrap_or_default()
            ),
            _ => format!(
                "Container runtime reported an error{}.",
                info.reason.map(|r| format!(": {r}")).unwrap_or_default()
            ),
        }
    }

    async fn handle_cleanup(&self, session: &str) -> String {
        let session = session.trim();
        let removed = if session.is_empty() {
            self.engine.cleanup(None).await
        } else {
            self.engine.cleanup(Some(session)).await
        };
        format!("Cleaned up {removed} session container(s).")
    }

    async fn handle_status(&self) -> String {
        let stats = self.stats().await;
        format!(
            "Commands executed: {}\n\
             Quantum tests run: {}\n\
             Performance gains found: {}\n\
             Bugs prevented: {}\n\
             Containers used: {}\n\
             Security violations prevented: {}\n\
             Active sessions: {}\n\
             Inspector port: {}",
            stats.commands_executed,
            stats.quantum_tests_run,
            stats.performance_gains_found,
            stats.bugs_prevented,
            stats.containers_used,
            stats.security_violations_prevented,
            self.engine.session_count(),
            self.config.inspector_port,
        )
    }

    async fn handle_help(&self, name: &str) -> String {
        if name.is_empty() {
            let mut text = String::from("Available commands:\n");
            for cmd in REGISTRY {
                text.push_str(&format!("  /{:<18} {}\n", cmd.name, cmd.description));
            }
            return text;
        }

        match self.resolve(name) {
            Some(cmd) => format!(
                "/{}\n{}\nUsage: {}\nExamples:\n{}",
                cmd.name,
                cmd.description,
                cmd.usage,
                cmd.examples.iter().map(|e| format!("  {e}")).collect::<Vec<_>>().join("\n"),
            ),
            None => format!("No such command: '{name}'. Send /help for the full list."),
        }
    }
}

fn build_benchmark_driver(language: Language, code: &str, iterations: u32) -> String {
    match language {
        Language::Python => format!(
            "import time\nstart = time.perf_counter()\nfor _ in range({iterations}):\n    {code}\nelapsed = time.perf_counter() - start\nprint(f'{{elapsed:.6f}}s for {iterations} iterations ({{elapsed / {iterations}:.6f}}s/iter)')"
        ),
        Language::Javascript => format!(
            "const start = process.hrtime.bigint();\nfor (let i = 0; i < {iterations}; i++) {{ {code} }}\nconst elapsed = Number(process.hrtime.bigint() - start) / 1e9;\nconsole.log(`${{elapsed.toFixed(6)}}s for {iterations} iterations (${{(elapsed / {iterations}).toFixed(6)}}s/iter)`);"
        ),
        Language::Bash => format!(
            "start=$(date +%s.%N)\nfor i in $(seq 1 {iterations}); do\n  {code}\ndone\nend=$(date +%s.%N)\necho \"$(echo \"$end - $start\" | bc)s for {iterations} iterations\""
        ),
        Language::Rust | Language::Go => format!(
            "# benchmark driver unsupported for {language} in the fallback path\n{code}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn test_router() -> CommandRouter {
        let config = Arc::new(Config::from_env());
        let engine = Engine::new(config.clone()).await;
        CommandRouter::new(engine, config)
    }

    #[tokio::test]
    async fn help_lists_known_commands() {
        let router = test_router().await;
        let output = router.dispatch("/help").await;
        assert!(output.contains("run"));
        assert!(output.contains("container"));
        assert!(output.contains("status"));
    }

    #[tokio::test]
    async fn unknown_command_points_to_help() {
        let router = test_router().await;
        let output = router.dispatch("/nope").await;
        assert!(output.contains("Unknown command"));
    }

    #[tokio::test]
    async fn alias_resolves_to_canonical_handler() {
        let router = test_router().await;
        let output = router.dispatch("/q sort").await;
        assert!(output.contains("Quantum Debug Comparison"));
    }

    #[tokio::test]
    async fn container_rejects_unknown_tier() {
        let router = test_router().await;
        let output = router.dispatch("/container bogus python print(1)").await;
        assert!(output.contains("Unknown isolation tier"));
    }

    #[tokio::test]
    async fn stats_are_monotonic_across_calls() {
        let router = test_router().await;
        router.dispatch("/help").await;
        router.dispatch("/help").await;
        let stats = router.stats().await;
        assert_eq!(stats.commands_executed, 2);
    }

    #[test]
    fn benchmark_detects_trailing_iteration_count() {
        let driver = build_benchmark_driver(Language::Python, "pass", 42);
        assert!(driver.contains("range(42)"));
    }
}
