//! Tool Surface: wires the two advertised MCP tools, `execute_code` and `create_file`, to
//! the Command Router and Execution Engine.

use std::sync::Arc;

use crate::commands::CommandRouter;
use crate::engine::Engine;
use crate::types::Language;

/// The two tools advertised by `tools/list`, bound to their backing components.
#[derive(Debug)]
pub struct ToolSurface {
    engine: Engine,
    router: Arc<CommandRouter>,
}

impl ToolSurface {
    pub fn new(engine: Engine, router: Arc<CommandRouter>) -> Self {
        ToolSurface { engine, router }
    }

    /// `language = "slash"` or a `code` body starting with `/` goes to the command router;
    /// anything else runs directly through the engine's fallback path.
    pub async fn execute_code(&self, language: &str, code: &str) -> String {
        if language.eq_ignore_ascii_case("slash") || code.trim_start().starts_with('/') {
            return self.router.dispatch(code).await;
        }

        let Some(lang) = Language::parse(language) else {
            return format!("Unsupported language: '{language}'");
        };

        self.engine.execute_fallback(code, lang).await.display_text()
    }

    /// Refuses names containing `..` or starting with `/`, otherwise writes `content` and
    /// reports the number of bytes actually written.
    pub async fn create_file(&self, filename: &str, content: &str) -> String {
        if filename.contains("..") || filename.starts_with('/') {
            return format!(
                "Error: refusing to write '{filename}' — path traversal or absolute paths are not allowed"
            );
        }

        match tokio::fs::write(filename, content).await {
            Ok(()) => format!("File '{filename}' written successfully ({} bytes)", content.len()),
            Err(e) => format!("Error: failed to write '{filename}': {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn test_surface() -> ToolSurface {
        let config = Arc::new(Config::from_env());
        let engine = Engine::new(config.clone()).await;
        let router = Arc::new(CommandRouter::new(engine.clone(), config));
        ToolSurface::new(engine, router)
    }

    #[tokio::test]
    async fn execute_code_runs_python() {
        let surface = test_surface().await;
        let text = surface.execute_code("python", "print(2 + 2)").await;
        assert!(text.contains('4'));
    }

    #[tokio::test]
    async fn execute_code_routes_slash_to_router() {
        let surface = test_surface().await;
        let text = surface.execute_code("slash", "/help").await;
        assert!(text.contains("run"));
    }

    #[tokio::test]
    async fn execute_code_routes_leading_slash_code() {
        let surface = test_surface().await;
        let text = surface.execute_code("python", "/status").await;
        assert!(text.contains("Commands executed"));
    }

    #[tokio::test]
    async fn create_file_rejects_path_traversal() {
        let surface = test_surface().await;
        let text = surface.create_file("../escape.txt", "x").await;
        assert!(text.starts_with("Error:"));
        assert!(!std::path::Path::new("../escape.txt").exists());
    }

    #[tokio::test]
    async fn create_file_rejects_absolute_path() {
        let surface = test_surface().await;
        let text = surface.create_file("/etc/escape.txt", "x").await;
        assert!(text.starts_with("Error:"));
    }

    #[tokio::test]
    async fn create_file_reports_byte_count() {
        let surface = test_surface().await;
        let filename = format!("light_sandbox_test_{}.txt", uuid::Uuid::new_v4().simple());
        let text = surface.create_file(&filename, "héllo").await;
        // "héllo" is 6 bytes UTF-8 (é takes 2 bytes), not 5 characters.
        assert!(text.contains("(6 bytes)"), "unexpected message: {text}");
        tokio::fs::remove_file(&filename).await.ok();
    }
}
