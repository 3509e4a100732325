//! JSON-RPC Front-End: a line-framed stdio reader, method dispatch, and error-envelope
//! generation.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::inspector::Inspector;
use crate::tools::ToolSurface;
use crate::types::Direction;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "light-sandbox";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol-level error taxonomy for the JSON-RPC envelope.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Parse error")]
    Parse,
    #[error("Invalid Request")]
    InvalidRequest,
    #[error("Method not found")]
    MethodNotFound,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse => -32700,
            RpcError::InvalidRequest => -32600,
            RpcError::MethodNotFound => -32601,
            RpcError::Internal(_) => -32603,
        }
    }
}

fn error_envelope(id: Value, err: &RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": err.code(),
            "message": err.to_string(),
        }
    })
}

/// Reads JSON-RPC requests line by line from `reader`, dispatches them against `tools`,
/// and writes responses to `writer`. Runs until `reader` hits EOF. Every response is
/// written as a single line and flushed immediately, so concurrent tasks writing through
/// the same `writer` (behind a mutex, in practice) never interleave partial lines.
pub async fn run_stdio_loop<R, W>(
    reader: R,
    mut writer: W,
    tools: Arc<ToolSurface>,
    inspector: Arc<Inspector>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed, shutting down");
                break;
            }
            Err(e) => {
                warn!(error = %e, "error reading stdin");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        if let Some(response) = handle_line(&line, &tools, &inspector).await {
            let mut text = serde_json::to_string(&response)?;
            text.push('\n');
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    Ok(())
}

async fn handle_line(
    line: &str,
    tools: &Arc<ToolSurface>,
    inspector: &Arc<Inspector>,
) -> Option<Value> {
    let start = Instant::now();

    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            let err = RpcError::Parse;
            let response = error_envelope(Value::Null, &err);
            inspector
                .log(
                    Direction::Inbound,
                    None,
                    None,
                    json!({"raw": line}),
                    None,
                    Some(err.to_string()),
                )
                .await;
            log_outbound(inspector, &response, start, Some(err.to_string())).await;
            return Some(response);
        }
    };

    let method = request.get("method").and_then(Value::as_str).map(str::to_owned);
    let has_id_field = request.get("id").is_some();
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    inspector
        .log(Direction::Inbound, method.clone(), Some(id.clone()), request.clone(), None, None)
        .await;

    // `notifications/initialized` carries no `id` by JSON-RPC convention and expects no
    // response. Any other request lacking `id` is a malformed request.
    if !has_id_field && method.as_deref() != Some("notifications/initialized") {
        let err = RpcError::InvalidRequest;
        let response = error_envelope(Value::Null, &err);
        log_outbound(inspector, &response, start, Some(err.to_string())).await;
        return Some(response);
    }

    let Some(method) = method else {
        let err = RpcError::MethodNotFound;
        let response = error_envelope(id, &err);
        log_outbound(inspector, &response, start, Some(err.to_string())).await;
        return Some(response);
    };

    let result = dispatch(&method, request.get("params"), &id, tools).await;

    match result {
        Dispatch::None => None,
        Dispatch::Result(value) => {
            let response = json!({"jsonrpc": "2.0", "id": id, "result": value});
            log_outbound(inspector, &response, start, None).await;
            Some(response)
        }
        Dispatch::Err(err) => {
            let response = error_envelope(id, &err);
            log_outbound(inspector, &response, start, Some(err.to_string())).await;
            Some(response)
        }
    }
}

enum Dispatch {
    None,
    Result(Value),
    Err(RpcError),
}

async fn dispatch(method: &str, params: Option<&Value>, _id: &Value, tools: &Arc<ToolSurface>) -> Dispatch {
    match method {
        "initialize" => Dispatch::Result(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
        })),
        "notifications/initialized" => Dispatch::None,
        "tools/list" => Dispatch::Result(tool_descriptors()),
        "tools/call" => match params {
            Some(params) => handle_tools_call(params, tools).await,
            None => Dispatch::Err(RpcError::Internal("tools/call requires params".into())),
        },
        _ => Dispatch::Err(RpcError::MethodNotFound),
    }
}

fn tool_descriptors() -> Value {
    json!({
        "tools": [
            {
                "name": "execute_code",
                "description": "Execute a snippet of Python, JavaScript, Bash, or a slash command.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "language": {"type": "string", "enum": ["python", "javascript", "bash", "slash"]},
                        "code": {"type": "string"},
                    },
                    "required": ["language", "code"],
                    "additionalProperties": false,
                },
            },
            {
                "name": "create_file",
                "description": "Write a file relative to the working directory.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string"},
                        "content": {"type": "string"},
                    },
                    "required": ["filename", "content"],
                    "additionalProperties": false,
                },
            },
        ]
    })
}

async fn handle_tools_call(params: &Value, tools: &Arc<ToolSurface>) -> Dispatch {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return Dispatch::Err(RpcError::Internal("missing tool name".into()));
    };
    let empty = json!({});
    let args = params.get("arguments").unwrap_or(&empty);

    let text = match name {
        "execute_code" => {
            let language = args.get("language").and_then(Value::as_str).unwrap_or_default();
            let code = args.get("code").and_then(Value::as_str).unwrap_or_default();
            tools.execute_code(language, code).await
        }
        "create_file" => {
            let filename = args.get("filename").and_then(Value::as_str).unwrap_or_default();
            let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
            tools.create_file(filename, content).await
        }
        other => return Dispatch::Err(RpcError::Internal(format!("unknown tool: {other}"))),
    };

    Dispatch::Result(json!({"content": [{"type": "text", "text": text}]}))
}

async fn log_outbound(inspector: &Arc<Inspector>, response: &Value, start: Instant, error: Option<String>) {
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    debug!(elapsed_ms, "response dispatched");
    inspector
        .log(
            Direction::Outbound,
            None,
            response.get("id").cloned(),
            response.clone(),
            Some(elapsed_ms),
            error,
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRouter;
    use crate::config::Config;
    use crate::engine::Engine;
    use tokio::io::BufReader;

    async fn test_tools() -> (Arc<ToolSurface>, Arc<Inspector>) {
        let config = Arc::new(Config::from_env());
        let engine = Engine::new(config.clone()).await;
        let router = Arc::new(CommandRouter::new(engine.clone(), config));
        (Arc::new(ToolSurface::new(engine, router)), Inspector::new())
    }

    async fn roundtrip(input: &str) -> Vec<Value> {
        let (tools, inspector) = test_tools().await;
        let reader = BufReader::new(input.as_bytes());
        let mut output = Vec::new();
        run_stdio_loop(reader, &mut output, tools, inspector).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn initialize_returns_server_info() {
        let responses = roundtrip(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(responses[0]["result"]["serverInfo"]["name"].is_string());
    }

    #[tokio::test]
    async fn execute_code_returns_text_content() {
        let responses = roundtrip(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"execute_code","arguments":{"language":"python","code":"print(2+2)"}}}"#,
        )
        .await;
        let content = &responses[0]["result"]["content"];
        assert!(content.as_array().unwrap().len() >= 1);
        assert_eq!(content[0]["type"], "text");
        assert!(content[0]["text"].as_str().unwrap().contains('4'));
    }

    #[tokio::test]
    async fn slash_help_lists_commands() {
        let responses = roundtrip(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"execute_code","arguments":{"language":"slash","code":"/help"}}}"#,
        )
        .await;
        let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("run"));
        assert!(text.contains("container"));
        assert!(text.contains("help"));
    }

    #[tokio::test]
    async fn create_file_path_traversal_is_rejected() {
        let responses = roundtrip(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"create_file","arguments":{"filename":"../escape.txt","content":"x"}}}"#,
        )
        .await;
        let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Error:"));
    }

    #[tokio::test]
    async fn malformed_line_yields_parse_error() {
        let responses = roundtrip("{not json\n").await;
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[0]["id"], Value::Null);
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let responses = roundtrip(r#"{"jsonrpc":"2.0","id":5,"method":"bogus"}"#).await;
        assert_eq!(responses[0]["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn missing_id_on_non_notification_is_invalid_request() {
        let responses = roundtrip(r#"{"jsonrpc":"2.0","method":"initialize","params":{}}"#).await;
        assert_eq!(responses[0]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn initialized_notification_yields_no_response() {
        let responses = roundtrip(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn empty_lines_are_skipped() {
        let responses = roundtrip("\n\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{}}\n\n").await;
        assert_eq!(responses.len(), 1);
    }
}
