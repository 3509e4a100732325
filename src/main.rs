//! Entry point: wires up the execution engine, command router, inspector, dashboard
//! HTTP server, and the JSON-RPC stdio loop.

use std::net::SocketAddr;
use std::sync::Arc;

use light_sandbox::config::Config;
use light_sandbox::{CommandRouter, Engine, Inspector, ToolSurface};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env());
    init_tracing(config.debug);

    let engine = Engine::new(config.clone()).await;
    let router = Arc::new(CommandRouter::new(engine.clone(), config.clone()));
    let tools = Arc::new(ToolSurface::new(engine, router));
    let inspector = Inspector::new();

    let dashboard_addr: SocketAddr = ([127, 0, 0, 1], config.inspector_port).into();
    let dashboard_inspector = inspector.clone();
    tokio::spawn(async move {
        tracing::info!(%dashboard_addr, "serving inspector dashboard");
        warp::serve(light_sandbox::dashboard::to_filter(dashboard_inspector))
            .run(dashboard_addr)
            .await;
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            std::process::exit(0);
        }
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    light_sandbox::rpc::run_stdio_loop(stdin, stdout, tools, inspector).await?;

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
