//! Serves the built-in tools as a JSON-RPC backend.
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout by default, or HTTP when
//! `--listen` is given. Logs go to stderr.

use std::net::SocketAddr;
use std::sync::Arc;

use agent_telemetry::{LogFormat, init_tracing};
use agent_tools::backend::{serve_http, serve_stdio};
use agent_tools::{ToolRegistry, register_builtin_tools};
use anyhow::Context;
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "tool-backend", about = "Serve the built-in tools over JSON-RPC")]
struct Args {
    /// Serve HTTP on this address instead of stdio.
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Log format: compact, pretty or json.
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format, &args.log).context("failed to initialise logging")?;

    let registry = ToolRegistry::new();
    register_builtin_tools(&registry).context("failed to register built-in tools")?;
    let registry = Arc::new(registry);

    match args.listen {
        Some(addr) => {
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let (bound, server) = serve_http(registry, addr, shutdown)
                .with_context(|| format!("failed to bind {addr}"))?;
            info!(%bound, "tool backend ready");
            server.await.context("http server task failed")??;
        }
        None => {
            serve_stdio(registry, tokio::io::stdin(), tokio::io::stdout())
                .await
                .context("stdio server failed")?;
        }
    }
    Ok(())
}
