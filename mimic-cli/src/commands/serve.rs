//! mimic serve command: run the OpenAI-compatible server in the foreground.
//!
//! This is also the worker entry point for process-mode harnesses: the
//! parent passes `--port` with a pre-allocated port and polls `/v1/models`
//! until the server answers, then tears it down with SIGTERM.

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tracing::info;

use mimic_server::ServingConfig;

/// Default host for the mimic server.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Model identifier (catalog short name or owner/repo); repeatable
    #[arg(short, long = "model", value_name = "ID", required = true)]
    pub models: Vec<String>,

    /// Alias for a configured model, as alias=target; repeatable
    #[arg(long = "alias", value_name = "ALIAS=TARGET", value_parser = parse_alias)]
    pub aliases: Vec<(String, String)>,

    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on (0 asks the OS for an ephemeral port)
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,
}

fn parse_alias(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((alias, target)) if !alias.is_empty() && !target.is_empty() => {
            Ok((alias.to_string(), target.to_string()))
        }
        _ => Err(format!("expected ALIAS=TARGET, got '{value}'")),
    }
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let models = args.models.clone();
    let aliases: HashMap<String, String> = args.aliases.iter().cloned().collect();

    info!("loading {} model(s)", models.len());
    let config = tokio::task::spawn_blocking(move || ServingConfig::build(&models, &aliases))
        .await
        .context("model loading task failed")??;

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local_addr = listener.local_addr()?;
    info!("mimic server listening on http://{local_addr}");

    mimic_server::serve(listener, config, shutdown_signal()).await?;

    info!("mimic server stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM, triggering graceful shutdown.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
