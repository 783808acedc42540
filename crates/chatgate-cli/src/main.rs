//! CLI entry point.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatgate_cli::{Cli, CliError, ConfigFile, bootstrap};
use chatgate_proxy::GatewayServer;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        error!(error = %format!("{err:#}"), "chatgate stopped");
        eprintln!("Error: {err:#}");
        let code = err.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
        std::process::exit(code);
    }
}

/// `RUST_LOG` wins unless `--verbose` asks for debug.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let settings = bootstrap::resolve(&cli, file)?;
    let listen = settings.config.listen_addr.clone();
    info!(
        upstream = %settings.config.upstream_url,
        prefix = settings.config.path_prefix().unwrap_or(""),
        interceptors = settings.interceptors.len(),
        "Starting gateway"
    );

    let gateway = bootstrap::build_gateway(settings).await?;
    let server = GatewayServer::new();
    let addr = server
        .start(gateway, &listen)
        .await
        .map_err(CliError::from)?;
    info!(address = %addr, "Gateway listening");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("Shutting down");
    server.stop().await.map_err(CliError::from)?;
    Ok(())
}
