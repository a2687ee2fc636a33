//! Tiergate HTTP server
//!
//! Starts the orchestration service and serves the operator API with Axum.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tiergate::{
    backend::{EmptyPoolManager, EmptyTaskGroupManager},
    cli::{Cli, Command, generate_config_template},
    handlers::{self, AppState},
    service::OrchestrationService,
    telemetry,
    wrapper::WrapperDeps,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        match output {
            Some(path) => {
                std::fs::write(&path, generate_config_template())?;
                eprintln!("Wrote configuration template to {}", path);
            }
            None => print!("{}", generate_config_template()),
        }
        return Ok(());
    }

    // Pools and task groups are provided by embedding applications; the
    // standalone binary serves direct wrappers only
    let deps = WrapperDeps::new(
        Arc::new(EmptyPoolManager),
        Arc::new(EmptyTaskGroupManager),
    );
    let service = Arc::new(OrchestrationService::from_file(&cli.config, deps)?);
    let config = service.config().await;

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        config_path = %cli.config,
        "Starting Tiergate server on {}:{}",
        config.server.host,
        config.server.port
    );

    service.initialize().await?;

    let app = handlers::router(AppState::new(Arc::clone(&service)));

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
