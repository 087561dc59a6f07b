//! mqrpc demo - runs the example service, or calls it.
//!
//! `mqrpc-demo serve` hosts `Demo.IExampleService` on a TCP endpoint until
//! Ctrl+C. `mqrpc-demo call <scenario>` connects to it and runs one of the
//! client scenarios.

mod scenarios;
mod service;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mqrpc::{
    ClientConfiguration, ConnectionConfiguration, RpcClientContext, RpcServer, ServiceCollection,
    TransportContext,
};
use scenarios::Scenario;
use service::ExampleService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "mqrpc-demo")]
#[command(about = "Example server and client for mqrpc")]
struct Args {
    /// Endpoint to bind or connect to
    #[arg(short, long, default_value = "tcp://127.0.0.1:5556")]
    endpoint: ConnectionConfiguration,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the example service until Ctrl+C
    Serve,

    /// Run a client scenario against a running server
    Call {
        #[arg(value_enum, default_value = "all")]
        scenario: Scenario,

        /// Default call timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve => serve(args.endpoint).await,
        Command::Call {
            scenario,
            timeout_ms,
        } => call(args.endpoint, scenario, Duration::from_millis(timeout_ms)).await,
    }
}

async fn serve(endpoint: ConnectionConfiguration) -> Result<()> {
    info!("Starting mqrpc demo server");

    let service = Arc::new(ExampleService::default());
    let server = RpcServer::serve(
        &TransportContext::new(),
        &endpoint,
        service::registry()?,
        ServiceCollection::new().add_shared(service.clone()),
    )
    .await?;

    info!("Example service running on {}", server.local());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting ({} calls served)", service.served());

    server.stop().await;
    Ok(())
}

async fn call(
    endpoint: ConnectionConfiguration,
    scenario: Scenario,
    timeout: Duration,
) -> Result<()> {
    let config = ClientConfiguration::new(endpoint).with_default_timeout(timeout);
    let client = RpcClientContext::new(config)?;
    let proxy = client.proxy(service::contract()?)?;

    scenarios::run(&proxy, scenario).await?;

    client.close().await;
    Ok(())
}
