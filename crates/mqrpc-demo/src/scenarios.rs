//! Client scenarios run by `mqrpc-demo call`.

use crate::service::ExampleDto;
use anyhow::{Context, Result};
use clap::ValueEnum;
use futures::future::join_all;
use mqrpc::{RpcError, ServiceProxy};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    FireAndForget,
    Sync,
    Async,
    Model,
    MultipleParameter,
    BenchmarkAsync,
    BenchmarkSync,
    Timeout,
    NoMethod,
    All,
}

impl Scenario {
    /// Every scenario `All` runs, in order.
    const EACH: [Scenario; 9] = [
        Scenario::FireAndForget,
        Scenario::Sync,
        Scenario::Async,
        Scenario::Model,
        Scenario::MultipleParameter,
        Scenario::BenchmarkAsync,
        Scenario::BenchmarkSync,
        Scenario::Timeout,
        Scenario::NoMethod,
    ];
}

pub async fn run(proxy: &ServiceProxy, scenario: Scenario) -> Result<()> {
    info!("Running {:?}", scenario);
    match scenario {
        Scenario::FireAndForget => {
            proxy.send("FireAndForgetAsync", (1u64,)).await?;
            println!("[Done]");
        }
        Scenario::Sync => {
            let value: u64 = blocking(proxy, "WaitAndReturn", 1).await?;
            println!("Result: {}", value);
        }
        Scenario::Async => {
            let value: u64 = proxy.invoke("WaitAndReturnAsync", (1u64,)).await?;
            println!("Result: {}", value);
        }
        Scenario::Model => {
            let dto: ExampleDto = proxy.invoke("WaitAndReturnModelAsync", (0u64,)).await?;
            println!("Result: {}", serde_json::to_string(&dto)?);
        }
        Scenario::MultipleParameter => {
            let proxy = proxy.clone();
            let joined = tokio::task::spawn_blocking(move || {
                proxy.invoke_blocking::<_, String>("MultipleParameter", ("Hello", "World"))
            })
            .await
            .context("blocking call panicked")??;
            println!("Result: {}", joined);
        }
        Scenario::BenchmarkAsync => {
            let started = Instant::now();
            let calls = (0..3).map(|_| proxy.invoke::<_, u64>("WaitAndReturnAsync", (1u64,)));
            for result in join_all(calls).await {
                result?;
            }
            println!("Elapsed Time: {} ms", started.elapsed().as_millis());
        }
        Scenario::BenchmarkSync => {
            let started = Instant::now();
            for _ in 0..3 {
                blocking(proxy, "WaitAndReturn", 1).await?;
            }
            println!("Elapsed Time: {} ms", started.elapsed().as_millis());
        }
        Scenario::Timeout => match proxy.invoke::<_, u64>("WaitAndReturnAsync", (3u64,)).await {
            Err(e @ RpcError::Timeout { .. }) => println!("Timeout Exception: {}", e),
            other => anyhow::bail!("expected a timeout, got {:?}", other),
        },
        Scenario::NoMethod => match proxy.invoke::<_, u64>("NoMethod", ()).await {
            Err(e @ RpcError::MethodNotFound { .. }) => println!("Remote error: {}", e),
            other => anyhow::bail!("expected MethodNotFound, got {:?}", other),
        },
        Scenario::All => {
            for each in Scenario::EACH {
                Box::pin(run(proxy, each)).await?;
            }
        }
    }
    Ok(())
}

async fn blocking(proxy: &ServiceProxy, method: &'static str, secs: u64) -> Result<u64> {
    let proxy = proxy.clone();
    let value =
        tokio::task::spawn_blocking(move || proxy.invoke_blocking::<_, u64>(method, (secs,)))
            .await
            .context("blocking call panicked")??;
    Ok(value)
}
