//! The example service: server-side implementation plus the client contract.

use mqrpc::{CallShape, MethodContract, ServiceContract, ServiceDefinition, ServiceRegistry};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const NAMESPACE: &str = "Demo";
pub const SERVICE: &str = "IExampleService";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleDto {
    pub id: u64,
    pub name: String,
    pub waited_secs: u64,
}

/// Sleeps on request and counts the calls it served.
#[derive(Debug, Default)]
pub struct ExampleService {
    served: AtomicU64,
}

impl ExampleService {
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    fn record(&self) -> u64 {
        self.served.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn fire_and_forget(&self, secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        info!("Fire-and-forget finished after {}s", secs);
        self.record();
    }

    fn wait_and_return(&self, secs: u64) -> u64 {
        std::thread::sleep(Duration::from_secs(secs));
        self.record();
        secs
    }

    async fn wait_and_return_async(&self, secs: u64) -> u64 {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        self.record();
        secs
    }

    async fn wait_and_return_model(&self, secs: u64) -> ExampleDto {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        ExampleDto {
            id: self.record(),
            name: "example".to_string(),
            waited_secs: secs,
        }
    }

    fn multiple_parameter(&self, first: &str, second: &str) -> String {
        self.record();
        format!("{}{}", first, second)
    }
}

/// Server-side registration of [`ExampleService`].
pub fn registry() -> mqrpc::Result<ServiceRegistry> {
    ServiceRegistry::builder()
        .service(
            ServiceDefinition::<ExampleService>::new(NAMESPACE, SERVICE)
                .handler(
                    "FireAndForgetAsync",
                    CallShape::AwaitValue,
                    |svc: Arc<ExampleService>, (secs,): (u64,)| async move {
                        svc.fire_and_forget(secs).await;
                        anyhow::Ok(())
                    },
                )
                .blocking(
                    "WaitAndReturn",
                    CallShape::Sync,
                    |svc: Arc<ExampleService>, (secs,): (u64,)| {
                        anyhow::Ok(svc.wait_and_return(secs))
                    },
                )
                .handler(
                    "WaitAndReturnAsync",
                    CallShape::AwaitGeneric,
                    |svc: Arc<ExampleService>, (secs,): (u64,)| async move {
                        anyhow::Ok(svc.wait_and_return_async(secs).await)
                    },
                )
                .handler(
                    "WaitAndReturnModelAsync",
                    CallShape::AwaitGeneric,
                    |svc: Arc<ExampleService>, (secs,): (u64,)| async move {
                        anyhow::Ok(svc.wait_and_return_model(secs).await)
                    },
                )
                .blocking(
                    "MultipleParameter",
                    CallShape::Sync,
                    |svc: Arc<ExampleService>, (first, second): (String, String)| {
                        anyhow::Ok(svc.multiple_parameter(&first, &second))
                    },
                ),
        )
        .build()
}

/// What the client declares about the service. `NoMethod` is deliberately
/// absent from [`registry`].
pub fn contract() -> mqrpc::Result<ServiceContract> {
    ServiceContract::builder(SERVICE)
        .namespace(NAMESPACE)
        .method(MethodContract::new("FireAndForgetAsync", CallShape::AwaitValue))
        .method(MethodContract::new("WaitAndReturn", CallShape::Sync))
        .method(
            MethodContract::new("WaitAndReturnAsync", CallShape::AwaitGeneric)
                .timeout(Duration::from_millis(2000)),
        )
        .method(MethodContract::new("WaitAndReturnModelAsync", CallShape::AwaitGeneric))
        .method(MethodContract::new("MultipleParameter", CallShape::Sync))
        .method(MethodContract::new("NoMethod", CallShape::AwaitGeneric))
        .build()
}
