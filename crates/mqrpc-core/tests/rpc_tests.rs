//! End-to-end tests: a real server and client over `inproc` and `tcp`.

use mqrpc::protocol::{encode_args, now_millis, ttl_after, ReplyFrame, RequestFrame};
use mqrpc::transport::DealerSocket;
use mqrpc::{
    CallShape, ClientConfiguration, ConnectionConfiguration, MethodContract, RpcClientContext,
    RpcError, RpcServer, ServerHandle, ServiceCollection, ServiceContract, ServiceDefinition,
    ServiceProxy, ServiceRegistry, TransportContext,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct ExampleService {
    flaky_calls: AtomicU32,
    waits: AtomicU32,
    counted: AtomicU32,
    records: Mutex<Vec<String>>,
}

/// Registered on the server but never given an instance.
struct OrphanService;

fn registry() -> ServiceRegistry {
    ServiceRegistry::builder()
        .service(
            ServiceDefinition::<ExampleService>::new("Demo", "IExampleService")
                .blocking(
                    "WaitAndReturn",
                    CallShape::Sync,
                    |_svc: Arc<ExampleService>, (millis,): (u64,)| {
                        std::thread::sleep(Duration::from_millis(millis));
                        anyhow::Ok(millis)
                    },
                )
                .handler(
                    "WaitAndReturnAsync",
                    CallShape::AwaitGeneric,
                    |_svc: Arc<ExampleService>, (millis,): (u64,)| async move {
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                        anyhow::Ok(millis)
                    },
                )
                .handler(
                    "MultipleParameter",
                    CallShape::AwaitGeneric,
                    |_svc: Arc<ExampleService>, (a, b): (String, String)| async move {
                        anyhow::Ok(a + &b)
                    },
                )
                .handler(
                    "JustWaitAsync",
                    CallShape::AwaitValue,
                    |svc: Arc<ExampleService>, (millis,): (u64,)| async move {
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                        svc.waits.fetch_add(1, Ordering::SeqCst);
                        anyhow::Ok(())
                    },
                )
                .blocking(
                    "Record",
                    CallShape::FireAndForget,
                    |svc: Arc<ExampleService>, (entry,): (String,)| {
                        svc.records
                            .lock()
                            .map_err(|_| anyhow::anyhow!("records poisoned"))?
                            .push(entry);
                        anyhow::Ok(())
                    },
                )
                .handler(
                    "Count",
                    CallShape::AwaitGeneric,
                    |svc: Arc<ExampleService>, ()| async move {
                        anyhow::Ok(svc.counted.fetch_add(1, Ordering::SeqCst) + 1)
                    },
                )
                .handler(
                    "Fail",
                    CallShape::AwaitGeneric,
                    |_svc: Arc<ExampleService>, ()| async move {
                        Err::<String, _>(anyhow::anyhow!("disk full").context("writing report"))
                    },
                )
                .handler(
                    "Panic",
                    CallShape::AwaitGeneric,
                    |_svc: Arc<ExampleService>, ()| async move {
                        if true {
                            panic!("handler exploded");
                        }
                        anyhow::Ok(String::new())
                    },
                )
                .handler(
                    "Flaky",
                    CallShape::AwaitGeneric,
                    |svc: Arc<ExampleService>, ()| async move {
                        let attempt = svc.flaky_calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if attempt == 1 {
                            tokio::time::sleep(Duration::from_millis(400)).await;
                        }
                        anyhow::Ok(attempt)
                    },
                ),
        )
        .service(
            ServiceDefinition::<OrphanService>::new("Demo", "IOrphanService").handler(
                "Run",
                CallShape::AwaitGeneric,
                |_svc: Arc<OrphanService>, ()| async move { anyhow::Ok(0) },
            ),
        )
        .build()
        .unwrap()
}

fn example_contract() -> ServiceContract {
    ServiceContract::builder("IExampleService")
        .namespace("Demo")
        .method(MethodContract::new("WaitAndReturn", CallShape::Sync))
        .method(MethodContract::new("WaitAndReturnAsync", CallShape::AwaitGeneric))
        .method(
            MethodContract::new("WaitBriefly", CallShape::AwaitGeneric)
                .remote_name("WaitAndReturnAsync")
                .timeout(Duration::from_millis(200)),
        )
        .method(MethodContract::new("MultipleParameter", CallShape::AwaitGeneric))
        .method(MethodContract::new("JustWaitAsync", CallShape::AwaitValue))
        .method(MethodContract::new("Record", CallShape::FireAndForget))
        .method(MethodContract::new("Count", CallShape::AwaitGeneric))
        .method(
            MethodContract::new("CountBriefly", CallShape::AwaitGeneric)
                .remote_name("Count")
                .timeout(Duration::from_millis(200)),
        )
        .method(MethodContract::new("Fail", CallShape::AwaitGeneric))
        .method(MethodContract::new("Panic", CallShape::AwaitGeneric))
        .method(MethodContract::new("NoMethod", CallShape::AwaitGeneric))
        .method(
            MethodContract::new("Flaky", CallShape::AwaitGeneric)
                .timeout(Duration::from_millis(150))
                .retries(2),
        )
        .build()
        .unwrap()
}

struct Harness {
    server: ServerHandle,
    service: Arc<ExampleService>,
    client: RpcClientContext,
    proxy: ServiceProxy,
    transport: TransportContext,
}

async fn start_with(transport: TransportContext, endpoint: ConnectionConfiguration) -> Harness {
    let service = Arc::new(ExampleService::default());
    let services = ServiceCollection::new().add_shared(service.clone());
    let server = RpcServer::serve(&transport, &endpoint, registry(), services)
        .await
        .unwrap();

    let config = ClientConfiguration::new(server.local().clone())
        .with_default_timeout(Duration::from_secs(5));
    let client = RpcClientContext::with_transport(config, transport.clone()).unwrap();
    let proxy = client.proxy(example_contract()).unwrap();

    Harness {
        server,
        service,
        client,
        proxy,
        transport,
    }
}

async fn start_inproc(name: &str) -> Harness {
    start_with(
        TransportContext::new(),
        ConnectionConfiguration::inproc(name, 1).unwrap(),
    )
    .await
}

async fn start_tcp() -> Harness {
    start_with(
        TransportContext::new(),
        ConnectionConfiguration::tcp("127.0.0.1", 0).unwrap(),
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_parameter_keeps_argument_order() {
    let h = start_inproc("multiple-parameter").await;
    let joined: String = h
        .proxy
        .invoke("MultipleParameter", ("Hello", "World"))
        .await
        .unwrap();
    assert_eq!(joined, "HelloWorld");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_then_late_reply_is_dropped() {
    let h = start_inproc("timeout").await;

    let started = Instant::now();
    let result: mqrpc::Result<u64> = h.proxy.invoke("WaitBriefly", (400u64,)).await;
    let elapsed = started.elapsed();

    match result {
        Err(RpcError::Timeout { method, timeout }) => {
            assert_eq!(method, "Demo.IExampleService.WaitAndReturnAsync");
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("Expected timeout, got: {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(400), "{:?}", elapsed);

    // Let the late success frame arrive; it must not disturb anything.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(h.client.pending_requests().await, 0);

    let value: u64 = h.proxy.invoke("WaitAndReturnAsync", (1u64,)).await.unwrap();
    assert_eq!(value, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_share_one_connection() {
    let h = start_inproc("concurrent").await;

    let started = Instant::now();
    let (a, b) = tokio::join!(
        h.proxy.invoke::<_, u64>("WaitAndReturnAsync", (300u64,)),
        h.proxy.invoke::<_, u64>("WaitAndReturnAsync", (300u64,)),
    );
    let elapsed = started.elapsed();

    assert_eq!(a.unwrap(), 300);
    assert_eq!(b.unwrap(), 300);
    assert!(elapsed < Duration::from_millis(550), "calls were serialized: {:?}", elapsed);
    assert_eq!(h.client.connection_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_callers_get_their_own_replies() {
    let h = start_inproc("many-callers").await;

    let calls = (0..50u64).map(|i| {
        let proxy = h.proxy.clone();
        async move {
            let joined: String = proxy
                .invoke("MultipleParameter", (format!("a{}", i), format!("b{}", i)))
                .await
                .unwrap();
            (i, joined)
        }
    });
    for (i, joined) in futures::future::join_all(calls).await {
        assert_eq!(joined, format!("a{}b{}", i, i));
    }
    assert_eq!(h.client.pending_requests().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_method_not_found_names_key() {
    let h = start_inproc("no-method").await;
    let result: mqrpc::Result<String> = h.proxy.invoke("NoMethod", ()).await;
    match result {
        Err(err @ RpcError::MethodNotFound { .. }) => {
            assert_eq!(
                err.to_string(),
                "Method 'Demo.IExampleService.NoMethod' not found."
            );
            assert!(!err.is_retryable());
        }
        other => panic!("Expected MethodNotFound, got: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parameter_mismatch() {
    let h = start_inproc("mismatch").await;
    let result: mqrpc::Result<String> = h.proxy.invoke("MultipleParameter", ("Hello",)).await;
    match result {
        Err(err @ RpcError::ParameterMismatch { .. }) => assert_eq!(
            err.to_string(),
            "Parameter count mismatch for method 'MultipleParameter'."
        ),
        other => panic!("Expected ParameterMismatch, got: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_service_not_found() {
    let h = start_inproc("orphan").await;
    let contract = ServiceContract::builder("IOrphanService")
        .namespace("Demo")
        .method(MethodContract::new("Run", CallShape::AwaitGeneric))
        .build()
        .unwrap();
    let proxy = h.client.proxy(contract).unwrap();

    let result: mqrpc::Result<i32> = proxy.invoke("Run", ()).await;
    match result {
        Err(err @ RpcError::ServiceNotFound { .. }) => {
            assert_eq!(err.to_string(), "Service for type 'OrphanService' not found.")
        }
        other => panic!("Expected ServiceNotFound, got: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handler_fault_reports_root_cause() {
    let h = start_inproc("fault").await;
    let result: mqrpc::Result<String> = h.proxy.invoke("Fail", ()).await;
    match result {
        Err(RpcError::Invocation { message, details }) => {
            assert_eq!(message, "disk full");
            assert_eq!(details.as_deref(), Some("writing report: disk full"));
        }
        other => panic!("Expected invocation fault, got: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handler_panic_does_not_stop_server() {
    let h = start_inproc("panic").await;
    let result: mqrpc::Result<String> = h.proxy.invoke("Panic", ()).await;
    match result {
        Err(RpcError::Invocation { message, .. }) => assert_eq!(message, "handler exploded"),
        other => panic!("Expected invocation fault, got: {:?}", other),
    }

    let joined: String = h.proxy.invoke("MultipleParameter", ("still", "up")).await.unwrap();
    assert_eq!(joined, "stillup");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fire_and_forget_reaches_server() {
    let h = start_inproc("notify").await;
    h.proxy.notify("Record", ("first",)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if h.service.records.lock().unwrap().iter().any(|r| r == "first") {
            break;
        }
        assert!(Instant::now() < deadline, "notification never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.client.pending_requests().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_await_value_completes_on_send() {
    let h = start_inproc("await-value").await;

    let started = Instant::now();
    h.proxy.send("JustWaitAsync", (300u64,)).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(h.service.waits.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.service.waits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_pending_call() {
    let h = start_inproc("cancel").await;

    let call = h.proxy.start::<_, u64>("WaitAndReturnAsync", (500u64,)).unwrap();
    assert_eq!(call.method(), "Demo.IExampleService.WaitAndReturnAsync");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(call.correlation_id().is_some());
    assert!(call.cancel());

    let started = Instant::now();
    let result = call.await;
    assert!(matches!(result, Err(RpcError::Cancelled { .. })));
    assert!(started.elapsed() < Duration::from_millis(200));

    // The server still answers; the late reply is discarded.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.client.pending_requests().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_started_call_resolves() {
    let h = start_inproc("start").await;
    let call = h.proxy.start::<_, String>("MultipleParameter", ("Hello", "World")).unwrap();
    assert_eq!(call.await.unwrap(), "HelloWorld");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_after_timeout() {
    let h = start_inproc("retry").await;
    let attempt: u32 = h.proxy.invoke("Flaky", ()).await.unwrap();
    assert_eq!(attempt, 2);
    assert_eq!(h.service.flaky_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expired_request_gets_no_reply() {
    let h = start_inproc("expired").await;
    let (dealer, mut replies) =
        DealerSocket::connect(&h.transport, h.server.local(), "raw-client")
            .await
            .unwrap();

    let expired = RequestFrame {
        correlation_id: "expired-1".into(),
        method: "Demo.IExampleService.MultipleParameter".into(),
        args: encode_args(&[json!("a"), json!("b")]).unwrap(),
        ttl_millis: now_millis() - 1_000,
    };
    dealer.send(&expired.encode()).unwrap();

    let live = RequestFrame {
        correlation_id: "live-1".into(),
        ttl_millis: ttl_after(Duration::from_secs(5)),
        ..expired
    };
    dealer.send(&live.encode()).unwrap();

    // Only the live request is answered.
    let frame = tokio::time::timeout(Duration::from_secs(2), replies.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(ReplyFrame::decode(&frame).unwrap().correlation_id(), "live-1");

    let nothing = tokio::time::timeout(Duration::from_millis(200), replies.recv()).await;
    assert!(nothing.is_err(), "expired request was answered");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tcp_roundtrip() {
    let h = start_tcp().await;
    assert!(h.server.port() > 0);

    let joined: String = h
        .proxy
        .invoke("MultipleParameter", ("Hello", "World"))
        .await
        .unwrap();
    assert_eq!(joined, "HelloWorld");

    let result: mqrpc::Result<String> = h.proxy.invoke("NoMethod", ()).await;
    assert!(matches!(result, Err(RpcError::MethodNotFound { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_call_from_blocking_thread() {
    let h = start_tcp().await;
    let proxy = h.proxy.clone();

    let value = tokio::task::spawn_blocking(move || {
        proxy.invoke_blocking::<_, u64>("WaitAndReturn", (20u64,))
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(value, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_server_fails_pending_calls() {
    let h = start_tcp().await;

    let call = h.proxy.start::<_, u64>("WaitAndReturnAsync", (2_000u64,)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    drop(h.server);

    let result = call.await;
    assert!(matches!(result, Err(RpcError::Transport { .. })), "{:?}", result);
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_lets_calls_in_flight_reply() {
    let h = start_tcp().await;

    let call = h.proxy.start::<_, u64>("WaitAndReturnAsync", (300u64,)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.server.in_flight(), 1);

    h.server.stop().await;
    assert_eq!(call.await.unwrap(), 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_outliving_its_timeout_is_never_run() {
    let transport = TransportContext::new();
    let endpoint = ConnectionConfiguration::inproc("late-server", 1).unwrap();
    let config = ClientConfiguration::new(endpoint.clone());
    let client = RpcClientContext::with_transport(config, transport.clone()).unwrap();
    let proxy = client.proxy(example_contract()).unwrap();

    // Nothing is bound yet: the request waits in the dealer's queue while
    // the client's own timer runs out.
    let started = Instant::now();
    let result: mqrpc::Result<u32> = proxy.invoke("CountBriefly", ()).await;
    assert!(matches!(result, Err(RpcError::Timeout { .. })), "{:?}", result);
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(client.pending_requests().await, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let service = Arc::new(ExampleService::default());
    let services = ServiceCollection::new().add_shared(service.clone());
    let _server = RpcServer::serve(&transport, &endpoint, registry(), services)
        .await
        .unwrap();

    // The stale request reached the server past its deadline and was dropped.
    let count: u32 = proxy.invoke("Count", ()).await.unwrap();
    assert_eq!(count, 1);
    assert_eq!(service.counted.load(Ordering::SeqCst), 1);
}

/// Two clients built from one configuration share the routing identity
/// prefix but must never receive each other's replies.
async fn clients_sharing_a_config_stay_apart(h: Harness) {
    let config = h.client.config().clone();
    let a = RpcClientContext::with_transport(config.clone(), h.transport.clone()).unwrap();
    let b = RpcClientContext::with_transport(config, h.transport.clone()).unwrap();
    let proxy_a = a.proxy(example_contract()).unwrap();
    let proxy_b = b.proxy(example_contract()).unwrap();

    for i in 0..5 {
        let (from_a, from_b) = tokio::join!(
            proxy_a.invoke::<_, String>("MultipleParameter", ("a", i.to_string())),
            proxy_b.invoke::<_, String>("MultipleParameter", ("b", i.to_string())),
        );
        assert_eq!(from_a.unwrap(), format!("a{}", i));
        assert_eq!(from_b.unwrap(), format!("b{}", i));
    }

    // Closing one client leaves the other's route intact.
    a.close().await;
    drop(proxy_a);
    let joined: String = proxy_b
        .invoke("MultipleParameter", ("still", "b"))
        .await
        .unwrap();
    assert_eq!(joined, "stillb");
    assert_eq!(b.pending_requests().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_config_clients_over_tcp() {
    clients_sharing_a_config_stay_apart(start_tcp().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_config_clients_over_inproc() {
    clients_sharing_a_config_stay_apart(start_inproc("shared-config").await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_connect_does_not_block_other_destinations() {
    let h = start_inproc("independent").await;
    let dead = ConnectionConfiguration::tcp("127.0.0.1", 1).unwrap();
    let stuck = h.client.proxy_to(example_contract(), dead).unwrap();

    let connecting = tokio::spawn(async move {
        stuck.invoke::<_, String>("MultipleParameter", ("x", "y")).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let joined: String = h
        .proxy
        .invoke("MultipleParameter", ("Hello", "World"))
        .await
        .unwrap();
    assert_eq!(joined, "HelloWorld");
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(RpcError::Transport { .. })), "{:?}", result);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_udp_is_rejected() {
    let transport = TransportContext::new();
    let endpoint = ConnectionConfiguration::new("127.0.0.1", 0, mqrpc::Protocol::Udp).unwrap();
    let result =
        RpcServer::serve(&transport, &endpoint, registry(), ServiceCollection::new()).await;
    assert!(matches!(result, Err(RpcError::Transport { .. })));
}
