//! End-to-end tests: handler and client talking over the in-process
//! substrate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use hubwire::{CallFailure, ErrorCode, ResponseEnvelope, ServiceAddr};

use crate::client::{CallError, ServiceClient};
use crate::env::Env;
use crate::memory::MemorySubstrate;
use crate::service::{Service, serve};
use crate::substrate::{Substrate, Subscription};

/// Test service with one method per behavior under test.
struct EchoService;

#[async_trait::async_trait]
impl Service for EchoService {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallFailure> {
        match method {
            "echo" => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            "add" => {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(json!(sum))
            }
            "fail" => Err(CallFailure::internal("boom")),
            // Sleeps for args[0] millis, then echoes args[1].
            "delay_echo" => {
                let millis = args.first().and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(args.into_iter().nth(1).unwrap_or(Value::Null))
            }
            _ => Err(CallFailure::no_such_method(method)),
        }
    }
}

/// Run with `RUST_LOG=hubrun=debug cargo test -- --nocapture` to watch the
/// handler and pump logs.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn test_env(substrate: &MemorySubstrate) -> Env {
    init_logging();
    Env::builder()
        .substrate(Arc::new(substrate.clone()))
        .identity("p1", None)
        .build()
        .unwrap()
}

async fn echo_setup() -> (MemorySubstrate, Env, crate::service::ServiceHandle, ServiceClient) {
    let substrate = MemorySubstrate::new();
    let env = test_env(&substrate);
    let addr = ServiceAddr::project("p1", "echo");

    let handle = serve(&env, addr.clone(), Arc::new(EchoService)).await.unwrap();
    let client = ServiceClient::new(&env, addr).await.unwrap();

    (substrate, env, handle, client)
}

#[tokio::test]
async fn test_echo_resolves() {
    let (_substrate, _env, _handle, client) = echo_setup().await;

    let result = client.call("echo", vec![json!("hello")]).await.unwrap();
    assert_eq!(result, json!("hello"));
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn test_missing_method_is_classified_not_a_timeout() {
    let (_substrate, _env, _handle, client) = echo_setup().await;

    let started = Instant::now();
    let err = client.call("missing", vec![]).await.unwrap_err();

    match err {
        CallError::Remote { method, failure, .. } => {
            assert_eq!(method, "missing");
            assert_eq!(failure.code, ErrorCode::NoSuchMethod);
        }
        other => panic!("Expected Remote(NO_SUCH_METHOD), got {:?}", other),
    }
    // Answered by the handler, not by the client's timer.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_method_failure_reaches_caller_and_handler_survives() {
    let (_substrate, _env, _handle, client) = echo_setup().await;

    let err = client.call("fail", vec![]).await.unwrap_err();
    match &err {
        CallError::Remote { failure, .. } => {
            assert_eq!(failure.code, ErrorCode::Internal);
            assert!(failure.message.contains("boom"));
        }
        other => panic!("Expected Remote failure, got {:?}", other),
    }
    // The rejection names the service and method.
    let shown = err.to_string();
    assert!(shown.contains("fail"));
    assert!(shown.contains("echo"));
    assert!(shown.contains("boom"));

    // The same handler still answers unrelated calls.
    let result = client.call("echo", vec![json!(2)]).await.unwrap();
    assert_eq!(result, json!(2));
}

#[tokio::test]
async fn test_unhandled_descriptor_times_out() {
    let substrate = MemorySubstrate::new();
    let env = test_env(&substrate);

    let client = ServiceClient::new(&env, ServiceAddr::project("p2", "ghost"))
        .await
        .unwrap()
        .with_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let err = client.call("anything", vec![]).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        CallError::Timeout { service, method, .. } => {
            assert!(service.contains("ghost"));
            assert_eq!(method, "anything");
        }
        other => panic!("Expected Timeout, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(50), "timed out early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "timed out late: {:?}", elapsed);
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_independently() {
    let (_substrate, _env, _handle, client) = echo_setup().await;

    // The slow call is sent first; its reply arrives last.
    let slow = client.call("delay_echo", vec![json!(80), json!("slow")]);
    let fast = client.call("delay_echo", vec![json!(5), json!("fast")]);

    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(slow.unwrap(), json!("slow"));
    assert_eq!(fast.unwrap(), json!("fast"));
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn test_late_reply_is_discarded() {
    let (_substrate, _env, _handle, client) = echo_setup().await;
    let client = client.with_timeout(Duration::from_millis(20));

    let err = client
        .call("delay_echo", vec![json!(100), json!("late")])
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Timeout { .. }));
    assert_eq!(client.pending_len(), 0);

    // Let the abandoned reply arrive; it matches no pending entry and the
    // client keeps working.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let client = client.with_timeout(Duration::from_secs(5));
    let result = client.call("echo", vec![json!("still alive")]).await.unwrap();
    assert_eq!(result, json!("still alive"));
}

#[tokio::test]
async fn test_closed_handler_stops_answering() {
    let (_substrate, env, handle, client) = echo_setup().await;
    let client = client.with_timeout(Duration::from_millis(50));

    handle.close();
    // The abort lands at the listener's next yield point; give it a moment
    // before probing.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = client.call("echo", vec![json!("anyone?")]).await.unwrap_err();
    assert!(matches!(err, CallError::Timeout { .. }));

    // A rebuilt handler serves again on the same descriptor.
    let _handle = serve(&env, ServiceAddr::project("p1", "echo"), Arc::new(EchoService))
        .await
        .unwrap();
    let result = client.call("echo", vec![json!("again")]).await.unwrap();
    assert_eq!(result, json!("again"));
}

#[tokio::test]
async fn test_descriptors_do_not_cross() {
    struct Named(&'static str);

    #[async_trait::async_trait]
    impl Service for Named {
        async fn call(&self, method: &str, _args: Vec<Value>) -> Result<Value, CallFailure> {
            match method {
                "whoami" => Ok(json!(self.0)),
                _ => Err(CallFailure::no_such_method(method)),
            }
        }
    }

    let substrate = MemorySubstrate::new();
    let env = test_env(&substrate);

    let _alpha = serve(&env, ServiceAddr::project("p1", "alpha"), Arc::new(Named("alpha")))
        .await
        .unwrap();
    let _beta = serve(&env, ServiceAddr::compute_server("p1", 3, "alpha"), Arc::new(Named("beta")))
        .await
        .unwrap();

    let alpha = ServiceClient::new(&env, ServiceAddr::project("p1", "alpha")).await.unwrap();
    let beta = ServiceClient::new(&env, ServiceAddr::compute_server("p1", 3, "alpha"))
        .await
        .unwrap();

    assert_eq!(alpha.call("whoami", vec![]).await.unwrap(), json!("alpha"));
    assert_eq!(beta.call("whoami", vec![]).await.unwrap(), json!("beta"));
}

#[tokio::test]
async fn test_typed_facade() {
    let (_substrate, _env, _handle, client) = echo_setup().await;

    let echoed: String = client.call_typed("echo", &("hello",)).await.unwrap();
    assert_eq!(echoed, "hello");

    let sum: i64 = client.call_typed("add", &(40, 2)).await.unwrap();
    assert_eq!(sum, 42);
}

#[tokio::test]
async fn test_malformed_request_gets_structured_response() {
    let (substrate, _env, _handle, _client) = echo_setup().await;

    // Speak to the handler directly, bypassing the client.
    let mut inbox = substrate.subscribe("_inbox.raw.1").await.unwrap();
    substrate
        .publish("svc.p1.project.echo", Some("_inbox.raw.1"), b"not json")
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    let response: ResponseEnvelope = serde_json::from_slice(&msg.payload).unwrap();
    assert!(!response.ok);
    let failure = response.into_result().unwrap_err();
    assert_eq!(failure.code, ErrorCode::MalformedRequest);
}

#[tokio::test]
async fn test_corrupted_request_fails_fast_not_by_timeout() {
    // Corrupts every request payload on its way to the handler, leaving
    // replies untouched. The handler can't recover the request id from
    // garbage, so its MALFORMED_REQUEST response must still reach the
    // right caller via the reply subject.
    struct Corrupting(MemorySubstrate);

    #[async_trait::async_trait]
    impl Substrate for Corrupting {
        async fn publish(
            &self,
            subject: &str,
            reply: Option<&str>,
            payload: &[u8],
        ) -> crate::substrate::Result<()> {
            if subject.starts_with("svc.") {
                self.0.publish(subject, reply, b"\xFF garbage").await
            } else {
                self.0.publish(subject, reply, payload).await
            }
        }

        async fn subscribe(&self, pattern: &str) -> crate::substrate::Result<Subscription> {
            self.0.subscribe(pattern).await
        }
    }

    let substrate = MemorySubstrate::new();
    init_logging();
    let env = Env::builder()
        .substrate(Arc::new(Corrupting(substrate.clone())))
        .identity("p1", None)
        .build()
        .unwrap();
    let addr = ServiceAddr::project("p1", "echo");

    let _handle = serve(&env, addr.clone(), Arc::new(EchoService)).await.unwrap();
    let client = ServiceClient::new(&env, addr)
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(5));

    let started = Instant::now();
    let err = client.call("echo", vec![json!("hello")]).await.unwrap_err();

    match err {
        CallError::Remote { failure, .. } => {
            assert_eq!(failure.code, ErrorCode::MalformedRequest);
        }
        other => panic!("Expected Remote(MALFORMED_REQUEST), got {:?}", other),
    }
    // Answered by the handler, not by the client's timer.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn test_connection_loss_fails_pending_calls() {
    struct HangService;

    #[async_trait::async_trait]
    impl Service for HangService {
        async fn call(&self, _method: &str, _args: Vec<Value>) -> Result<Value, CallFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    let substrate = MemorySubstrate::new();
    let env = test_env(&substrate);
    let addr = ServiceAddr::project("p1", "hang");

    let _handle = serve(&env, addr.clone(), Arc::new(HangService)).await.unwrap();
    let client = Arc::new(ServiceClient::new(&env, addr).await.unwrap());

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call("stall", vec![]).await })
    };

    // Let the request get in flight, then lose the broker.
    tokio::time::sleep(Duration::from_millis(50)).await;
    substrate.shutdown();

    let err = caller.await.unwrap().unwrap_err();
    assert!(matches!(err, CallError::Connection(_)), "got {:?}", err);
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn test_env_local_addr_uses_identity() {
    let substrate = MemorySubstrate::new();
    let env = Env::builder()
        .substrate(Arc::new(substrate))
        .identity("p9", Some(4))
        .build()
        .unwrap();

    let addr = env.local_addr("syncfs");
    assert_eq!(addr, ServiceAddr::compute_server("p9", 4, "syncfs"));
    assert_eq!(addr.subject().unwrap().as_str(), "svc.p9.4.syncfs");
}
