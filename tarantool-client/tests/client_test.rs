//! Integration tests for the single-endpoint client against the mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, config_builder, echo, target, Action, MockServer, SCHEMA_ID};
use tarantool_client::{
    ConnectionEvent, ConnectionState, Executor, ExecutorExt, IteratorType, Request,
    TarantoolClient, TarantoolError, Value,
};

/// Replies to `eval("sleep", [delay_ms, tag])` with `[tag]` after the delay,
/// and never replies to `eval("hang")`.
fn scripted(request: &tarantool_core::protocol::Packet) -> Action {
    match target(request) {
        "sleep" => {
            let args = request.body.tuple.clone().unwrap_or_default();
            let delay = args.first().and_then(Value::as_u64).unwrap_or(0);
            let tag = args.get(1).cloned().unwrap_or_default();
            Action::Delayed(
                Duration::from_millis(delay),
                Box::new(Action::Ok(Value::Array(vec![tag]))),
            )
        }
        "hang" => Action::Ignore,
        _ => echo(request),
    }
}

#[tokio::test]
async fn test_connect_and_ping() {
    common::init_tracing();
    let server = MockServer::start().await;
    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();

    assert!(client.is_alive());
    assert_eq!(client.state(), ConnectionState::Alive);
    client.ping().await.unwrap();

    let version = client.server_version().unwrap();
    assert!(version.starts_with("Tarantool 2.11.1"));
    assert_eq!(client.schema_id(), Some(SCHEMA_ID));
}

#[tokio::test]
async fn test_typed_operations_reach_server() {
    let server = MockServer::start().await;
    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();

    let inserted = client
        .insert(512, vec![1.into(), "alpha".into()])
        .await
        .unwrap();
    assert_eq!(inserted, Value::Array(vec![1.into(), "alpha".into()]));

    let selected = client
        .select(512, 0, vec![1.into()], 0, 10, IteratorType::Eq)
        .await
        .unwrap();
    assert_eq!(selected, Value::Array(vec![1.into()]));

    let called = client.call("echo", vec!["x".into()]).await.unwrap();
    assert_eq!(called, Value::Array(vec!["x".into()]));
}

#[tokio::test]
async fn test_out_of_order_responses_are_correlated() {
    let server = MockServer::builder().handler(scripted).start().await;
    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();

    let slow = client
        .exec(Request::eval("sleep", vec![300.into(), "slow".into()]))
        .await;
    let medium = client
        .exec(Request::eval("sleep", vec![100.into(), "medium".into()]))
        .await;
    let fast = client
        .exec(Request::eval("sleep", vec![0.into(), "fast".into()]))
        .await;
    assert_eq!(client.pending_count(), 3);

    let fast_result = fast.get().await.unwrap();
    assert!(!slow.is_done());

    assert_eq!(fast_result, Value::Array(vec!["fast".into()]));
    assert_eq!(medium.get().await.unwrap(), Value::Array(vec!["medium".into()]));
    assert_eq!(slow.get().await.unwrap(), Value::Array(vec!["slow".into()]));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_server_error_reaches_caller() {
    let server = MockServer::builder()
        .handler(|_| Action::Error(3, "Duplicate key exists in unique index 'pk'".into()))
        .start()
        .await;
    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();

    let err = client.insert(512, vec![1.into()]).await.unwrap_err();
    assert_eq!(err.server_code(), Some(3));
    assert!(err.to_string().contains("Duplicate key"));
    assert!(client.is_alive());
}

#[tokio::test]
async fn test_connection_loss_fails_every_pending_call() {
    let server = MockServer::builder().handler(scripted).start().await;
    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();

    let mut calls = Vec::new();
    for _ in 0..5 {
        calls.push(client.exec(Request::eval("hang", vec![])).await);
    }
    while server.requests() < 5 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(client.pending_count(), 5);

    server.kill_connections();
    for call in &calls {
        let err = call.get_timeout(Duration::from_secs(2)).await.unwrap_err();
        assert!(err.is_communication(), "unexpected error: {}", err);
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let server = MockServer::start().await;
    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();
    assert_eq!(server.connections(), 1);

    let mut events = client.subscribe();
    server.kill_connections();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !matches!(events.recv().await, Ok(ConnectionEvent::Connected { .. })) {}
    })
    .await
    .unwrap();
    client.wait_alive(Duration::from_secs(1)).await.unwrap();

    client.ping().await.unwrap();
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_events_follow_lifecycle() {
    let server = MockServer::start().await;
    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();
    let mut events = client.subscribe();

    server.kill_connections();

    let mut seen = Vec::new();
    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.unwrap();
            let done = matches!(event, ConnectionEvent::Connected { .. });
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "events seen: {:?}", seen);

    assert!(seen
        .iter()
        .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ConnectionEvent::ReconnectAttempt { attempt: 1 })));

    client.close();
    let closed = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(closed, ConnectionEvent::Closed));
}

#[tokio::test]
async fn test_large_frames_bypass_buffer() {
    let server = MockServer::start().await;
    let config = config_builder(&[server.addr()])
        .shared_buffer_size(1024)
        .direct_write_factor(0.5)
        .build()
        .unwrap();
    let client = TarantoolClient::connect(config).await.unwrap();

    // Larger than the whole shared buffer, so only the direct path can send it.
    let big = "x".repeat(4000);
    let reply = client.insert(512, vec![1.into(), big.clone().into()]).await.unwrap();
    assert_eq!(reply, Value::Array(vec![1.into(), big.into()]));

    let reply = client.insert(512, vec![2.into(), "small".into()]).await.unwrap();
    assert_eq!(reply, Value::Array(vec![2.into(), "small".into()]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_frame_sizes_never_interleave() {
    let server = MockServer::start().await;
    let config = config_builder(&[server.addr()])
        .shared_buffer_size(4096)
        .direct_write_factor(0.25)
        .build()
        .unwrap();
    let client = Arc::new(TarantoolClient::connect(config).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..64u32 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let payload = if i % 3 == 0 {
                format!("{}:{}", i, "L".repeat(3000))
            } else {
                format!("{}:small", i)
            };
            let reply = client
                .replace(512, vec![i.into(), payload.clone().into()])
                .await
                .unwrap();
            assert_eq!(reply, Value::Array(vec![i.into(), payload.into()]));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(client.is_alive());
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_close_fails_pending_and_later_calls() {
    let server = MockServer::builder().handler(scripted).start().await;
    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();

    let pending = client.exec(Request::eval("hang", vec![])).await;
    client.close();

    assert!(matches!(pending.get().await, Err(TarantoolError::Closed(_))));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(client.ping().await, Err(TarantoolError::Closed(_))));

    // Idempotent.
    client.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submissions_racing_close_fail_with_closed() {
    let server = MockServer::builder().handler(|_| Action::Ignore).start().await;
    let client = Arc::new(TarantoolClient::connect(config(server.addr())).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..200u32 {
        let task_client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            task_client.exec(Request::eval("hang", vec![i.into()])).await.get().await
        }));
        if i == 100 {
            client.close();
        }
    }

    for task in tasks {
        let result = task.await.unwrap();
        assert!(
            matches!(result, Err(TarantoolError::Closed(_))),
            "unexpected result: {:?}",
            result
        );
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_operation_timeout_leaves_call_pending() {
    let server = MockServer::builder().handler(scripted).start().await;
    let config = config_builder(&[server.addr()])
        .operation_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let client = TarantoolClient::connect(config).await.unwrap();

    let err = client.eval("hang", vec![]).await.unwrap_err();
    assert!(matches!(err, TarantoolError::Timeout(_)));
    assert_eq!(client.pending_count(), 1);
    assert!(client.is_alive());
}

#[tokio::test]
async fn test_old_call_switch() {
    let server = MockServer::builder()
        .handler(|request| Action::Ok(Value::from(u64::from(request.header.code))))
        .start()
        .await;

    let client = TarantoolClient::connect(config(server.addr())).await.unwrap();
    assert_eq!(client.call("f", vec![]).await.unwrap(), Value::from(10u32));

    let config = config_builder(&[server.addr()])
        .use_new_call(false)
        .build()
        .unwrap();
    let legacy = TarantoolClient::connect(config).await.unwrap();
    assert_eq!(legacy.call("f", vec![]).await.unwrap(), Value::from(6u32));
}
