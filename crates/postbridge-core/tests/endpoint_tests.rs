//! Integration tests for endpoint correlation and dispatch.
//!
//! Most tests connect a host and a view endpoint through in-process channels.
//! Some drive one side of the channel by hand to control exactly what the
//! other endpoint receives.

use postbridge::protocol::ERROR_SERVICE_NOT_FOUND;
use postbridge::{
    channel_pair, BridgeError, ChannelTransport, Endpoint, EndpointRole, Envelope, LocalService,
    MessageKind, Response, StreamTransport, Transport,
};
use serde_json::{json, Value};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const TIMEOUT: Duration = Duration::from_secs(5);

fn echo_service() -> LocalService {
    LocalService::builder("echo")
        .typed_method("ping", |(x,): (Value,)| async move { Ok(x) })
        .build()
        .unwrap()
}

fn connect_pair() -> (Endpoint, Endpoint) {
    let (host_end, view_end) = channel_pair();
    (
        Endpoint::connect(host_end, EndpointRole::Host),
        Endpoint::connect(view_end, EndpointRole::View),
    )
}

type WireLog = Arc<Mutex<Vec<(&'static str, Envelope)>>>;

/// Connect two endpoints through a relay that records every envelope.
fn connect_tapped_pair() -> (Endpoint, Endpoint, WireLog) {
    let (host_end, tap_host_side) = channel_pair();
    let (tap_view_side, view_end) = channel_pair();
    let log: WireLog = Arc::new(Mutex::new(Vec::new()));

    let (to_host, mut from_host) = tap_host_side.into_parts();
    let (to_view, mut from_view) = tap_view_side.into_parts();

    let host_log = log.clone();
    tokio::spawn(async move {
        while let Ok(Some(envelope)) = from_host.next_message().await {
            host_log.lock().unwrap().push(("host->view", envelope.clone()));
            if to_view.post_message(envelope).is_err() {
                break;
            }
        }
        to_view.close();
    });

    let view_log = log.clone();
    tokio::spawn(async move {
        while let Ok(Some(envelope)) = from_view.next_message().await {
            view_log.lock().unwrap().push(("view->host", envelope.clone()));
            if to_host.post_message(envelope).is_err() {
                break;
            }
        }
        to_host.close();
    });

    (
        Endpoint::connect(host_end, EndpointRole::Host),
        Endpoint::connect(view_end, EndpointRole::View),
        log,
    )
}

#[tokio::test]
async fn test_echo_scenario_wire_traffic() {
    let (host, view, log) = connect_tapped_pair();
    host.register_service(echo_service()).unwrap();

    let echo = view.get_service("echo").await.unwrap();
    assert_eq!(echo.method_names(), vec!["ping"]);
    let pong = echo.call("ping", vec![json!("hello")]).await.unwrap();
    assert_eq!(pong, json!("hello"));

    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 4, "expected two request/response pairs: {:?}", log);

    let (dir, get_req) = &log[0];
    assert_eq!(*dir, "view->host");
    assert_eq!(get_req.kind, MessageKind::Request);
    assert_eq!(get_req.payload, json!({"type": "getService", "serviceName": "echo"}));

    let (dir, get_resp) = &log[1];
    assert_eq!(*dir, "host->view");
    assert_eq!(get_resp.kind, MessageKind::Response);
    assert_eq!(get_resp.id, get_req.id);
    assert_eq!(get_resp.payload, json!({"methodNames": ["ping"]}));

    let (_, invoke_req) = &log[2];
    assert_eq!(
        invoke_req.payload,
        json!({"type": "invoke", "serviceName": "echo", "methodName": "ping", "args": ["hello"]})
    );
    let (_, invoke_resp) = &log[3];
    assert_eq!(invoke_resp.id, invoke_req.id);
    assert_eq!(invoke_resp.payload, json!({"result": "hello"}));

    assert_ne!(get_req.id, invoke_req.id);
}

#[tokio::test]
async fn test_get_missing_service_is_rejected() {
    let (_host, view) = connect_pair();

    let err = view.get_service("missing").await.unwrap_err();
    assert!(matches!(err, BridgeError::Remote { .. }));
    assert_eq!(err.to_string(), ERROR_SERVICE_NOT_FOUND);
}

#[tokio::test]
async fn test_calls_settle_independently_of_send_order() {
    let (host, view) = connect_pair();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

    let service = LocalService::builder("timing")
        .method("slow", move |_| {
            let release_rx = release_rx.clone();
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(json!("slow"))
            }
        })
        .method("fast", |_| async { Ok(json!("fast")) })
        .build()
        .unwrap();
    host.register_service(service).unwrap();

    let stub = view.get_service("timing").await.unwrap();
    let slow_stub = stub.clone();
    let slow = tokio::spawn(async move { slow_stub.call("slow", vec![]).await });

    // The fast call completes while the slow one is still pending.
    let fast = tokio::time::timeout(TIMEOUT, stub.call("fast", vec![]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fast, json!("fast"));
    assert!(!slow.is_finished());

    release_tx.send(()).unwrap();
    let slow = tokio::time::timeout(TIMEOUT, slow).await.unwrap().unwrap().unwrap();
    assert_eq!(slow, json!("slow"));
    assert_eq!(view.pending_calls(), 0);
}

#[tokio::test]
async fn test_response_for_other_id_does_not_settle_call() {
    let (raw_end, view_end): (ChannelTransport, ChannelTransport) = channel_pair();
    let view = Endpoint::connect(view_end, EndpointRole::View);
    let (raw_sink, mut raw_source) = raw_end.into_parts();

    let handle = view.handle();
    let lookup = tokio::spawn(async move { handle.get_service("echo").await });

    let request = raw_source.next_message().await.unwrap().unwrap();
    assert_eq!(request.kind, MessageKind::Request);

    raw_sink
        .post_message(Envelope::response(
            request.id + 1000,
            &Response::MethodNames(vec!["wrong".to_string()]),
        ))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!lookup.is_finished());
    assert_eq!(view.pending_calls(), 1);

    raw_sink
        .post_message(Envelope::response(
            request.id,
            &Response::MethodNames(vec!["ping".to_string()]),
        ))
        .unwrap();
    let stub = tokio::time::timeout(TIMEOUT, lookup)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stub.method_names(), vec!["ping"]);
}

#[tokio::test]
async fn test_remote_error_message_is_preserved() {
    let (host, view) = connect_pair();
    let service = LocalService::builder("strict")
        .method("fail", |_| async {
            Err(BridgeError::Other("Prompt must not be empty".to_string()))
        })
        .build()
        .unwrap();
    host.register_service(service).unwrap();

    let stub = view.get_service("strict").await.unwrap();
    let err = stub.call("fail", vec![]).await.unwrap_err();
    assert_eq!(err.to_string(), "Prompt must not be empty");
}

#[tokio::test]
async fn test_register_same_name_twice_fails() {
    let (host, _view) = connect_pair();
    host.register_service(echo_service()).unwrap();

    let err = host.register_service(echo_service()).unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyRegistered { .. }));
    assert_eq!(
        err.to_string(),
        "Service named \"echo\" has already been registered"
    );
}

#[tokio::test]
async fn test_services_can_be_offered_in_both_directions() {
    let (host, view) = connect_pair();
    host.register_service(echo_service()).unwrap();
    view.register_service(
        LocalService::builder("viewEcho")
            .typed_method("shout", |(s,): (String,)| async move { Ok(s.to_uppercase()) })
            .build()
            .unwrap(),
    )
    .unwrap();

    let from_host = host.get_service("viewEcho").await.unwrap();
    let from_view = view.get_service("echo").await.unwrap();

    let shouted: String = from_host.call_typed("shout", vec![json!("hi")]).await.unwrap();
    assert_eq!(shouted, "HI");
    assert_eq!(
        from_view.call("ping", vec![json!(7)]).await.unwrap(),
        json!(7)
    );
}

#[tokio::test]
async fn test_peer_disconnect_rejects_pending_calls() {
    let (raw_end, view_end) = channel_pair();
    let view = Endpoint::connect(view_end, EndpointRole::View);
    let (raw_sink, mut raw_source) = raw_end.into_parts();

    let handle = view.handle();
    let lookup = tokio::spawn(async move { handle.get_service("echo").await });
    let _request = raw_source.next_message().await.unwrap().unwrap();

    raw_sink.close();
    drop(raw_source);

    let err = tokio::time::timeout(TIMEOUT, lookup)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_channel_closed());
    assert!(view.is_closed());
}

#[tokio::test]
async fn test_stream_transport_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let host = Endpoint::connect(StreamTransport::from_tcp(stream), EndpointRole::Host);
        host.register_service(echo_service()).unwrap();
        host.closed().await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut view = Endpoint::connect(StreamTransport::from_tcp(stream), EndpointRole::View);

    let echo = tokio::time::timeout(TIMEOUT, view.get_service("echo"))
        .await
        .unwrap()
        .unwrap();
    let pong = echo
        .call("ping", vec![json!({"nested": [1, 2, 3]})])
        .await
        .unwrap();
    assert_eq!(pong, json!({"nested": [1, 2, 3]}));

    view.shutdown();
    tokio::time::timeout(TIMEOUT, accept).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reply_too_large_for_transport_becomes_error() {
    let (host_io, view_io) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host_io);
    let (view_read, view_write) = tokio::io::split(view_io);

    let host = Endpoint::connect(
        StreamTransport::new(host_read, host_write).with_max_frame_size(512),
        EndpointRole::Host,
    );
    let view = Endpoint::connect(StreamTransport::new(view_read, view_write), EndpointRole::View);
    host.register_service(
        LocalService::builder("bulk")
            .typed_method("blob", |(): ()| async move { Ok("x".repeat(2000)) })
            .build()
            .unwrap(),
    )
    .unwrap();

    let bulk = tokio::time::timeout(TIMEOUT, view.get_service("bulk"))
        .await
        .unwrap()
        .unwrap();
    let err = tokio::time::timeout(TIMEOUT, bulk.call("blob", vec![]))
        .await
        .expect("caller must not wait forever on a reply that cannot be sent")
        .unwrap_err();
    match err {
        BridgeError::Remote { message } => assert!(message.contains("maximum is 512"), "{}", message),
        other => panic!("Expected Remote, got: {:?}", other),
    }

    // The channel itself is still usable.
    assert!(!view.is_closed());
    assert!(!host.is_closed());
}

/// Writer whose every write fails as if the peer had gone away.
struct BrokenWriter;

impl AsyncWrite for BrokenWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_write_failure_tears_down_endpoint() {
    // The read side stays open, so only the failed write can end the channel.
    let (view_io, _peer) = tokio::io::duplex(4096);
    let (view_read, _view_write) = tokio::io::split(view_io);
    let view = Endpoint::connect(StreamTransport::new(view_read, BrokenWriter), EndpointRole::View);

    let err = tokio::time::timeout(TIMEOUT, view.get_service("echo"))
        .await
        .expect("pending call must be rejected after the write fails")
        .unwrap_err();
    assert!(err.is_channel_closed(), "unexpected error: {:?}", err);
    assert!(view.is_closed());

    let err = view.get_service("echo").await.unwrap_err();
    assert!(err.is_channel_closed());
}
