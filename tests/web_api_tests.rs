//! Integration tests for the administrative HTTP API.
//!
//! These tests drive the router directly with `oneshot` requests.

#![cfg(feature = "web")]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tower::ServiceExt;

use rs_signalbox::config::{ServerConfig, WebConfig};
use rs_signalbox::hal::MockLink;
use rs_signalbox::notify::Notifier;
use rs_signalbox::services::{build_router, WebServerConfig};
use rs_signalbox::store::MemoryStore;
use rs_signalbox::topology::{SignalRecord, StretchKind, StretchRecord};
use rs_signalbox::train::TrainView;
use rs_signalbox::{ErrorCode, Interlocking, OpResult};

fn create_test_app() -> (axum::Router, Arc<Interlocking>) {
    let ilk = Interlocking::load(
        Arc::new(MemoryStore::new()),
        Notifier::default(),
        &ServerConfig::default(),
    )
    .unwrap();
    let ilk = Arc::new(ilk);
    let router = build_router(Arc::clone(&ilk), &WebServerConfig::default());
    (router, ilk)
}

fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn op(app: &axum::Router, method: &str, uri: &str, body: &str) -> (StatusCode, OpResult) {
    let (status, body) = send(app, request(method, uri, body)).await;
    (status, serde_json::from_slice(&body).unwrap())
}

const TRAIN: &str = r#"{"name":"Class 08","slowSpeed":20,"halfSpeed":50,"fastSpeed":90}"#;

#[tokio::test]
async fn test_list_trains_empty() {
    let (app, _ilk) = create_test_app();

    let (status, body) = send(&app, request("GET", "/api/train", "")).await;

    assert_eq!(status, StatusCode::OK);
    let trains: Vec<TrainView> = serde_json::from_slice(&body).unwrap();
    assert!(trains.is_empty());
}

#[tokio::test]
async fn test_insert_and_list_train() {
    let (app, ilk) = create_test_app();

    let (status, result) = op(&app, "POST", "/api/train", TRAIN).await;
    assert_eq!(status, StatusCode::OK);
    assert!(result.ok);
    assert_eq!(result.extra_data, vec!["1".to_string()]);

    let (_, body) = send(&app, request("GET", "/api/train", "")).await;
    let trains: Vec<TrainView> = serde_json::from_slice(&body).unwrap();
    assert_eq!(trains.len(), 1);
    assert_eq!(trains[0].record.name, "Class 08");
    assert!(!trains[0].online);
    assert_eq!(ilk.train(1).unwrap().record().slow_speed, 20);
}

#[tokio::test]
async fn test_invalid_train_is_bad_request() {
    let (app, _ilk) = create_test_app();

    let (status, result) = op(
        &app,
        "POST",
        "/api/train",
        r#"{"name":"Slowpoke","slowSpeed":50,"halfSpeed":40,"fastSpeed":90}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(result.error_code, ErrorCode::DataNotValid);
    assert_eq!(result.extra_data, vec!["halfSpeed".to_string()]);
}

#[tokio::test]
async fn test_malformed_body_is_unmarshal_error() {
    let (app, _ilk) = create_test_app();

    let (status, result) = op(&app, "POST", "/api/train", "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(result.error_code, ErrorCode::JsonCouldNotUnmarshal);
}

#[tokio::test]
async fn test_update_and_delete_train() {
    let (app, ilk) = create_test_app();
    op(&app, "POST", "/api/train", TRAIN).await;

    let (status, result) = op(
        &app,
        "PUT",
        "/api/train",
        r#"{"id":1,"name":"Class 09","slowSpeed":25,"halfSpeed":55,"fastSpeed":95}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{result:?}");
    assert_eq!(ilk.train(1).unwrap().record().name, "Class 09");

    let (status, _) = op(&app, "DELETE", "/api/train", r#"{"id":1,"name":"Class 09"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ilk.train(1).is_none());

    let (status, result) = op(&app, "DELETE", "/api/train", r#"{"id":1}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(result.error_code, ErrorCode::CouldNotFindRecord);
}

#[tokio::test]
async fn test_jump_start_and_stop() {
    let (app, ilk) = create_test_app();
    let stretch = ilk
        .insert_stretch(StretchRecord {
            id: 0,
            name: "yard".into(),
            kind: StretchKind::OneWaySingleTrack,
        })
        .unwrap();
    for name in ["Y1", "Y2"] {
        ilk.insert_signal(SignalRecord {
            stretch_id: stretch.id,
            name: name.into(),
            ..Default::default()
        })
        .unwrap();
    }
    op(&app, "POST", "/api/train", TRAIN).await;
    let jump = r#"{"trainId":1,"stretchId":1,"signalId":1}"#;

    let (status, result) = op(&app, "POST", "/api/train_jump_start", jump).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(result.error_code, ErrorCode::TrainNotOnline);

    let link = Arc::new(MockLink::new());
    let access_key = ilk.train(1).unwrap().record().access_key;
    ilk.connect(access_key, link.clone()).unwrap();

    let (status, _) = op(&app, "POST", "/api/train_jump_start", jump).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ilk.train(1).unwrap().view().started);

    let (status, _) = op(&app, "POST", "/api/train_stop", "1").await;
    assert_eq!(status, StatusCode::OK);
    let view = ilk.train(1).unwrap().view();
    assert!(!view.started);
    assert_eq!(view.last_signal, None);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (app, _ilk) = create_test_app();

    let (status, result) = op(&app, "GET", "/api/nowhere", "").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!result.ok);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (app, _ilk) = create_test_app();
    let name = "x".repeat(128 * 1024);
    let body = format!(r#"{{"name":"{name}","slowSpeed":1,"halfSpeed":2,"fastSpeed":3}}"#);

    let (status, _) = send(&app, request("POST", "/api/train", &body)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[test]
fn test_request_timeout_follows_config() {
    let config = WebServerConfig::from_config(&WebConfig::default().with_request_timeout_secs(3));
    assert_eq!(config.request_timeout, Duration::from_secs(3));
}

// ============================================================================
// Operator channel over a real socket
// ============================================================================

const WS_LIMIT: usize = 64;

async fn operator_client() -> BufReader<TcpStream> {
    let (_, ilk) = create_test_app();
    let config = WebServerConfig {
        max_message_bytes: WS_LIMIT,
        ..WebServerConfig::default()
    };
    let router = build_router(ilk, &config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\n\
              Host: localhost\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();
    let mut client = BufReader::new(stream);
    let mut line = String::new();
    client.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("HTTP/1.1 101"), "{line}");
    while line != "\r\n" {
        line.clear();
        client.read_line(&mut line).await.unwrap();
    }
    client
}

/// Send one masked text frame (mask of zeros keeps the payload as is).
async fn send_text(client: &mut BufReader<TcpStream>, text: &str) {
    let mut frame = vec![0x81];
    match text.len() {
        len @ 0..=125 => frame.push(0x80 | len as u8),
        len => {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        }
    }
    frame.extend_from_slice(&[0, 0, 0, 0]);
    frame.extend_from_slice(text.as_bytes());
    client.get_mut().write_all(&frame).await.unwrap();
}

/// Next server frame as (opcode, payload); `None` once the socket closed.
async fn read_frame(client: &mut BufReader<TcpStream>) -> Option<(u8, Vec<u8>)> {
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await.ok()?;
    let mut len = usize::from(head[1] & 0x7f);
    if len == 126 {
        let mut ext = [0u8; 2];
        client.read_exact(&mut ext).await.ok()?;
        len = usize::from(u16::from_be_bytes(ext));
    }
    let mut payload = vec![0; len];
    client.read_exact(&mut payload).await.ok()?;
    Some((head[0] & 0x0f, payload))
}

#[tokio::test]
async fn test_operator_message_over_limit_ends_session() {
    let mut client = operator_client().await;
    let greeting = read_frame(&mut client).await.unwrap();
    assert_eq!(greeting, (1, b"true".to_vec()));

    send_text(&mut client, "GET:TRAIN$").await;
    let (opcode, reply) = read_frame(&mut client).await.unwrap();
    assert_eq!(opcode, 1);
    assert!(reply.starts_with(b"GET:TRAIN$"));

    let oversized = format!("INSERT:TRAIN${}", "x".repeat(WS_LIMIT * 2));
    send_text(&mut client, &oversized).await;
    let after = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut client))
        .await
        .expect("session stayed open");
    assert!(matches!(after, None | Some((8, _))), "{after:?}");
}
