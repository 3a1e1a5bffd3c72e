// Integration tests for the live socket: handshake, dispatch into the
// caches and the execution response round trip. A plain tokio TCP
// listener plays the server side.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rpdb_api::model::DateTime;
use rpdb_api::ApiConfig;
use rpdb_core::{Persistence, PersistenceOptions, Socket, SocketOptions, UpdateBus};

type ServerSide = WebSocketStream<TcpStream>;

// ── Test server ─────────────────────────────────────────────────────

/// One-connection-at-a-time websocket server. Every accepted handshake
/// delivers its headers and the server half of the stream.
async fn ws_server() -> (String, mpsc::Receiver<(HeaderMap, ServerSide)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };

            let (header_tx, mut header_rx) = mpsc::channel(1);
            let callback = move |request: &Request, response: Response| {
                let _ = header_tx.try_send(request.headers().clone());
                Ok(response)
            };

            match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                Ok(ws) => {
                    let headers = header_rx.recv().await.expect("handshake headers");
                    if tx.send((headers, ws)).await.is_err() {
                        return;
                    }
                }
                Err(_) => continue,
            }
        }
    });

    (url, rx)
}

fn socket_options(url: &str) -> SocketOptions {
    SocketOptions {
        use_websocket: true,
        socket_url: url.to_string(),
        ..SocketOptions::default()
    }
}

async fn persistence_with_socket(
    api: &MockServer,
    url: &str,
    options: PersistenceOptions,
) -> Persistence {
    Mock::given(method("PROPFIND"))
        .and(path("/entry"))
        .respond_with(ResponseTemplate::new(204))
        .mount(api)
        .await;
    Mock::given(method("GET"))
        .and(path("/attribute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 2, "name": "notify" }
        ])))
        .mount(api)
        .await;

    let mut config = ApiConfig::new("socket-key");
    config.base_url = api.uri();
    config.language = "en".into();

    let mut options = options;
    options.socket = socket_options(url);

    let p = Persistence::new(config, options).unwrap();
    p.start().await.unwrap();
    p
}

/// A server-formatted instant `seconds` away from now.
fn in_seconds(seconds: i64) -> String {
    (chrono::Local::now().naive_local() + chrono::Duration::seconds(seconds))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_handshake_carries_resume_version() {
    let (url, mut connections) = ws_server().await;

    let bus = Arc::new(UpdateBus::new());
    bus.set_version(42, DateTime::parse("2030-01-01T10:00:00").unwrap());

    let socket = Arc::new(Socket::new(
        socket_options(&url),
        SecretString::from("socket-key"),
        bus,
        CancellationToken::new(),
    ));
    socket.start();

    let (headers, _server) = timeout(Duration::from_secs(3), connections.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(headers.get("X-Api-Key").unwrap(), "socket-key");
    assert_eq!(headers.get("Version").unwrap(), "42");
    assert_eq!(headers.get("Version-Date").unwrap(), "2030-01-01T10:00:00");
    assert!(headers.contains_key("Client-Date"));
    assert!(headers.contains_key("Client-Version"));
}

#[tokio::test]
async fn test_reconnect_resumes_from_the_updated_version() {
    let (url, mut connections) = ws_server().await;

    let api = MockServer::start().await;
    let p = persistence_with_socket(&api, &url, PersistenceOptions::new()).await;

    let (first_headers, mut server) = timeout(Duration::from_secs(3), connections.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first_headers.get("Version").unwrap(), "0");

    // Deliver a version marker, then drop the connection uncleanly.
    server
        .send(Message::Text(
            json!({
                "type": "update",
                "update": { "version": 42, "version_date": "2030-01-01T10:00:00" }
            })
            .to_string(),
        ))
        .await
        .unwrap();

    // Wait until the client applied the version before closing.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while p.version_info().0 != 42 {
        assert!(tokio::time::Instant::now() < deadline, "version never applied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    drop(server);

    // The client reconnects after the first backoff tier (5 s) and
    // resumes from the version it saw.
    let (second_headers, _server) = timeout(Duration::from_secs(10), connections.recv())
        .await
        .expect("no reconnect happened")
        .unwrap();
    assert_eq!(second_headers.get("Version").unwrap(), "42");
    assert_eq!(
        second_headers.get("Version-Date").unwrap(),
        "2030-01-01T10:00:00"
    );
}

// ── Message dispatch ────────────────────────────────────────────────

#[tokio::test]
async fn test_update_messages_merge_into_the_caches() {
    let (url, mut connections) = ws_server().await;
    let api = MockServer::start().await;

    let p = persistence_with_socket(&api, &url, PersistenceOptions::new()).await;
    let mut observer = p.register_observer();

    let (_, mut server) = timeout(Duration::from_secs(3), connections.recv())
        .await
        .unwrap()
        .unwrap();

    server
        .send(Message::Text(
            json!({
                "type": "update",
                "update": {
                    "version": 7,
                    "version_date": "2030-01-01T10:00:00",
                    "entry": {
                        "created": [{
                            "id": 99,
                            "attribute": { "id": 2 },
                            "date_time": in_seconds(3600)
                        }]
                    },
                    "attribute": {}
                }
            })
            .to_string(),
        ))
        .await
        .unwrap();

    // Skip the initial empty notification, then expect the delta.
    let update = loop {
        let update = timeout(Duration::from_secs(3), observer.recv())
            .await
            .expect("no update arrived")
            .unwrap();
        if !update.is_zero() {
            break update;
        }
    };

    assert_eq!(update.version, 7);
    assert_eq!(update.entry.created.len(), 1);

    let cached = p.get_entry(99).unwrap();
    assert_eq!(cached.attribute.get().name, "notify");
    assert_eq!(p.version_info().0, 7);
}

#[tokio::test]
async fn test_unknown_message_types_are_ignored() {
    let (url, mut connections) = ws_server().await;
    let api = MockServer::start().await;

    let p = persistence_with_socket(&api, &url, PersistenceOptions::new()).await;
    let mut observer = p.register_observer();

    let (_, mut server) = timeout(Duration::from_secs(3), connections.recv())
        .await
        .unwrap()
        .unwrap();

    server
        .send(Message::Text(
            json!({ "type": "future_thing", "data": {} }).to_string(),
        ))
        .await
        .unwrap();

    // The connection stays up and later messages still work.
    server
        .send(Message::Text(
            json!({
                "type": "update",
                "update": {
                    "version": 2,
                    "version_date": "2030-01-01T10:00:00",
                    "entry": { "deleted": [1] },
                    "attribute": {}
                }
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let update = loop {
        let update = timeout(Duration::from_secs(3), observer.recv())
            .await
            .expect("socket died on unknown message")
            .unwrap();
        if !update.is_zero() {
            break update;
        }
    };
    assert_eq!(update.version, 2);

    // The unknown message itself caused no cache change.
    assert!(p.get_entries_all().is_empty());
}

#[tokio::test]
async fn test_no_db_entries_join_the_cache() {
    let (url, mut connections) = ws_server().await;
    let api = MockServer::start().await;

    let p = persistence_with_socket(&api, &url, PersistenceOptions::new()).await;
    let mut observer = p.register_observer();

    let (_, mut server) = timeout(Duration::from_secs(3), connections.recv())
        .await
        .unwrap()
        .unwrap();

    server
        .send(Message::Text(
            json!({
                "type": "no_db",
                "no_db": [{
                    "id": 55,
                    "attribute": { "id": 2 },
                    "date_time": in_seconds(1800)
                }]
            })
            .to_string(),
        ))
        .await
        .unwrap();

    // The carried update has no delta but still announces a change.
    let update = timeout(Duration::from_secs(3), observer.recv())
        .await
        .expect("no notification for no_db entries")
        .unwrap();
    assert!(update.is_zero());

    let cached = p.get_entry(55).unwrap();
    assert_eq!(cached.attribute.get().name, "notify");
}

#[tokio::test]
async fn test_exec_response_round_trip() {
    let (url, mut connections) = ws_server().await;
    let api = MockServer::start().await;

    let options = PersistenceOptions::new().with_exec_response_executor(|entry| {
        Some(rpdb_api::model::ExecutionResponse {
            entry_id: entry.id,
            code: 0,
            text: format!("ran {}", entry.attribute.get().name),
        })
    });
    let _p = persistence_with_socket(&api, &url, options).await;

    let (_, mut server) = timeout(Duration::from_secs(3), connections.recv())
        .await
        .unwrap()
        .unwrap();

    server
        .send(Message::Text(
            json!({
                "type": "exec_response",
                "exec_response": {
                    "id": 12,
                    "attribute": { "id": 2 },
                    "date_time": in_seconds(0)
                }
            })
            .to_string(),
        ))
        .await
        .unwrap();

    // The callback result comes back as a client message.
    let frame = timeout(Duration::from_secs(3), async {
        loop {
            match server.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no execution response arrived");

    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["exec_response"]["entry_id"], 12);
    assert_eq!(value["exec_response"]["response_code"], 0);
    assert_eq!(value["exec_response"]["response"], "ran notify");
}

// ── Delete hook ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_remote_deletion_triggers_the_delete_hook() {
    let (url, mut connections) = ws_server().await;
    let api = MockServer::start().await;

    // Seed the cache with one future entry.
    Mock::given(method("PROPFIND"))
        .and(path("/entry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 31,
            "attribute": { "id": 2 },
            "date_time": in_seconds(3600),
            "creator": 1
        }])))
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/attribute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 2, "name": "notify" }
        ])))
        .mount(&api)
        .await;

    let (tx, mut executions) = mpsc::unbounded_channel();
    let mut options = PersistenceOptions::new().with_executor(move |entry, kind| {
        let _ = tx.send((entry.id, kind));
    });
    options.socket = socket_options(&url);

    let mut config = ApiConfig::new("socket-key");
    config.base_url = api.uri();
    config.language = "en".into();
    let p = Persistence::new(config, options).unwrap();
    p.start().await.unwrap();

    let (_, mut server) = timeout(Duration::from_secs(3), connections.recv())
        .await
        .unwrap()
        .unwrap();

    server
        .send(Message::Text(
            json!({
                "type": "update",
                "update": {
                    "version": 3,
                    "version_date": "2030-01-01T10:00:00",
                    "entry": { "deleted": [31] },
                    "attribute": {}
                }
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let (id, kind) = timeout(Duration::from_secs(3), executions.recv())
        .await
        .expect("delete hook never fired")
        .unwrap();
    assert_eq!(id, 31);
    assert_eq!(kind, rpdb_core::ExecutionType::Delete);
    assert!(p.get_entry(31).is_err());
}
