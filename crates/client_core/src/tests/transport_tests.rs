use std::collections::HashMap;

use axum::{
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};

use super::*;
use crate::config::push_endpoint;

const WAIT: std::time::Duration = std::time::Duration::from_secs(5);

async fn spawn_push_server() -> Result<(String, oneshot::Receiver<(String, String)>)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = oneshot::channel();
    let tx = std::sync::Arc::new(tokio::sync::Mutex::new(Some(tx)));

    let app = Router::new().route(
        "/ws",
        get(
            move |ws: WebSocketUpgrade, Query(query): Query<HashMap<String, String>>| {
                let tx = tx.clone();
                async move {
                    let token = query.get("token").cloned().unwrap_or_default();
                    let response: Response = ws.on_upgrade(move |socket| async move {
                        let received = echo_once(socket).await;
                        if let Some(tx) = tx.lock().await.take() {
                            let _ = tx.send((token, received));
                        }
                    });
                    response
                }
            },
        ),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), rx))
}

/// Pushes one envelope, waits for one client frame, then closes with a reason.
async fn echo_once(mut socket: WebSocket) -> String {
    let _ = socket
        .send(WsMessage::Text(
            r#"{"type":"user_list","payload":[]}"#.to_string(),
        ))
        .await;
    let mut received = String::new();
    while let Some(Ok(msg)) = socket.recv().await {
        if let WsMessage::Text(text) = msg {
            received = text;
            break;
        }
    }
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code: 4000,
            reason: "bye".into(),
        })))
        .await;
    received
}

#[tokio::test]
async fn websocket_connector_carries_frames_both_ways_and_reports_close() {
    let (server_url, server_rx) = spawn_push_server().await.expect("spawn server");
    let endpoint = push_endpoint(&server_url, "secret-token").expect("endpoint");

    let mut channel = WebSocketConnector
        .connect(endpoint)
        .await
        .expect("connect");

    let first = timeout(WAIT, channel.inbound.recv())
        .await
        .expect("frame in time");
    assert_eq!(
        first,
        Some(TransportEvent::Frame(
            r#"{"type":"user_list","payload":[]}"#.to_string()
        ))
    );

    channel
        .outbound
        .send(r#"{"type":"send_message"}"#.to_string())
        .expect("queue outbound");

    let (token, received) = timeout(WAIT, server_rx)
        .await
        .expect("server in time")
        .expect("server result");
    assert_eq!(token, "secret-token");
    assert_eq!(received, r#"{"type":"send_message"}"#);

    let closed = timeout(WAIT, channel.inbound.recv())
        .await
        .expect("close in time");
    assert_eq!(closed, Some(TransportEvent::Closed(Some("bye".into()))));
}

#[tokio::test]
async fn connect_failure_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let endpoint = push_endpoint(&format!("http://{addr}"), "t").expect("endpoint");
    let err = match WebSocketConnector.connect(endpoint).await {
        Ok(_) => panic!("connect to a closed port must fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("failed to connect websocket"));
    assert!(!err.to_string().contains("token="));
}
