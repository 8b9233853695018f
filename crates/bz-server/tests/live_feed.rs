//! Live feed over a real websocket connection.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use bz_core::{PatchOp, RecordId, Table};
use bz_server::auth::AuthConfig;
use bz_server::rest::create_router;
use bz_server::state::AppState;
use bz_server::websocket::live_router;

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server() -> (String, Arc<AppState>) {
    let state = Arc::new(AppState::in_memory(AuthConfig::default()).expect("in-memory state"));
    let app = create_router(Arc::clone(&state)).merge(live_router(Arc::clone(&state)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}"), state)
}

async fn subscribe(base: &str, path: &str) -> Socket {
    let (socket, response) = tokio_tungstenite::connect_async(format!("{base}{path}"))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);
    // Give the server a moment to subscribe to the change feed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    socket
}

async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timeout waiting for live event")
            .expect("stream ended")
            .expect("websocket error");
        if msg.is_text() {
            return serde_json::from_str(&msg.into_text().unwrap()).unwrap();
        }
    }
}

#[tokio::test]
async fn subscribers_receive_changes_then_close() {
    let (base, state) = spawn_server().await;
    let mut socket = subscribe(&base, "/api/live/BlogTag").await;

    let tag = RecordId::generate(Table::BlogTag);
    let fields = json!({ "name": "Rust", "slug": "rust" });
    state
        .store
        .create(&tag, fields.as_object().cloned().unwrap())
        .await
        .unwrap();
    state
        .store
        .create(
            &RecordId::generate(Table::BlogCategory),
            json!({ "title": "News" }).as_object().cloned().unwrap(),
        )
        .await
        .unwrap();
    state
        .store
        .patch(&tag, &[PatchOp::replace("/name", "Rustacean")])
        .await
        .unwrap();
    state.store.delete(&tag).await.unwrap();

    let created = next_event(&mut socket).await;
    assert_eq!(created["action"], "CREATE");
    assert_eq!(created["record"]["name"], "Rust");
    let updated = next_event(&mut socket).await;
    assert_eq!(updated["action"], "UPDATE");
    assert_eq!(updated["record"]["name"], "Rustacean");
    let deleted = next_event(&mut socket).await;
    assert_eq!(deleted["action"], "DELETE");
    assert_eq!(deleted["id"], json!(tag.to_string()));

    state.shutdown();
    let closed = next_event(&mut socket).await;
    assert_eq!(closed["action"], "CLOSE");
    assert_eq!(closed["table"], "BlogTag");

    let end = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("timeout waiting for close frame");
    assert!(matches!(end, Some(Ok(Message::Close(_))) | None));
}

#[tokio::test]
async fn filtered_subscribers_only_see_matching_records() {
    let (base, state) = spawn_server().await;
    let mut socket = subscribe(&base, "/api/live/BlogTag?slug=2024").await;

    for slug in ["2023", "2024"] {
        state
            .store
            .create(
                &RecordId::generate(Table::BlogTag),
                json!({ "name": slug, "slug": slug }).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();
    }

    let event = next_event(&mut socket).await;
    assert_eq!(event["record"]["slug"], "2024");

    socket.send(Message::Close(None)).await.unwrap();
}
