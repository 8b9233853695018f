use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use bz_core::chat::ChatSession;
use bz_core::{scalar_from_param, BzResult, Condition, LiveEvent, RecordId, Table};

use crate::auth::{auth_context_from_headers, AuthContext};
use crate::error::ApiError;
use crate::rest::{chat::session_from_headers, list_spec_for};
use crate::state::AppState;

/// List paging parameters that mean nothing to a subscription.
const PAGING_PARAMS: &[&str] = &["limit", "start", "orderBy", "orderDirection"];

pub fn live_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/live/:table", get(live_handler))
        .with_state(state)
}

async fn live_handler(
    ws: Option<WebSocketUpgrade>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let auth = match auth_context_from_headers(&headers, &state.auth) {
        Ok(auth) => auth,
        Err(err) => {
            tracing::warn!(?err, "rejected live subscription token");
            return ApiError::Unauthorized.into_response();
        }
    };
    let Ok(table) = table.parse::<Table>() else {
        return ApiError::hidden().into_response();
    };
    let conditions = match live_conditions(table, &params) {
        Ok(conditions) => conditions,
        Err(err) => return ApiError::from_store(err, "Failed to subscribe").into_response(),
    };
    if !may_subscribe(&auth, session_from_headers(&headers).as_ref(), table, &conditions) {
        return ApiError::hidden().into_response();
    }
    let Some(ws) = ws else {
        return StatusCode::UPGRADE_REQUIRED.into_response();
    };

    tracing::debug!(%table, filters = conditions.len(), "live subscription opened");
    ws.on_upgrade(move |socket| handle_socket(socket, state, table, conditions))
}

/// Equality filters from the query string. Known filter parameters go
/// through the table's `ListSpec` so reference keys are normalized; `id`
/// matches the record itself; anything else compares the raw field.
pub(crate) fn live_conditions(
    table: Table,
    params: &HashMap<String, String>,
) -> BzResult<Vec<Condition>> {
    let spec = list_spec_for(table);
    let mut conditions = Vec::new();
    for (param, raw) in params {
        let raw = raw.trim();
        if raw.is_empty() || PAGING_PARAMS.contains(&param.as_str()) {
            continue;
        }
        let condition = if param == "id" {
            Condition::equals("id", RecordId::parse_key(table, raw)?)
        } else if let Some(filter) = spec.filter_for(param) {
            filter.condition(raw)?
        } else {
            Condition::equals(param.as_str(), scalar_from_param(raw))
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

/// Feeds carrying personal or order data are admin-only. Chat feeds are
/// open to the visitor whose session cookie names the chat, and only when
/// the subscription is pinned to that chat.
pub(crate) fn may_subscribe(
    auth: &AuthContext,
    session: Option<&ChatSession>,
    table: Table,
    conditions: &[Condition],
) -> bool {
    if auth.is_admin() {
        return true;
    }
    match table {
        Table::User
        | Table::ChatUser
        | Table::ShopCart
        | Table::ShopOrder
        | Table::ShopOrderDetails
        | Table::ShopPayment => false,
        Table::Message => pinned_to_session_chat(session, "chat_id", conditions),
        Table::Chat => pinned_to_session_chat(session, "id", conditions),
        _ => true,
    }
}

fn pinned_to_session_chat(
    session: Option<&ChatSession>,
    column: &str,
    conditions: &[Condition],
) -> bool {
    let Some(chat) = session.and_then(|session| session.chat_ref().ok()) else {
        return false;
    };
    let expected = Condition::equals(column, &chat);
    conditions.contains(&expected)
}

pub(crate) fn event_matches(event: &LiveEvent, table: Table, conditions: &[Condition]) -> bool {
    if event.table != table {
        return false;
    }
    match event.document() {
        Some(doc) => conditions.iter().all(|condition| condition.matches(doc)),
        None => conditions.is_empty(),
    }
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    table: Table,
    conditions: Vec<Condition>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.live_tx.subscribe();
    let mut shutdown = state.shutdown_tx.subscribe();

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(%table, "live subscriber lagged by {n} events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => break,
            };
            if !event_matches(&event, table, &conditions) {
                continue;
            }
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to serialize live event");
                    continue;
                }
            };
            if sender.send(Message::Text(payload)).await.is_err() {
                return;
            }
        }

        if let Ok(payload) = serde_json::to_string(&LiveEvent::close(table)) {
            let _ = sender.send(Message::Text(payload)).await;
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::debug!(%table, "live subscription closed");
}
