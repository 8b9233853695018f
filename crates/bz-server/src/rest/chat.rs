//! Server side of the support chat widget.
//!
//! Visitors identify themselves once with an email; the resulting
//! [`ChatSession`] travels in the `chatUser` cookie and is what lets a
//! non-admin read and post to their own chat. Admins manage every chat
//! under `/api/admin/chats`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use bz_core::chat::{ChatSession, ChatStatus};
use bz_core::{
    now_timestamp, Condition, Document, FilterKind, FilterSpec, ListQuery, ListSpec, RecordId,
    SortDirection, Table,
};

use super::{
    create_record, deleted, get_record, into_document, list_records, not_found, patch_record,
    require_record, JsonBody,
};
use crate::auth::{require_admin, AuthContext};
use crate::error::{ApiError, ApiResult, OrFail};
use crate::state::AppState;
use crate::validation::{required, required_text, validate_email, validate_one_of, ValidationError};

pub(crate) static CHAT_USERS: ListSpec = ListSpec {
    table: Table::ChatUser,
    order_fields: &["created_at", "name"],
    filters: &[
        FilterSpec::new("email", "email", FilterKind::Equals),
        FilterSpec::new("query", "name", FilterKind::Contains),
    ],
};

pub(crate) static CHATS: ListSpec = ListSpec {
    table: Table::Chat,
    order_fields: &["created_at", "started_at", "status"],
    filters: &[
        FilterSpec::new("status", "status", FilterKind::Equals),
        FilterSpec::new("user_id", "user_id", FilterKind::Reference(Table::ChatUser)),
    ],
};

pub(crate) static MESSAGES: ListSpec = ListSpec {
    table: Table::Message,
    order_fields: &["created_at"],
    filters: &[
        FilterSpec::new("chat_id", "chat_id", FilterKind::Reference(Table::Chat)),
        FilterSpec::new("sender_id", "sender_id", FilterKind::Equals),
    ],
};

const CHAT_STATUSES: &[&str] = &["viewed", "active", "closed"];

/// The chat session carried by the request's cookies, if any.
pub(crate) fn session_from_headers(headers: &HeaderMap) -> Option<ChatSession> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(ChatSession::from_cookie_header)
}

/// Whether the caller may see `chat`: admins always, visitors only through
/// their own session cookie.
fn may_access(auth: &AuthContext, session: Option<&ChatSession>, chat: &RecordId) -> bool {
    auth.is_admin() || session.is_some_and(|session| session.chat_id == chat.key())
}

async fn require_chat(
    state: &AppState,
    raw: &str,
    context: &str,
) -> ApiResult<(RecordId, Document)> {
    require_record(state, Table::Chat, raw, context).await
}

#[derive(Deserialize)]
pub struct StartSessionRequest {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatUpdateRequest {
    pub status: Option<String>,
    pub admin_id: Option<String>,
}

/// POST /api/chat/session
///
/// Reuses the chat user registered under the same email, opens a new chat
/// and hands the session back as a cookie.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<StartSessionRequest>,
) -> ApiResult<Response> {
    const CONTEXT: &str = "Failed to start chat";

    let email = required("email", req.email.as_deref())?.trim();
    validate_email("email", email)?;
    let name = req.name.as_deref().map(str::trim).unwrap_or_default();

    let existing = state
        .store
        .list(
            &ListQuery::new(Table::ChatUser)
                .filter(Condition::equals("email", email))
                .order_by("created_at", SortDirection::Asc)
                .limit(1),
        )
        .await
        .or_fail(CONTEXT)?;

    let chat_user = match existing.into_iter().next() {
        Some(doc) => doc,
        None => {
            let id = RecordId::generate(Table::ChatUser);
            let doc = into_document(json!({ "email": email, "name": name }));
            state.store.create(&id, doc).await.or_fail(CONTEXT)?
        }
    };
    let chat_user_id = record_id_of(&chat_user, Table::ChatUser).or_fail(CONTEXT)?;

    let chat_id = RecordId::generate(Table::Chat);
    let chat = state
        .store
        .create(
            &chat_id,
            into_document(json!({
                "user_id": &chat_user_id,
                "status": ChatStatus::Viewed.as_str(),
                "started_at": now_timestamp(),
            })),
        )
        .await
        .or_fail(CONTEXT)?;

    let display_name = chat_user
        .get("name")
        .and_then(Value::as_str)
        .filter(|stored| !stored.is_empty())
        .unwrap_or(name);
    let session = ChatSession::new(&chat_user_id, &chat_id, email, display_name);
    let cookie = session.set_cookie_header().or_fail(CONTEXT)?;

    tracing::debug!(chat = %chat_id, chat_user = %chat_user_id, "chat session started");
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "chat_user": chat_user, "chat": chat })),
    )
        .into_response())
}

/// GET /api/chat/session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    const CONTEXT: &str = "Failed to fetch chat session";

    let session = session_from_headers(&headers).ok_or_else(ApiError::hidden)?;
    let (Ok(chat_user_id), Ok(chat_id)) = (session.chat_user_ref(), session.chat_ref()) else {
        return Err(ApiError::hidden());
    };
    let chat_user = state.store.select(&chat_user_id).await.or_fail(CONTEXT)?;
    let chat = state.store.select(&chat_id).await.or_fail(CONTEXT)?;
    match (chat_user, chat) {
        (Some(chat_user), Some(chat)) => Ok(Json(json!({ "chat_user": chat_user, "chat": chat }))),
        _ => Err(ApiError::hidden()),
    }
}

/// GET /api/chat/:chat_id/messages
///
/// Every message of the chat, oldest first.
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Vec<Document>>> {
    const CONTEXT: &str = "Failed to fetch messages";

    let (chat_id, _) = require_chat(&state, &chat_id, CONTEXT).await?;
    if !may_access(&auth, session_from_headers(&headers).as_ref(), &chat_id) {
        return Err(ApiError::hidden());
    }

    let query = ListQuery::new(Table::Message)
        .filter(Condition::equals("chat_id", &chat_id))
        .order_by("created_at", SortDirection::Asc);
    state.store.list(&query).await.or_fail(CONTEXT).map(Json)
}

/// POST /api/chat/:chat_id/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
    JsonBody(req): JsonBody<SendMessageRequest>,
) -> ApiResult<Response> {
    const CONTEXT: &str = "Failed to send message";

    let (chat_id, chat) = require_chat(&state, &chat_id, CONTEXT).await?;
    let session = session_from_headers(&headers);
    if !may_access(&auth, session.as_ref(), &chat_id) {
        return Err(ApiError::hidden());
    }
    let content = required_text("content", req.content.as_deref(), 1)?;
    if chat.get("status").and_then(Value::as_str) == Some(ChatStatus::Closed.as_str()) {
        return Err(ApiError::validation("chat_id", "This chat has been closed"));
    }

    let sender = match session.filter(|_| !auth.is_admin()) {
        Some(session) => visitor_sender(&session, &chat, req.sender_id.as_deref())?,
        None => req
            .sender_id
            .clone()
            .or_else(|| auth.subject.clone())
            .unwrap_or_else(|| "admin".to_string()),
    };

    let now = now_timestamp();
    let doc = into_document(json!({
        "chat_id": &chat_id,
        "sender_id": sender,
        "content": content,
        "sent_at": now,
    }));
    create_record(&state, Table::Message, doc, CONTEXT).await
}

/// A visitor always speaks as the chat's own user; a conflicting
/// `sender_id` is rejected.
fn visitor_sender(
    session: &ChatSession,
    chat: &Document,
    claimed: Option<&str>,
) -> Result<String, ValidationError> {
    let chat_user = session
        .chat_user_ref()
        .map_err(|_| ValidationError::custom("sender_id", "Invalid chat session"))?;
    let owner = chat.get("user_id").and_then(Value::as_str);
    let chat_user = chat_user.to_string();
    if owner != Some(chat_user.as_str()) {
        return Err(ValidationError::custom(
            "sender_id",
            "Sender is not a participant of this chat",
        ));
    }
    match claimed {
        Some(claimed) if claimed != chat_user && claimed != session.chat_user_id => {
            Err(ValidationError::custom(
                "sender_id",
                "Sender is not a participant of this chat",
            ))
        }
        _ => Ok(chat_user),
    }
}

fn record_id_of(doc: &Document, table: Table) -> bz_core::BzResult<RecordId> {
    let raw = doc
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| bz_core::BzError::Storage(format!("{table} record without id")))?;
    raw.parse()
}

// --- Admin ---

/// GET /api/admin/chats
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    require_admin(&auth)?;
    list_records(&state, &CHATS, &params, "Failed to fetch chats").await
}

/// GET /api/admin/chats/:id
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    require_admin(&auth)?;
    get_record(&state, Table::Chat, &id, "Failed to fetch chat").await
}

/// PUT /api/admin/chats/:id
///
/// Taking a chat (`active`) assigns it to the calling admin unless an
/// `admin_id` is given; closing it stamps `ended_at`.
pub async fn update_chat(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<ChatUpdateRequest>,
) -> ApiResult<Json<Document>> {
    require_admin(&auth)?;
    const CONTEXT: &str = "Failed to update chat";

    let (chat_id, _) = require_chat(&state, &id, CONTEXT).await?;
    let status = match req.status.as_deref() {
        Some(raw) => {
            validate_one_of("status", raw, CHAT_STATUSES)?;
            ChatStatus::parse(raw)
        }
        None => None,
    };

    // Admin ids are identity-provider subjects, not stored records.
    let admin_id = match (req.admin_id, status) {
        (Some(admin), _) => Some(Value::from(admin)),
        (None, Some(ChatStatus::Active)) => auth.subject.clone().map(Value::from),
        _ => None,
    };
    let ended_at = (status == Some(ChatStatus::Closed)).then(|| Value::from(now_timestamp()));

    patch_record(
        &state,
        &chat_id,
        vec![
            ("/status", status.map(|s| Value::from(s.as_str()))),
            ("/admin_id", admin_id),
            ("/ended_at", ended_at),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/admin/chats/:id
///
/// Removes the chat together with its messages.
pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_admin(&auth)?;
    const CONTEXT: &str = "Failed to delete chat";

    let (chat_id, _) = require_chat(&state, &id, CONTEXT).await?;
    let removed = state
        .store
        .delete_where(Table::Message, &[Condition::equals("chat_id", &chat_id)])
        .await
        .or_fail(CONTEXT)?;
    if state.store.delete(&chat_id).await.or_fail(CONTEXT)?.is_none() {
        return Err(not_found(Table::Chat.label(), &id));
    }
    tracing::debug!(chat = %chat_id, messages = removed, "chat deleted");
    Ok(deleted(Table::Chat.label()))
}
