//! Likes, comments and bookmarks: records that point at a post and a user.
//!
//! Likes and comments are also mirrored into the post's own `likes` /
//! `comments` arrays, so creating or deleting one touches two records.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use bz_core::{ArrayMatch, BzError, Document, FilterKind, FilterSpec, ListSpec, RecordId, Table};

use super::{
    create_record, delete_record, deleted, get_record, into_document, list_records, optional_ref,
    patch_record, require_record, require_ref, JsonBody,
};
use crate::auth::{require_writer, AuthContext};
use crate::error::{ApiError, ApiResult, OrFail};
use crate::state::AppState;
use crate::validation::{required, required_text};

const POST_USER_FILTERS: &[FilterSpec] = &[
    FilterSpec::new("post_ref", "post_ref", FilterKind::Reference(Table::BlogPost)),
    FilterSpec::new("user_ref", "user_ref", FilterKind::Reference(Table::User)),
];

pub(crate) static LIKES: ListSpec = ListSpec {
    table: Table::BlogLike,
    order_fields: &["created_at"],
    filters: POST_USER_FILTERS,
};

pub(crate) static COMMENTS: ListSpec = ListSpec {
    table: Table::BlogComment,
    order_fields: &["created_at"],
    filters: POST_USER_FILTERS,
};

pub(crate) static BOOKMARKS: ListSpec = ListSpec {
    table: Table::BlogBookmark,
    order_fields: &["created_at"],
    filters: POST_USER_FILTERS,
};

#[derive(Deserialize)]
pub struct PostUserRequest {
    pub user_ref: Option<String>,
    pub post_ref: Option<String>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub post_ref: Option<String>,
    pub user_ref: Option<String>,
    pub content: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CommentUpdate {
    pub content: Option<String>,
}

async fn post_and_user(
    state: &AppState,
    post_ref: Option<&str>,
    user_ref: Option<&str>,
    context: &str,
) -> ApiResult<(RecordId, RecordId)> {
    let user = required("user_ref", user_ref)?;
    let post = required("post_ref", post_ref)?;
    let user = require_ref(state, Table::User, user, "User", context).await?;
    let post = require_ref(state, Table::BlogPost, post, "Post", context).await?;
    Ok((post, user))
}

fn post_of(doc: &Document) -> Option<RecordId> {
    doc.get("post_ref")?.as_str()?.parse().ok()
}

/// Create `doc` in `table` and push its id onto the post's `field` array.
async fn create_attached(
    state: &AppState,
    table: Table,
    post: &RecordId,
    field: &str,
    doc: Document,
    context: &str,
) -> ApiResult<Response> {
    let id = RecordId::generate(table);
    let created = state.store.create(&id, doc).await.or_fail(context)?;
    let attached = state
        .store
        .array_append(post, field, Value::from(&id))
        .await
        .or_fail(context)?;
    if attached.is_none() {
        // The post was deleted after it was checked.
        state.store.delete(&id).await.or_fail(context)?;
        return Err(ApiError::from_store(BzError::NotFound(post.clone()), context));
    }
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// Delete a record and pull its id out of the owning post's `field` array.
async fn delete_attached(
    state: &AppState,
    table: Table,
    raw: &str,
    field: &str,
    context: &str,
) -> ApiResult<Json<Value>> {
    let (id, doc) = require_record(state, table, raw, context).await?;
    state.store.delete(&id).await.or_fail(context)?;
    if let Some(post) = post_of(&doc) {
        // The post may already be gone; nothing to detach then.
        state
            .store
            .array_remove(&post, field, &ArrayMatch::Value(Value::from(&id)))
            .await
            .or_fail(context)?;
    }
    Ok(deleted(table.label()))
}

// --- Likes ---

/// GET /api/blog/likes
pub async fn list_likes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &LIKES, &params, "Failed to fetch likes").await
}

/// POST /api/blog/likes
pub async fn create_like(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<PostUserRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create like";

    let (post, user) =
        post_and_user(&state, req.post_ref.as_deref(), req.user_ref.as_deref(), CONTEXT).await?;
    let doc = into_document(json!({ "user_ref": user, "post_ref": post }));
    create_attached(&state, Table::BlogLike, &post, "likes", doc, CONTEXT).await
}

/// GET /api/blog/likes/:id
pub async fn get_like(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::BlogLike, &id, "Failed to fetch like").await
}

/// DELETE /api/blog/likes/:id
pub async fn delete_like(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_attached(&state, Table::BlogLike, &id, "likes", "Failed to delete like").await
}

// --- Comments ---

/// GET /api/blog/comments
pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &COMMENTS, &params, "Failed to fetch comments").await
}

/// POST /api/blog/comments
pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<CommentRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create comment";

    let content = required_text("content", req.content.as_deref(), 1)?;
    let (post, user) =
        post_and_user(&state, req.post_ref.as_deref(), req.user_ref.as_deref(), CONTEXT).await?;
    let parent = optional_ref(
        &state,
        Table::BlogComment,
        req.parent_id.as_deref(),
        "Parent comment",
        CONTEXT,
    )
    .await?;

    let doc = into_document(json!({
        "post_ref": post,
        "user_ref": user,
        "content": content,
        "parent_id": parent,
    }));
    create_attached(&state, Table::BlogComment, &post, "comments", doc, CONTEXT).await
}

/// GET /api/blog/comments/:id
pub async fn get_comment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::BlogComment, &id, "Failed to fetch comment").await
}

/// PUT /api/blog/comments/:id
///
/// Only the text of a comment can change.
pub async fn update_comment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<CommentUpdate>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update comment";

    let (comment_id, _) = require_record(&state, Table::BlogComment, &id, CONTEXT).await?;
    let content = required_text("content", req.content.as_deref(), 1)?;

    patch_record(
        &state,
        &comment_id,
        vec![("/content", Some(Value::from(content)))],
        CONTEXT,
    )
    .await
}

/// DELETE /api/blog/comments/:id
pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_attached(
        &state,
        Table::BlogComment,
        &id,
        "comments",
        "Failed to delete comment",
    )
    .await
}

// --- Bookmarks ---

/// GET /api/blog/bookmarks
pub async fn list_bookmarks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &BOOKMARKS, &params, "Failed to fetch bookmarks").await
}

/// POST /api/blog/bookmarks
pub async fn create_bookmark(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<PostUserRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create bookmark";

    let (post, user) =
        post_and_user(&state, req.post_ref.as_deref(), req.user_ref.as_deref(), CONTEXT).await?;
    let doc = into_document(json!({ "user_ref": user, "post_ref": post }));
    create_record(&state, Table::BlogBookmark, doc, CONTEXT).await
}

/// GET /api/blog/bookmarks/:id
pub async fn get_bookmark(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::BlogBookmark, &id, "Failed to fetch bookmark").await
}

/// DELETE /api/blog/bookmarks/:id
pub async fn delete_bookmark(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::BlogBookmark, &id, "Failed to delete bookmark").await
}
