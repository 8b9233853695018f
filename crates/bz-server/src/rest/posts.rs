use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use bz_core::{Document, FilterKind, FilterSpec, ListSpec, Table};

use super::{
    create_record, delete_record, get_record, into_document, list_records, optional_ref,
    optional_refs, patch_record, refs_value, require_record, require_ref, require_refs, JsonBody,
};
use crate::auth::{require_writer, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;
use crate::validation::{optional_text, required, required_text};

pub(crate) static POSTS: ListSpec = ListSpec {
    table: Table::BlogPost,
    order_fields: &["created_at", "title", "slug"],
    filters: &[
        FilterSpec::new("title", "title", FilterKind::Contains),
        FilterSpec::new("author", "author", FilterKind::Reference(Table::User)),
        FilterSpec::new("category", "categories", FilterKind::ReferenceIn(Table::BlogCategory)),
        FilterSpec::new("tag", "tags", FilterKind::ReferenceIn(Table::BlogTag)),
    ],
};

const MIN_TITLE: usize = 3;
const MIN_CONTENT: usize = 50;
const MIN_SLUG: usize = 3;

#[derive(Deserialize)]
pub struct PostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub slug: Option<String>,
    pub author: Option<String>,
    pub categories: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub likes: Option<Vec<String>>,
    pub comments: Option<Vec<String>>,
}

/// GET /api/blog/posts
pub async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &POSTS, &params, "Failed to fetch posts").await
}

/// POST /api/blog/posts
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<PostRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create post";

    let title = required_text("title", req.title.as_deref(), MIN_TITLE)?;
    let content = required_text("content", req.content.as_deref(), MIN_CONTENT)?;
    let slug = required_text("slug", req.slug.as_deref(), MIN_SLUG)?;
    let author = required("author", req.author.as_deref())?;

    let author = require_ref(&state, Table::User, author, "Author", CONTEXT).await?;
    let categories = require_refs(
        &state,
        Table::BlogCategory,
        req.categories.as_deref().unwrap_or_default(),
        "Category",
        CONTEXT,
    )
    .await?;
    let tags = require_refs(
        &state,
        Table::BlogTag,
        req.tags.as_deref().unwrap_or_default(),
        "Tag",
        CONTEXT,
    )
    .await?;

    let doc = into_document(json!({
        "title": title,
        "content": content,
        "slug": slug,
        "author": author,
        "categories": refs_value(&categories),
        "tags": refs_value(&tags),
        "likes": [],
        "comments": [],
    }));
    create_record(&state, Table::BlogPost, doc, CONTEXT).await
}

/// GET /api/blog/posts/:id
pub async fn get_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::BlogPost, &id, "Failed to fetch post").await
}

/// PUT /api/blog/posts/:id
pub async fn update_post(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<PostRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update post";

    let (post_id, _) = require_record(&state, Table::BlogPost, &id, CONTEXT).await?;
    optional_text("title", req.title.as_deref(), MIN_TITLE)?;
    optional_text("content", req.content.as_deref(), MIN_CONTENT)?;
    optional_text("slug", req.slug.as_deref(), MIN_SLUG)?;

    let author =
        optional_ref(&state, Table::User, req.author.as_deref(), "Author", CONTEXT).await?;
    let categories =
        optional_refs(&state, Table::BlogCategory, &req.categories, "Category", CONTEXT).await?;
    let tags = optional_refs(&state, Table::BlogTag, &req.tags, "Tag", CONTEXT).await?;
    let likes = optional_refs(&state, Table::BlogLike, &req.likes, "Like", CONTEXT).await?;
    let comments =
        optional_refs(&state, Table::BlogComment, &req.comments, "Comment", CONTEXT).await?;

    patch_record(
        &state,
        &post_id,
        vec![
            ("/title", req.title.map(Value::from)),
            ("/content", req.content.map(Value::from)),
            ("/slug", req.slug.map(Value::from)),
            ("/author", author.map(Value::from)),
            ("/categories", categories),
            ("/tags", tags),
            ("/likes", likes),
            ("/comments", comments),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/blog/posts/:id
pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::BlogPost, &id, "Failed to delete post").await
}
