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
    patch_record, require_record, JsonBody,
};
use crate::auth::{require_writer, AuthContext};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::validation::{optional_text, required_text};

pub(crate) static CATEGORIES: ListSpec = ListSpec {
    table: Table::BlogCategory,
    order_fields: &["created_at", "slug"],
    filters: &[
        FilterSpec::new("title", "title", FilterKind::Contains),
        FilterSpec::new("slug", "slug", FilterKind::Equals),
    ],
};

pub(crate) static TAGS: ListSpec = ListSpec {
    table: Table::BlogTag,
    order_fields: &["created_at", "name"],
    filters: &[
        FilterSpec::new("name", "name", FilterKind::Contains),
        FilterSpec::new("slug", "slug", FilterKind::Equals),
    ],
};

#[derive(Deserialize)]
pub struct CategoryRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Deserialize)]
pub struct TagRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
}

// --- Categories ---

/// GET /api/blog/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &CATEGORIES, &params, "Failed to fetch categories").await
}

/// POST /api/blog/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<CategoryRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create category";

    let title = required_text("title", req.title.as_deref(), 3)?;
    let description = required_text("description", req.description.as_deref(), 10)?;
    let slug = required_text("slug", req.slug.as_deref(), 3)?;
    let parent = optional_ref(
        &state,
        Table::BlogCategory,
        req.parent_id.as_deref(),
        "Parent category",
        CONTEXT,
    )
    .await?;

    let doc = into_document(json!({
        "title": title,
        "description": description,
        "slug": slug,
        "parent_id": parent,
    }));
    create_record(&state, Table::BlogCategory, doc, CONTEXT).await
}

/// GET /api/blog/categories/:id
pub async fn get_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::BlogCategory, &id, "Failed to fetch category").await
}

/// PUT /api/blog/categories/:id
pub async fn update_category(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<CategoryRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update category";

    let (category_id, _) = require_record(&state, Table::BlogCategory, &id, CONTEXT).await?;
    optional_text("title", req.title.as_deref(), 3)?;
    optional_text("description", req.description.as_deref(), 10)?;
    optional_text("slug", req.slug.as_deref(), 3)?;

    let parent = optional_ref(
        &state,
        Table::BlogCategory,
        req.parent_id.as_deref(),
        "Parent category",
        CONTEXT,
    )
    .await?;
    if parent.as_ref() == Some(&category_id) {
        return Err(ApiError::validation(
            "parent_id",
            "A category cannot be its own parent",
        ));
    }

    patch_record(
        &state,
        &category_id,
        vec![
            ("/title", req.title.map(Value::from)),
            ("/description", req.description.map(Value::from)),
            ("/slug", req.slug.map(Value::from)),
            ("/parent_id", parent.map(Value::from)),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/blog/categories/:id
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::BlogCategory, &id, "Failed to delete category").await
}

// --- Tags ---

/// GET /api/blog/tags
pub async fn list_tags(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &TAGS, &params, "Failed to fetch tags").await
}

/// POST /api/blog/tags
pub async fn create_tag(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<TagRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    let name = required_text("name", req.name.as_deref(), 1)?;
    let slug = required_text("slug", req.slug.as_deref(), 1)?;

    let doc = into_document(json!({ "name": name, "slug": slug }));
    create_record(&state, Table::BlogTag, doc, "Failed to create tag").await
}

/// GET /api/blog/tags/:id
pub async fn get_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::BlogTag, &id, "Failed to fetch tag").await
}

/// PUT /api/blog/tags/:id
pub async fn update_tag(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<TagRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update tag";

    let (tag_id, _) = require_record(&state, Table::BlogTag, &id, CONTEXT).await?;
    optional_text("name", req.name.as_deref(), 1)?;
    optional_text("slug", req.slug.as_deref(), 1)?;

    patch_record(
        &state,
        &tag_id,
        vec![
            ("/name", req.name.map(Value::from)),
            ("/slug", req.slug.map(Value::from)),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/blog/tags/:id
pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::BlogTag, &id, "Failed to delete tag").await
}
