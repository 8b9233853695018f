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
    patch_record, require_record, require_ref, JsonBody,
};
use crate::auth::{require_writer, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;
use crate::validation::{required, validate_one_of, validate_url, ValidationError};

pub(crate) static MEDIA: ListSpec = ListSpec {
    table: Table::BlogMedia,
    order_fields: &["created_at"],
    filters: &[
        FilterSpec::new("post_ref", "post_ref", FilterKind::Reference(Table::BlogPost)),
        FilterSpec::new("media_type", "media_type", FilterKind::Equals),
    ],
};

const MEDIA_TYPES: &[&str] = &["image", "video", "audio", "document"];

#[derive(Deserialize)]
pub struct MediaRequest {
    pub post_ref: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

impl MediaRequest {
    fn validate_present(&self) -> Result<(), ValidationError> {
        if let Some(url) = &self.media_url {
            validate_url("media_url", url)?;
        }
        if let Some(kind) = &self.media_type {
            validate_one_of("media_type", kind, MEDIA_TYPES)?;
        }
        Ok(())
    }
}

/// GET /api/blog/media
pub async fn list_media(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &MEDIA, &params, "Failed to fetch media").await
}

/// POST /api/blog/media
pub async fn create_media(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<MediaRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create media";

    let post = required("post_ref", req.post_ref.as_deref())?;
    let media_url = required("media_url", req.media_url.as_deref())?;
    let media_type = required("media_type", req.media_type.as_deref())?;
    req.validate_present()?;

    let post = require_ref(&state, Table::BlogPost, post, "Post", CONTEXT).await?;
    let doc = into_document(json!({
        "post_ref": post,
        "media_url": media_url,
        "media_type": media_type,
    }));
    create_record(&state, Table::BlogMedia, doc, CONTEXT).await
}

/// GET /api/blog/media/:id
pub async fn get_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::BlogMedia, &id, "Failed to fetch media").await
}

/// PUT /api/blog/media/:id
pub async fn update_media(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<MediaRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update media";

    let (media_id, _) = require_record(&state, Table::BlogMedia, &id, CONTEXT).await?;
    req.validate_present()?;
    let post =
        optional_ref(&state, Table::BlogPost, req.post_ref.as_deref(), "Post", CONTEXT).await?;

    patch_record(
        &state,
        &media_id,
        vec![
            ("/post_ref", post.map(Value::from)),
            ("/media_url", req.media_url.map(Value::from)),
            ("/media_type", req.media_type.map(Value::from)),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/blog/media/:id
pub async fn delete_media(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::BlogMedia, &id, "Failed to delete media").await
}
