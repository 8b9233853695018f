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
    create_record, delete_record, get_record, into_document, list_records, require_ref, JsonBody,
};
use crate::auth::{require_writer, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;
use crate::validation::{required, validate_between, validate_text, whole_number};

pub(crate) static REVIEWS: ListSpec = ListSpec {
    table: Table::ShopReview,
    order_fields: &["created_at", "rating"],
    filters: &[
        FilterSpec::new(
            "product_id",
            "product_id",
            FilterKind::Reference(Table::ShopProduct),
        ),
        FilterSpec::new("user_id", "user_id", FilterKind::Reference(Table::User)),
        FilterSpec::new("rating", "rating", FilterKind::Number),
    ],
};

#[derive(Deserialize)]
pub struct ReviewRequest {
    #[serde(alias = "productId")]
    pub product_id: Option<String>,
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    pub rating: Option<f64>,
    pub comment: Option<String>,
}

/// GET /api/shop/reviews
pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &REVIEWS, &params, "Failed to fetch reviews").await
}

/// POST /api/shop/reviews
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<ReviewRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create review";

    let product = required("product_id", req.product_id.as_deref())?;
    let user = required("user_id", req.user_id.as_deref())?;
    let rating = *required("rating", req.rating.as_ref())?;
    validate_between("rating", rating, 1.0, 5.0)?;
    let rating = whole_number("rating", rating, 1)?;
    if let Some(comment) = &req.comment {
        validate_text("comment", comment, 0)?;
    }

    let product = require_ref(&state, Table::ShopProduct, product, "Product", CONTEXT).await?;
    let user = require_ref(&state, Table::User, user, "User", CONTEXT).await?;

    let doc = into_document(json!({
        "product_id": product,
        "user_id": user,
        "rating": rating,
        "comment": req.comment,
    }));
    create_record(&state, Table::ShopReview, doc, CONTEXT).await
}

/// GET /api/shop/reviews/:id
pub async fn get_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::ShopReview, &id, "Failed to fetch review").await
}

/// DELETE /api/shop/reviews/:id
pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::ShopReview, &id, "Failed to delete review").await
}
