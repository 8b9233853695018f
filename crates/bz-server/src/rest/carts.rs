use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use bz_core::{ArrayMatch, Document, FilterKind, FilterSpec, ListSpec, Table};

use super::{
    create_record, delete_record, get_record, into_document, list_records, optional_ref,
    patch_record, require_record, require_ref, JsonBody,
};
use crate::auth::{require_writer, AuthContext};
use crate::error::{ApiResult, OrFail};
use crate::state::AppState;
use crate::validation::{required, whole_number};

pub(crate) static CARTS: ListSpec = ListSpec {
    table: Table::ShopCart,
    order_fields: &["created_at"],
    filters: &[FilterSpec::new(
        "user_id",
        "user_id",
        FilterKind::Reference(Table::User),
    )],
};

#[derive(Deserialize)]
pub struct CartItemRequest {
    #[serde(alias = "productId")]
    pub product_id: Option<String>,
    pub quantity: Option<f64>,
}

#[derive(Deserialize)]
pub struct CartRequest {
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    pub items: Option<Vec<CartItemRequest>>,
}

/// Check every line item and turn it into its stored shape.
async fn resolve_items(
    state: &AppState,
    items: &[CartItemRequest],
    context: &str,
) -> ApiResult<Value> {
    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
        let product = required("items.product_id", item.product_id.as_deref())?;
        let quantity = *required("items.quantity", item.quantity.as_ref())?;
        let quantity = whole_number("items.quantity", quantity, 1)?;
        let product = require_ref(state, Table::ShopProduct, product, "Product", context).await?;
        resolved.push(json!({ "product_id": product, "quantity": quantity }));
    }
    Ok(Value::Array(resolved))
}

/// GET /api/shop/carts
pub async fn list_carts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &CARTS, &params, "Failed to fetch carts").await
}

/// POST /api/shop/carts
pub async fn create_cart(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<CartRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create cart";

    let user = required("user_id", req.user_id.as_deref())?;
    let user = require_ref(&state, Table::User, user, "User", CONTEXT).await?;
    let items = resolve_items(&state, req.items.as_deref().unwrap_or_default(), CONTEXT).await?;

    let doc = into_document(json!({ "user_id": user, "items": items }));
    create_record(&state, Table::ShopCart, doc, CONTEXT).await
}

/// GET /api/shop/carts/:id
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::ShopCart, &id, "Failed to fetch cart").await
}

/// PUT /api/shop/carts/:id
///
/// `items`, when sent, replaces the whole item list.
pub async fn update_cart(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<CartRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update cart";

    let (cart_id, _) = require_record(&state, Table::ShopCart, &id, CONTEXT).await?;
    let user = optional_ref(&state, Table::User, req.user_id.as_deref(), "User", CONTEXT).await?;
    let items = match &req.items {
        Some(items) => Some(resolve_items(&state, items, CONTEXT).await?),
        None => None,
    };

    patch_record(
        &state,
        &cart_id,
        vec![("/user_id", user.map(Value::from)), ("/items", items)],
        CONTEXT,
    )
    .await
}

/// DELETE /api/shop/carts/:id
pub async fn delete_cart(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::ShopCart, &id, "Failed to delete cart").await
}

/// DELETE /api/shop/carts/:id/items/:item_id
///
/// `item_id` is the product key; every line for that product is dropped.
pub async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to remove item from cart";

    let (cart_id, _) = require_record(&state, Table::ShopCart, &id, CONTEXT).await?;
    let product = require_ref(&state, Table::ShopProduct, &item_id, "Product", CONTEXT).await?;

    let matcher = ArrayMatch::Field {
        name: "product_id".into(),
        value: Value::from(product),
    };
    state
        .store
        .array_remove(&cart_id, "items", &matcher)
        .await
        .or_fail(CONTEXT)?;
    Ok(Json(
        json!({ "message": "Item removed from cart successfully." }),
    ))
}
