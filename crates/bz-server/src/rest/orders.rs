//! Orders and their line items (order details).

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
use crate::validation::{
    required, validate_at_least, validate_one_of, whole_number, ValidationError,
};

pub(crate) static ORDERS: ListSpec = ListSpec {
    table: Table::ShopOrder,
    order_fields: &["created_at", "total_amount"],
    filters: &[
        FilterSpec::new("user_id", "user_id", FilterKind::Reference(Table::User)),
        FilterSpec::new("status", "status", FilterKind::Equals),
    ],
};

pub(crate) static ORDER_DETAILS: ListSpec = ListSpec {
    table: Table::ShopOrderDetails,
    order_fields: &["created_at"],
    filters: &[
        FilterSpec::new("order_id", "order_id", FilterKind::Reference(Table::ShopOrder)),
        FilterSpec::new(
            "product_id",
            "product_id",
            FilterKind::Reference(Table::ShopProduct),
        ),
    ],
};

pub const ORDER_STATUSES: &[&str] = &["pending", "paid", "shipped", "delivered", "cancelled"];

#[derive(Deserialize)]
pub struct OrderRequest {
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "totalAmount")]
    pub total_amount: Option<f64>,
}

impl OrderRequest {
    fn validate_present(&self) -> Result<(), ValidationError> {
        if let Some(status) = &self.status {
            validate_one_of("status", status, ORDER_STATUSES)?;
        }
        if let Some(total) = self.total_amount {
            validate_at_least("total_amount", total, 0.0)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct OrderDetailRequest {
    #[serde(alias = "orderId")]
    pub order_id: Option<String>,
    #[serde(alias = "productId")]
    pub product_id: Option<String>,
    pub quantity: Option<f64>,
    #[serde(alias = "pricePerUnit")]
    pub price_per_unit: Option<f64>,
    #[serde(alias = "totalPrice")]
    pub total_price: Option<f64>,
    #[serde(alias = "appliedDiscount")]
    pub applied_discount: Option<String>,
}

impl OrderDetailRequest {
    fn validate_present(&self) -> Result<Option<i64>, ValidationError> {
        if let Some(price) = self.price_per_unit {
            validate_at_least("price_per_unit", price, 0.0)?;
        }
        if let Some(total) = self.total_price {
            validate_at_least("total_price", total, 0.0)?;
        }
        self.quantity
            .map(|quantity| whole_number("quantity", quantity, 1))
            .transpose()
    }
}

// --- Orders ---

/// GET /api/shop/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &ORDERS, &params, "Failed to fetch orders").await
}

/// POST /api/shop/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<OrderRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create order";

    let user = required("user_id", req.user_id.as_deref())?;
    let total = *required("total_amount", req.total_amount.as_ref())?;
    req.validate_present()?;
    let user = require_ref(&state, Table::User, user, "User", CONTEXT).await?;

    let doc = into_document(json!({
        "user_id": user,
        "status": req.status.as_deref().unwrap_or("pending"),
        "total_amount": total,
    }));
    create_record(&state, Table::ShopOrder, doc, CONTEXT).await
}

/// GET /api/shop/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::ShopOrder, &id, "Failed to fetch order").await
}

/// PUT /api/shop/orders/:id
pub async fn update_order(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<OrderRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update order";

    let (order_id, _) = require_record(&state, Table::ShopOrder, &id, CONTEXT).await?;
    req.validate_present()?;
    let user = optional_ref(&state, Table::User, req.user_id.as_deref(), "User", CONTEXT).await?;

    patch_record(
        &state,
        &order_id,
        vec![
            ("/user_id", user.map(Value::from)),
            ("/status", req.status.map(Value::from)),
            ("/total_amount", req.total_amount.map(Value::from)),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/shop/orders/:id
pub async fn delete_order(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::ShopOrder, &id, "Failed to delete order").await
}

// --- Order details ---

/// GET /api/shop/orderdetails
pub async fn list_order_details(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &ORDER_DETAILS, &params, "Failed to fetch order details").await
}

/// POST /api/shop/orderdetails
pub async fn create_order_detail(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<OrderDetailRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create order detail";

    let order = required("order_id", req.order_id.as_deref())?;
    let product = required("product_id", req.product_id.as_deref())?;
    required("quantity", req.quantity.as_ref())?;
    let price_per_unit = *required("price_per_unit", req.price_per_unit.as_ref())?;
    let total_price = *required("total_price", req.total_price.as_ref())?;
    let quantity = req.validate_present()?;

    let order = require_ref(&state, Table::ShopOrder, order, "Order", CONTEXT).await?;
    let product = require_ref(&state, Table::ShopProduct, product, "Product", CONTEXT).await?;
    let discount = optional_ref(
        &state,
        Table::ShopDiscount,
        req.applied_discount.as_deref(),
        "Discount",
        CONTEXT,
    )
    .await?;

    let doc = into_document(json!({
        "order_id": order,
        "product_id": product,
        "quantity": quantity,
        "price_per_unit": price_per_unit,
        "total_price": total_price,
        "applied_discount": discount,
    }));
    create_record(&state, Table::ShopOrderDetails, doc, CONTEXT).await
}

/// GET /api/shop/orderdetails/:id
pub async fn get_order_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::ShopOrderDetails, &id, "Failed to fetch order detail").await
}

/// PUT /api/shop/orderdetails/:id
pub async fn update_order_detail(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<OrderDetailRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update order detail";

    let (detail_id, _) = require_record(&state, Table::ShopOrderDetails, &id, CONTEXT).await?;
    let quantity = req.validate_present()?;
    let order =
        optional_ref(&state, Table::ShopOrder, req.order_id.as_deref(), "Order", CONTEXT).await?;
    let product = optional_ref(
        &state,
        Table::ShopProduct,
        req.product_id.as_deref(),
        "Product",
        CONTEXT,
    )
    .await?;
    let discount = optional_ref(
        &state,
        Table::ShopDiscount,
        req.applied_discount.as_deref(),
        "Discount",
        CONTEXT,
    )
    .await?;

    patch_record(
        &state,
        &detail_id,
        vec![
            ("/order_id", order.map(Value::from)),
            ("/product_id", product.map(Value::from)),
            ("/quantity", quantity.map(Value::from)),
            ("/price_per_unit", req.price_per_unit.map(Value::from)),
            ("/total_price", req.total_price.map(Value::from)),
            ("/applied_discount", discount.map(Value::from)),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/shop/orderdetails/:id
pub async fn delete_order_detail(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::ShopOrderDetails, &id, "Failed to delete order detail").await
}
