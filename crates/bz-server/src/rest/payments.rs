use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use chrono::{SecondsFormat, Utc};
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
use crate::validation::{
    optional_text, parse_datetime, required, required_text, validate_one_of, validate_positive,
    ValidationError,
};

pub(crate) static PAYMENTS: ListSpec = ListSpec {
    table: Table::ShopPayment,
    order_fields: &["created_at", "payment_date", "amount"],
    filters: &[
        FilterSpec::new("order_id", "order_id", FilterKind::Reference(Table::ShopOrder)),
        FilterSpec::new("payment_method", "payment_method", FilterKind::Equals),
    ],
};

const PAYMENT_METHODS: &[&str] = &["card", "paypal", "bank_transfer", "cash"];

#[derive(Deserialize)]
pub struct PaymentRequest {
    #[serde(alias = "orderId")]
    pub order_id: Option<String>,
    #[serde(alias = "productId")]
    pub product_id: Option<Vec<String>>,
    #[serde(alias = "paymentDate")]
    pub payment_date: Option<String>,
    #[serde(alias = "paymentMethod")]
    pub payment_method: Option<String>,
    pub amount: Option<f64>,
    #[serde(alias = "transactionId")]
    pub transaction_id: Option<String>,
    pub metadata: Option<Value>,
}

impl PaymentRequest {
    /// Returns the payment date normalized to UTC when one was sent.
    fn validate_present(&self) -> Result<Option<String>, ValidationError> {
        if let Some(method) = &self.payment_method {
            validate_one_of("payment_method", method, PAYMENT_METHODS)?;
        }
        if let Some(amount) = self.amount {
            validate_positive("amount", amount)?;
        }
        optional_text("transaction_id", self.transaction_id.as_deref(), 1)?;
        if self.metadata.as_ref().is_some_and(|m| !m.is_object()) {
            return Err(ValidationError::custom(
                "metadata",
                "metadata must be an object",
            ));
        }
        self.payment_date
            .as_deref()
            .map(|raw| {
                parse_datetime("payment_date", raw).map(|date| {
                    date.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::Millis, true)
                })
            })
            .transpose()
    }
}

/// GET /api/shop/payments
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &PAYMENTS, &params, "Failed to fetch payments").await
}

/// POST /api/shop/payments
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<PaymentRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create payment";

    let order = required("order_id", req.order_id.as_deref())?;
    let product_ids = required("product_id", req.product_id.as_deref())?;
    required("payment_date", req.payment_date.as_deref())?;
    let method = required("payment_method", req.payment_method.as_deref())?;
    let amount = *required("amount", req.amount.as_ref())?;
    let transaction_id = required_text("transaction_id", req.transaction_id.as_deref(), 1)?;
    let payment_date = req.validate_present()?;

    let order = require_ref(&state, Table::ShopOrder, order, "Order", CONTEXT).await?;
    let products = require_refs(&state, Table::ShopProduct, product_ids, "Product", CONTEXT).await?;

    let doc = into_document(json!({
        "order_id": order,
        "product_id": refs_value(&products),
        "payment_date": payment_date,
        "payment_method": method,
        "amount": amount,
        "transaction_id": transaction_id,
        "metadata": req.metadata,
    }));
    create_record(&state, Table::ShopPayment, doc, CONTEXT).await
}

/// GET /api/shop/payments/:id
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::ShopPayment, &id, "Failed to fetch payment").await
}

/// PUT /api/shop/payments/:id
pub async fn update_payment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<PaymentRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update payment";

    let (payment_id, _) = require_record(&state, Table::ShopPayment, &id, CONTEXT).await?;
    let payment_date = req.validate_present()?;
    let order =
        optional_ref(&state, Table::ShopOrder, req.order_id.as_deref(), "Order", CONTEXT).await?;
    let products =
        optional_refs(&state, Table::ShopProduct, &req.product_id, "Product", CONTEXT).await?;

    patch_record(
        &state,
        &payment_id,
        vec![
            ("/order_id", order.map(Value::from)),
            ("/product_id", products),
            ("/payment_date", payment_date.map(Value::from)),
            ("/payment_method", req.payment_method.map(Value::from)),
            ("/amount", req.amount.map(Value::from)),
            ("/transaction_id", req.transaction_id.map(Value::from)),
            ("/metadata", req.metadata),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/shop/payments/:id
pub async fn delete_payment(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::ShopPayment, &id, "Failed to delete payment").await
}
