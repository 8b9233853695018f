use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use bz_core::{Document, FilterKind, FilterSpec, ListSpec, Table};

use super::{
    create_record, delete_record, get_record, into_document, list_records, optional_refs,
    patch_record, refs_value, require_record, require_refs, JsonBody,
};
use crate::auth::{require_writer, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;
use crate::validation::{
    optional_text, parse_datetime, required, required_text, validate_between, whole_number,
    ValidationError,
};

pub(crate) static DISCOUNTS: ListSpec = ListSpec {
    table: Table::ShopDiscount,
    order_fields: &["created_at", "start_date", "end_date"],
    filters: &[
        FilterSpec::new("query", "name", FilterKind::Contains),
        FilterSpec::new("discount_code", "discount_code", FilterKind::Equals),
    ],
};

#[derive(Deserialize)]
pub struct DiscountRequest {
    #[serde(alias = "productId")]
    pub product_id: Option<Vec<String>>,
    pub name: Option<String>,
    #[serde(alias = "usageLimit")]
    pub usage_limit: Option<f64>,
    #[serde(alias = "discountCode")]
    pub discount_code: Option<String>,
    #[serde(alias = "discountPercentage")]
    pub discount_percentage: Option<f64>,
    #[serde(alias = "startDate")]
    pub start_date: Option<String>,
    #[serde(alias = "endDate")]
    pub end_date: Option<String>,
}

/// Validated scalar fields of a discount body; `None` where the field was
/// not sent.
struct DiscountFields {
    usage_limit: Option<i64>,
    start: Option<DateTime<FixedOffset>>,
    end: Option<DateTime<FixedOffset>>,
}

impl DiscountRequest {
    fn validate_present(&self) -> Result<DiscountFields, ValidationError> {
        optional_text("name", self.name.as_deref(), 1)?;
        optional_text("discount_code", self.discount_code.as_deref(), 1)?;
        if let Some(percentage) = self.discount_percentage {
            if percentage <= 0.0 {
                return Err(ValidationError::custom(
                    "discount_percentage",
                    "discount_percentage must be greater than 0",
                ));
            }
            validate_between("discount_percentage", percentage, 0.0, 100.0)?;
        }
        let usage_limit = self
            .usage_limit
            .map(|limit| whole_number("usage_limit", limit, 1))
            .transpose()?;
        let start = self
            .start_date
            .as_deref()
            .map(|raw| parse_datetime("start_date", raw))
            .transpose()?;
        let end = self
            .end_date
            .as_deref()
            .map(|raw| parse_datetime("end_date", raw))
            .transpose()?;
        Ok(DiscountFields {
            usage_limit,
            start,
            end,
        })
    }
}

fn check_window(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
) -> Result<(), ValidationError> {
    if end > start {
        Ok(())
    } else {
        Err(ValidationError::custom(
            "end_date",
            "end_date must be after start_date",
        ))
    }
}

/// Stored form of a date: UTC, millisecond precision, so string order is
/// chronological order.
fn stored_date(value: DateTime<FixedOffset>) -> String {
    value
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn stored_date_of(doc: &Document, field: &str) -> Option<DateTime<FixedOffset>> {
    doc.get(field)?
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
}

/// GET /api/shop/discounts
pub async fn list_discounts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &DISCOUNTS, &params, "Failed to fetch discounts").await
}

/// POST /api/shop/discounts
pub async fn create_discount(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<DiscountRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create discount";

    let product_ids = required("product_id", req.product_id.as_deref())?;
    let name = required_text("name", req.name.as_deref(), 1)?;
    required("usage_limit", req.usage_limit.as_ref())?;
    let code = required_text("discount_code", req.discount_code.as_deref(), 1)?;
    let percentage = *required("discount_percentage", req.discount_percentage.as_ref())?;
    let fields = req.validate_present()?;
    let start = *required("start_date", fields.start.as_ref())?;
    let end = *required("end_date", fields.end.as_ref())?;
    check_window(start, end)?;

    let products = require_refs(&state, Table::ShopProduct, product_ids, "Product", CONTEXT).await?;

    let doc = into_document(json!({
        "product_id": refs_value(&products),
        "name": name,
        "usage_limit": fields.usage_limit,
        "discount_code": code,
        "discount_percentage": percentage,
        "start_date": stored_date(start),
        "end_date": stored_date(end),
    }));
    create_record(&state, Table::ShopDiscount, doc, CONTEXT).await
}

/// GET /api/shop/discounts/:id
pub async fn get_discount(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::ShopDiscount, &id, "Failed to fetch discount").await
}

/// PUT /api/shop/discounts/:id
///
/// When only one end of the validity window changes it is checked against
/// the stored other end.
pub async fn update_discount(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<DiscountRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update discount";

    let (discount_id, existing) =
        require_record(&state, Table::ShopDiscount, &id, CONTEXT).await?;
    let fields = req.validate_present()?;
    if fields.start.is_some() || fields.end.is_some() {
        let start = fields.start.or_else(|| stored_date_of(&existing, "start_date"));
        let end = fields.end.or_else(|| stored_date_of(&existing, "end_date"));
        if let (Some(start), Some(end)) = (start, end) {
            check_window(start, end)?;
        }
    }
    let products =
        optional_refs(&state, Table::ShopProduct, &req.product_id, "Product", CONTEXT).await?;

    patch_record(
        &state,
        &discount_id,
        vec![
            ("/product_id", products),
            ("/name", req.name.map(Value::from)),
            ("/usage_limit", fields.usage_limit.map(Value::from)),
            ("/discount_code", req.discount_code.map(Value::from)),
            ("/discount_percentage", req.discount_percentage.map(Value::from)),
            ("/start_date", fields.start.map(|d| Value::from(stored_date(d)))),
            ("/end_date", fields.end.map(|d| Value::from(stored_date(d)))),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/shop/discounts/:id
pub async fn delete_discount(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::ShopDiscount, &id, "Failed to delete discount").await
}
