//! Shop categories and products.

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
    create_record, delete_record, get_record, into_document, list_records, optional_refs,
    patch_record, refs_value, require_record, require_refs, JsonBody,
};
use crate::auth::{require_writer, AuthContext};
use crate::error::ApiResult;
use crate::state::AppState;
use crate::validation::{
    optional_text, required, required_text, validate_at_least, validate_one_of, validate_url,
    whole_number, ValidationError,
};

pub(crate) static CATEGORIES: ListSpec = ListSpec {
    table: Table::ShopCategory,
    order_fields: &["created_at", "name"],
    filters: &[
        FilterSpec::new("query", "name", FilterKind::Contains),
        FilterSpec::new("slug", "slug", FilterKind::Equals),
    ],
};

pub(crate) static PRODUCTS: ListSpec = ListSpec {
    table: Table::ShopProduct,
    order_fields: &["created_at", "price", "name"],
    filters: &[
        FilterSpec::new("query", "name", FilterKind::Contains),
        FilterSpec::new(
            "category",
            "category_id",
            FilterKind::ReferenceIn(Table::ShopCategory),
        ),
        FilterSpec::new("slug", "slug", FilterKind::Equals),
        FilterSpec::new("product_type", "product_type", FilterKind::Equals),
        FilterSpec::new("price", "price", FilterKind::Number),
    ],
};

const PRODUCT_TYPES: &[&str] = &["physical", "digital"];

#[derive(Deserialize)]
pub struct CategoryRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct ProductRequest {
    #[serde(alias = "categoryId")]
    pub category_id: Option<Vec<String>>,
    #[serde(alias = "productType")]
    pub product_type: Option<String>,
    #[serde(alias = "isActive")]
    pub is_active: Option<bool>,
    pub slug: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<f64>,
    #[serde(alias = "coverImage")]
    pub cover_image: Option<String>,
    pub files: Option<Vec<String>>,
    pub metadata: Option<Value>,
}

impl ProductRequest {
    /// Checks that apply to whichever fields are present. Returns the
    /// normalized stock count.
    fn validate_present(&self) -> Result<Option<i64>, ValidationError> {
        optional_text("slug", self.slug.as_deref(), 1)?;
        optional_text("name", self.name.as_deref(), 1)?;
        if let Some(kind) = &self.product_type {
            validate_one_of("product_type", kind, PRODUCT_TYPES)?;
        }
        if let Some(price) = self.price {
            validate_at_least("price", price, 0.0)?;
        }
        if let Some(cover) = &self.cover_image {
            validate_url("cover_image", cover)?;
        }
        if let Some(metadata) = &self.metadata {
            if !metadata.is_object() {
                return Err(ValidationError::custom(
                    "metadata",
                    "metadata must be an object",
                ));
            }
        }
        self.stock
            .map(|stock| whole_number("stock", stock, 0))
            .transpose()
    }
}

// --- Categories ---

/// GET /api/shop/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &CATEGORIES, &params, "Failed to fetch categories").await
}

/// POST /api/shop/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<CategoryRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    let name = required_text("name", req.name.as_deref(), 2)?;
    let slug = required_text("slug", req.slug.as_deref(), 2)?;

    let doc = into_document(json!({
        "name": name,
        "slug": slug,
        "description": req.description,
    }));
    create_record(&state, Table::ShopCategory, doc, "Failed to create category").await
}

/// GET /api/shop/categories/:id
pub async fn get_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::ShopCategory, &id, "Failed to fetch category").await
}

/// PUT /api/shop/categories/:id
pub async fn update_category(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<CategoryRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update category";

    let (category_id, _) = require_record(&state, Table::ShopCategory, &id, CONTEXT).await?;
    optional_text("name", req.name.as_deref(), 2)?;
    optional_text("slug", req.slug.as_deref(), 2)?;

    patch_record(
        &state,
        &category_id,
        vec![
            ("/name", req.name.map(Value::from)),
            ("/slug", req.slug.map(Value::from)),
            ("/description", req.description.map(Value::from)),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/shop/categories/:id
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::ShopCategory, &id, "Failed to delete category").await
}

// --- Products ---

/// GET /api/shop/products
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &PRODUCTS, &params, "Failed to fetch products").await
}

/// POST /api/shop/products
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<ProductRequest>,
) -> ApiResult<Response> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to create product";

    let category_ids = required("category_id", req.category_id.as_deref())?;
    let product_type = required("product_type", req.product_type.as_deref())?;
    let slug = required("slug", req.slug.as_deref())?;
    let name = required("name", req.name.as_deref())?;
    let description = required("description", req.description.as_deref())?;
    let price = *required("price", req.price.as_ref())?;
    required("stock", req.stock.as_ref())?;
    let stock = req.validate_present()?;

    let categories =
        require_refs(&state, Table::ShopCategory, category_ids, "Category", CONTEXT).await?;

    let doc = into_document(json!({
        "category_id": refs_value(&categories),
        "product_type": product_type,
        "is_active": req.is_active.unwrap_or(true),
        "slug": slug,
        "name": name,
        "description": description,
        "price": price,
        "stock": stock,
        "cover_image": req.cover_image,
        "files": req.files.unwrap_or_default(),
        "metadata": req.metadata,
    }));
    create_record(&state, Table::ShopProduct, doc, CONTEXT).await
}

/// GET /api/shop/products/:id
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::ShopProduct, &id, "Failed to fetch product").await
}

/// PUT /api/shop/products/:id
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<ProductRequest>,
) -> ApiResult<Json<Document>> {
    require_writer(&auth)?;
    const CONTEXT: &str = "Failed to update product";

    let (product_id, _) = require_record(&state, Table::ShopProduct, &id, CONTEXT).await?;
    let stock = req.validate_present()?;
    let categories =
        optional_refs(&state, Table::ShopCategory, &req.category_id, "Category", CONTEXT).await?;

    patch_record(
        &state,
        &product_id,
        vec![
            ("/category_id", categories),
            ("/product_type", req.product_type.map(Value::from)),
            ("/is_active", req.is_active.map(Value::from)),
            ("/slug", req.slug.map(Value::from)),
            ("/name", req.name.map(Value::from)),
            ("/description", req.description.map(Value::from)),
            ("/price", req.price.map(Value::from)),
            ("/stock", stock.map(Value::from)),
            ("/cover_image", req.cover_image.map(Value::from)),
            ("/files", req.files.map(Value::from)),
            ("/metadata", req.metadata),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/shop/products/:id
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_writer(&auth)?;
    delete_record(&state, Table::ShopProduct, &id, "Failed to delete product").await
}
