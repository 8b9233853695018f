use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::FromRequest,
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use bz_core::*;

use crate::auth::auth_middleware;
use crate::error::{ApiError, ApiResult, OrFail};
use crate::state::AppState;

#[path = "rest/posts.rs"]
mod posts;
#[path = "rest/taxonomy.rs"]
mod taxonomy;
#[path = "rest/engagement.rs"]
mod engagement;
#[path = "rest/media.rs"]
mod media;
#[path = "rest/catalog.rs"]
mod catalog;
#[path = "rest/discounts.rs"]
mod discounts;
#[path = "rest/carts.rs"]
mod carts;
#[path = "rest/orders.rs"]
mod orders;
#[path = "rest/payments.rs"]
mod payments;
#[path = "rest/reviews.rs"]
mod reviews;
#[path = "rest/users.rs"]
mod users;
#[path = "rest/chat.rs"]
pub(crate) mod chat;
#[path = "rest/dashboard.rs"]
mod dashboard;

pub fn create_router(state: Arc<AppState>) -> Router {
    create_router_with_cors(state, &[])
}

pub fn create_router_with_cors(state: Arc<AppState>, cors_allowed_origins: &[String]) -> Router {
    let router = Router::new()
        .route("/api/health", get(health))
        // --- Blog ---
        .route(
            "/api/blog/posts",
            get(posts::list_posts).post(posts::create_post),
        )
        .route(
            "/api/blog/posts/:id",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
        .route(
            "/api/blog/categories",
            get(taxonomy::list_categories).post(taxonomy::create_category),
        )
        .route(
            "/api/blog/categories/:id",
            get(taxonomy::get_category)
                .put(taxonomy::update_category)
                .delete(taxonomy::delete_category),
        )
        .route(
            "/api/blog/tags",
            get(taxonomy::list_tags).post(taxonomy::create_tag),
        )
        .route(
            "/api/blog/tags/:id",
            get(taxonomy::get_tag)
                .put(taxonomy::update_tag)
                .delete(taxonomy::delete_tag),
        )
        .route(
            "/api/blog/likes",
            get(engagement::list_likes).post(engagement::create_like),
        )
        .route(
            "/api/blog/likes/:id",
            get(engagement::get_like).delete(engagement::delete_like),
        )
        .route(
            "/api/blog/comments",
            get(engagement::list_comments).post(engagement::create_comment),
        )
        .route(
            "/api/blog/comments/:id",
            get(engagement::get_comment)
                .put(engagement::update_comment)
                .delete(engagement::delete_comment),
        )
        .route(
            "/api/blog/bookmarks",
            get(engagement::list_bookmarks).post(engagement::create_bookmark),
        )
        .route(
            "/api/blog/bookmarks/:id",
            get(engagement::get_bookmark).delete(engagement::delete_bookmark),
        )
        .route(
            "/api/blog/media",
            get(media::list_media).post(media::create_media),
        )
        .route(
            "/api/blog/media/:id",
            get(media::get_media)
                .put(media::update_media)
                .delete(media::delete_media),
        )
        // --- Shop ---
        .route(
            "/api/shop/categories",
            get(catalog::list_categories).post(catalog::create_category),
        )
        .route(
            "/api/shop/categories/:id",
            get(catalog::get_category)
                .put(catalog::update_category)
                .delete(catalog::delete_category),
        )
        .route(
            "/api/shop/products",
            get(catalog::list_products).post(catalog::create_product),
        )
        .route(
            "/api/shop/products/:id",
            get(catalog::get_product)
                .put(catalog::update_product)
                .delete(catalog::delete_product),
        )
        .route(
            "/api/shop/discounts",
            get(discounts::list_discounts).post(discounts::create_discount),
        )
        .route(
            "/api/shop/discounts/:id",
            get(discounts::get_discount)
                .put(discounts::update_discount)
                .delete(discounts::delete_discount),
        )
        .route(
            "/api/shop/carts",
            get(carts::list_carts).post(carts::create_cart),
        )
        .route(
            "/api/shop/carts/:id",
            get(carts::get_cart)
                .put(carts::update_cart)
                .delete(carts::delete_cart),
        )
        .route(
            "/api/shop/carts/:id/items/:item_id",
            delete(carts::remove_cart_item),
        )
        .route(
            "/api/shop/orders",
            get(orders::list_orders).post(orders::create_order),
        )
        .route(
            "/api/shop/orders/:id",
            get(orders::get_order)
                .put(orders::update_order)
                .delete(orders::delete_order),
        )
        .route(
            "/api/shop/orderdetails",
            get(orders::list_order_details).post(orders::create_order_detail),
        )
        .route(
            "/api/shop/orderdetails/:id",
            get(orders::get_order_detail)
                .put(orders::update_order_detail)
                .delete(orders::delete_order_detail),
        )
        .route(
            "/api/shop/payments",
            get(payments::list_payments).post(payments::create_payment),
        )
        .route(
            "/api/shop/payments/:id",
            get(payments::get_payment)
                .put(payments::update_payment)
                .delete(payments::delete_payment),
        )
        .route(
            "/api/shop/reviews",
            get(reviews::list_reviews).post(reviews::create_review),
        )
        .route(
            "/api/shop/reviews/:id",
            get(reviews::get_review).delete(reviews::delete_review),
        )
        // --- Users ---
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        // --- Chat ---
        .route(
            "/api/chat/session",
            get(chat::get_session).post(chat::start_session),
        )
        .route(
            "/api/chat/:chat_id/messages",
            get(chat::list_messages).post(chat::send_message),
        )
        // --- Admin ---
        .route("/api/admin/chats", get(chat::list_chats))
        .route(
            "/api/admin/chats/:id",
            get(chat::get_chat)
                .put(chat::update_chat)
                .delete(chat::delete_chat),
        )
        .route("/api/admin/dashboard", get(dashboard::dashboard))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_allowed_origins.is_empty() {
        router
    } else {
        router.layer(build_cors_layer(cors_allowed_origins))
    }
}

fn build_cors_layer(cors_allowed_origins: &[String]) -> CorsLayer {
    let mut parsed = Vec::new();
    for origin in cors_allowed_origins {
        match HeaderValue::from_str(origin) {
            Ok(value) => parsed.push(value),
            Err(err) => tracing::warn!("ignoring invalid CORS origin '{origin}': {err}"),
        }
    }

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
        .allow_origin(parsed)
}

/// The list filters a table understands, shared by REST lists and live
/// subscriptions.
pub(crate) fn list_spec_for(table: Table) -> &'static ListSpec {
    match table {
        Table::User => &users::USERS,
        Table::BlogPost => &posts::POSTS,
        Table::BlogCategory => &taxonomy::CATEGORIES,
        Table::BlogTag => &taxonomy::TAGS,
        Table::BlogLike => &engagement::LIKES,
        Table::BlogComment => &engagement::COMMENTS,
        Table::BlogBookmark => &engagement::BOOKMARKS,
        Table::BlogMedia => &media::MEDIA,
        Table::ShopCategory => &catalog::CATEGORIES,
        Table::ShopProduct => &catalog::PRODUCTS,
        Table::ShopDiscount => &discounts::DISCOUNTS,
        Table::ShopCart => &carts::CARTS,
        Table::ShopOrder => &orders::ORDERS,
        Table::ShopOrderDetails => &orders::ORDER_DETAILS,
        Table::ShopPayment => &payments::PAYMENTS,
        Table::ShopReview => &reviews::REVIEWS,
        Table::ChatUser => &chat::CHAT_USERS,
        Table::Chat => &chat::CHATS,
        Table::Message => &chat::MESSAGES,
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// --- Shared handler plumbing ---

/// `Json` whose rejections use the validation error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub(crate) struct JsonBody<T>(pub T);

/// Turn a `json!` object into a document, dropping null (absent) fields.
pub(crate) fn into_document(value: Value) -> Document {
    match value {
        Value::Object(mut map) => {
            map.retain(|_, v| !v.is_null());
            map
        }
        _ => Document::new(),
    }
}

pub(crate) fn refs_value(ids: &[RecordId]) -> Value {
    Value::Array(ids.iter().map(Value::from).collect())
}

pub(crate) fn not_found(label: &str, raw: &str) -> ApiError {
    ApiError::NotFound(format!("{label} with ID {raw} not found."))
}

pub(crate) fn deleted(label: &str) -> Json<Value> {
    Json(json!({ "message": format!("{label} deleted successfully.") }))
}

/// Load the record a path parameter names, or 404.
pub(crate) async fn require_record(
    state: &AppState,
    table: Table,
    raw: &str,
    context: &str,
) -> ApiResult<(RecordId, Document)> {
    let id = RecordId::parse_key(table, raw).map_err(|_| not_found(table.label(), raw))?;
    match state.store.select(&id).await.or_fail(context)? {
        Some(doc) => Ok((id, doc)),
        None => Err(not_found(table.label(), raw)),
    }
}

/// Resolve a referenced key into a record reference, or 404 if it does not exist.
pub(crate) async fn require_ref(
    state: &AppState,
    table: Table,
    raw: &str,
    label: &str,
    context: &str,
) -> ApiResult<RecordId> {
    let id = RecordId::parse_key(table, raw).map_err(|_| not_found(label, raw))?;
    if state.store.exists(&id).await.or_fail(context)? {
        Ok(id)
    } else {
        Err(not_found(label, raw))
    }
}

pub(crate) async fn optional_ref(
    state: &AppState,
    table: Table,
    raw: Option<&str>,
    label: &str,
    context: &str,
) -> ApiResult<Option<RecordId>> {
    match raw {
        Some(raw) => require_ref(state, table, raw, label, context).await.map(Some),
        None => Ok(None),
    }
}

pub(crate) async fn require_refs(
    state: &AppState,
    table: Table,
    raws: &[String],
    label: &str,
    context: &str,
) -> ApiResult<Vec<RecordId>> {
    let mut ids = Vec::with_capacity(raws.len());
    for raw in raws {
        ids.push(require_ref(state, table, raw, label, context).await?);
    }
    Ok(ids)
}

/// Like [`require_refs`] for update bodies, where the list may be absent.
pub(crate) async fn optional_refs(
    state: &AppState,
    table: Table,
    raws: &Option<Vec<String>>,
    label: &str,
    context: &str,
) -> ApiResult<Option<Value>> {
    match raws {
        Some(raws) => {
            let ids = require_refs(state, table, raws, label, context).await?;
            Ok(Some(refs_value(&ids)))
        }
        None => Ok(None),
    }
}

pub(crate) async fn list_records(
    state: &AppState,
    spec: &ListSpec,
    params: &HashMap<String, String>,
    context: &str,
) -> ApiResult<Json<Vec<Document>>> {
    let query = ListQuery::from_params(spec, params).or_fail(context)?;
    state.store.list(&query).await.or_fail(context).map(Json)
}

pub(crate) async fn get_record(
    state: &AppState,
    table: Table,
    raw: &str,
    context: &str,
) -> ApiResult<Json<Document>> {
    let (_, doc) = require_record(state, table, raw, context).await?;
    Ok(Json(doc))
}

pub(crate) async fn create_record(
    state: &AppState,
    table: Table,
    doc: Document,
    context: &str,
) -> ApiResult<Response> {
    let id = RecordId::generate(table);
    let created = state.store.create(&id, doc).await.or_fail(context)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// Replace every present field and stamp `updated_at`.
pub(crate) async fn patch_record(
    state: &AppState,
    id: &RecordId,
    fields: Vec<(&str, Option<Value>)>,
    context: &str,
) -> ApiResult<Json<Document>> {
    let ops = prepare_updates(fields);
    state.store.patch(id, &ops).await.or_fail(context).map(Json)
}

pub(crate) async fn delete_record(
    state: &AppState,
    table: Table,
    raw: &str,
    context: &str,
) -> ApiResult<Json<Value>> {
    let (id, _) = require_record(state, table, raw, context).await?;
    state.store.delete(&id).await.or_fail(context)?;
    Ok(deleted(table.label()))
}
