use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};

use bz_core::chat::ChatStatus;
use bz_core::{Condition, ListQuery, SortDirection, Table};

use crate::auth::{require_admin, AuthContext};
use crate::error::{ApiResult, OrFail};
use crate::state::AppState;

const RECENT_PAYMENTS: usize = 5;

/// GET /api/admin/dashboard
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Value>> {
    require_admin(&auth)?;
    const CONTEXT: &str = "Failed to fetch dashboard";
    let store = &state.store;

    let posts = store.count(Table::BlogPost, &[]).await.or_fail(CONTEXT)?;
    let products = store.count(Table::ShopProduct, &[]).await.or_fail(CONTEXT)?;
    let orders = store.count(Table::ShopOrder, &[]).await.or_fail(CONTEXT)?;
    let users = store.count(Table::User, &[]).await.or_fail(CONTEXT)?;

    // Chats without a status count as open.
    let chats = store.count(Table::Chat, &[]).await.or_fail(CONTEXT)?;
    let closed = store
        .count(
            Table::Chat,
            &[Condition::equals("status", ChatStatus::Closed.as_str())],
        )
        .await
        .or_fail(CONTEXT)?;

    let revenue = store
        .sum(Table::ShopPayment, "amount", &[])
        .await
        .or_fail(CONTEXT)?;
    let recent_payments = store
        .list(
            &ListQuery::new(Table::ShopPayment)
                .order_by("created_at", SortDirection::Desc)
                .limit(RECENT_PAYMENTS),
        )
        .await
        .or_fail(CONTEXT)?;

    Ok(Json(json!({
        "posts": posts,
        "products": products,
        "orders": orders,
        "users": users,
        "open_chats": chats.saturating_sub(closed),
        "total_revenue": revenue,
        "recent_payments": recent_payments,
    })))
}
