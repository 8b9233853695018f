//! Site users. Anyone may read them; only admins may change them.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use bz_core::{Condition, Document, FilterKind, FilterSpec, ListQuery, ListSpec, RecordId, Table};

use super::{
    create_record, delete_record, get_record, into_document, list_records, patch_record,
    require_record, JsonBody,
};
use crate::auth::{require_admin, AuthContext};
use crate::error::{ApiError, ApiResult, OrFail};
use crate::state::AppState;
use crate::validation::{optional_text, required, required_text, validate_email, validate_one_of};

pub(crate) static USERS: ListSpec = ListSpec {
    table: Table::User,
    order_fields: &["created_at", "name", "email"],
    filters: &[
        FilterSpec::new("email", "email", FilterKind::Equals),
        FilterSpec::new("query", "name", FilterKind::Contains),
    ],
};

const USER_ROLES: &[&str] = &["user", "admin"];

#[derive(Deserialize)]
pub struct UserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "clerkId")]
    pub clerk_id: Option<String>,
    pub role: Option<String>,
}

/// 400 when another user already has `email`.
async fn ensure_email_free(
    state: &AppState,
    email: &str,
    except: Option<&RecordId>,
    context: &str,
) -> ApiResult<()> {
    let query = ListQuery::new(Table::User)
        .filter(Condition::equals("email", email))
        .limit(2);
    let holders = state.store.list(&query).await.or_fail(context)?;
    let except = except.map(RecordId::to_string);
    let taken = holders.iter().any(|doc| {
        doc.get("id").and_then(Value::as_str) != except.as_deref()
    });
    if taken {
        Err(ApiError::validation("email", "Email is already in use"))
    } else {
        Ok(())
    }
}

/// GET /api/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<Document>>> {
    list_records(&state, &USERS, &params, "Failed to fetch users").await
}

/// POST /api/users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<UserRequest>,
) -> ApiResult<Response> {
    require_admin(&auth)?;
    const CONTEXT: &str = "Failed to create user";

    let name = required_text("name", req.name.as_deref(), 1)?;
    let email = required("email", req.email.as_deref())?;
    validate_email("email", email)?;
    let role = req.role.as_deref().unwrap_or("user");
    validate_one_of("role", role, USER_ROLES)?;
    ensure_email_free(&state, email, None, CONTEXT).await?;

    let doc = into_document(json!({
        "name": name,
        "email": email,
        "clerk_id": req.clerk_id,
        "role": role,
    }));
    create_record(&state, Table::User, doc, CONTEXT).await
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    get_record(&state, Table::User, &id, "Failed to fetch user").await
}

/// PUT /api/users/:id
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UserRequest>,
) -> ApiResult<Json<Document>> {
    require_admin(&auth)?;
    const CONTEXT: &str = "Failed to update user";

    let (user_id, _) = require_record(&state, Table::User, &id, CONTEXT).await?;
    optional_text("name", req.name.as_deref(), 1)?;
    if let Some(role) = &req.role {
        validate_one_of("role", role, USER_ROLES)?;
    }
    if let Some(email) = &req.email {
        validate_email("email", email)?;
        ensure_email_free(&state, email, Some(&user_id), CONTEXT).await?;
    }

    patch_record(
        &state,
        &user_id,
        vec![
            ("/name", req.name.map(Value::from)),
            ("/email", req.email.map(Value::from)),
            ("/clerk_id", req.clerk_id.map(Value::from)),
            ("/role", req.role.map(Value::from)),
        ],
        CONTEXT,
    )
    .await
}

/// DELETE /api/users/:id
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_admin(&auth)?;
    delete_record(&state, Table::User, &id, "Failed to delete user").await
}
