//! Registration key management endpoints
use crate::{
    api::middleware::AuthContext,
    context::AppContext,
    db::models::{KeyId, RoleId},
    error::AdminResult,
    keys::{InvalidatedKey, KeyWithRole, ListParams},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build key routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/v1/keys", post(create_key).get(list_keys))
        .route("/api/v1/keys/:id", get(get_key))
        .route("/api/v1/keys/:id/invalidate", post(invalidate_key))
}

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    role_id: i64,
    max_usages: i32,
    #[serde(default)]
    group_name: String,
}

/// Issue a registration key
async fn create_key(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<CreateKeyRequest>,
) -> AdminResult<(StatusCode, Json<KeyWithRole>)> {
    auth.require(&ctx, "keys", "create").await?;

    let key = ctx
        .keys
        .new_key(&auth.request, RoleId(req.role_id), req.max_usages, &req.group_name)
        .await?;

    Ok((StatusCode::CREATED, Json(key)))
}

#[derive(Debug, Serialize)]
struct ListKeysResponse {
    keys: Vec<KeyWithRole>,
}

/// List keys, one page at a time
async fn list_keys(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
) -> AdminResult<Json<ListKeysResponse>> {
    auth.require(&ctx, "keys", "read").await?;

    let keys = ctx.keys.keys_by_params(&auth.request, params).await?;
    Ok(Json(ListKeysResponse { keys }))
}

/// Get one key with its role
async fn get_key(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> AdminResult<Json<KeyWithRole>> {
    auth.require(&ctx, "keys", "read").await?;

    let key = ctx.keys.key_by_id(&auth.request, KeyId(id)).await?;
    Ok(Json(key))
}

/// Invalidate a key
async fn invalidate_key(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> AdminResult<Json<InvalidatedKey>> {
    auth.require(&ctx, "keys", "update").await?;

    let key = ctx.keys.invalidate_key(&auth.request, KeyId(id)).await?;
    Ok(Json(key))
}
