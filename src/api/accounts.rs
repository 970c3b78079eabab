//! Registration, login and access-check endpoints
use crate::{
    access::RolePermissionView,
    api::middleware::{Anonymous, AuthContext},
    auth::Session,
    context::AppContext,
    db::models::{AccountId, PracticeId},
    error::{AdminError, AdminResult},
    registration::{PersonWithAccount, RegistrationRequest},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build account routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/v1/register", post(register))
        .route("/api/v1/login", post(login))
        .route("/api/v1/access", get(check_access))
        .route("/api/v1/accounts/:id/permissions", get(account_permissions))
        .route("/api/v1/practices/:id/access", get(practice_access))
}

/// Register with a registration key
async fn register(
    State(ctx): State<AppContext>,
    anon: Anonymous,
    Json(req): Json<RegistrationRequest>,
) -> AdminResult<(StatusCode, Json<PersonWithAccount>)> {
    let registered = ctx.registration.register(&anon.request, req).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    login: String,
    password: String,
}

/// Exchange login and password for a session token
async fn login(
    State(ctx): State<AppContext>,
    anon: Anonymous,
    Json(req): Json<LoginRequest>,
) -> AdminResult<Json<Session>> {
    let session = ctx.auth.login(&anon.request, &req.login, &req.password).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct AccessQuery {
    object: String,
    action: String,
}

#[derive(Debug, Serialize)]
struct AccessResponse {
    object: String,
    action: String,
    allowed: bool,
}

/// Whether the caller may perform `action` on `object`
async fn check_access(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<AccessQuery>,
) -> AdminResult<Json<AccessResponse>> {
    let allowed = ctx
        .access
        .has_access(
            &auth.request,
            auth.principal.account_id,
            &query.object,
            &query.action,
        )
        .await?;

    Ok(Json(AccessResponse {
        object: query.object,
        action: query.action,
        allowed,
    }))
}

/// Role and permissions of an account. Callers may read their own; reading
/// others requires `permissions`/`read`.
async fn account_permissions(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> AdminResult<Json<RolePermissionView>> {
    let account_id = AccountId(id);
    if account_id != auth.principal.account_id {
        auth.require(&ctx, "permissions", "read").await?;
    }

    let view = ctx
        .access
        .permissions_by_account_id(&auth.request, account_id)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
struct PracticeAccessResponse {
    practice_id: PracticeId,
    allowed: bool,
}

/// Whether the caller's group is targeted by a practice
async fn practice_access(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> AdminResult<Json<PracticeAccessResponse>> {
    if id <= 0 {
        return Err(AdminError::InvalidArgument(format!("Invalid practice id {}", id)));
    }

    let practice_id = PracticeId(id);
    let allowed = ctx
        .practices
        .issued_group_match(&auth.request, auth.principal.account_id, practice_id)
        .await?;

    Ok(Json(PracticeAccessResponse {
        practice_id,
        allowed,
    }))
}
