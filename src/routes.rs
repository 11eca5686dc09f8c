use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use crate::error::AppResult;
use crate::extractor::AuthUser;
use crate::valves::ValveService;

/// key: valves-api
/// Configuration endpoints. Every route expects an `Extension<Arc<ValveService>>`.
pub fn api_routes() -> Router {
    Router::new()
        .route("/api/v1/tools/id/:id/valves", get(get_valves))
        .route("/api/v1/tools/id/:id/valves/spec", get(get_valves_spec))
        .route("/api/v1/tools/id/:id/valves/update", post(update_valves))
        .route("/api/v1/tools/id/:id/valves/user", get(get_user_valves))
        .route(
            "/api/v1/tools/id/:id/valves/user/update",
            post(update_user_valves),
        )
        .route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_valves(
    Extension(service): Extension<Arc<ValveService>>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.read_valves(&id, &user_id).await?))
}

async fn get_valves_spec(
    Extension(service): Extension<Arc<ValveService>>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.read_valves_spec(&id, &user_id).await?))
}

async fn update_valves(
    Extension(service): Extension<Arc<ValveService>>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.update_valves(&id, &user_id, payload).await?))
}

async fn get_user_valves(
    Extension(service): Extension<Arc<ValveService>>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    Ok(Json(service.read_user_valves(&id, &user_id).await?))
}

async fn update_user_valves(
    Extension(service): Extension<Arc<ValveService>>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    Ok(Json(
        service.update_user_valves(&id, &user_id, payload).await?,
    ))
}
