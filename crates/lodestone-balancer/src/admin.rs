//! Admin API over the balancer's management entry points.
//!
//! HTTP bindings are glue; the operations themselves live on
//! [`LoadBalancer`]. Routes:
//!
//! - `GET  /api/v1/backends` — list backends with status
//! - `POST /api/v1/backends` — add a backend by URL
//! - `PUT  /api/v1/backends/{id}` — update a backend's weight
//! - `DELETE /api/v1/backends/{id}` — remove a backend
//! - `GET  /api/v1/config` — current configuration record
//! - `POST /api/v1/config` — replace the backend list

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use lodestone_common::config::Config;

use crate::balancer::{BackendStatus, LoadBalancer};

#[derive(Debug, Deserialize)]
pub struct AddBackendRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBackendRequest {
    pub weight: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApplyConfigRequest {
    pub backends: Vec<String>,
}

/// Builds the admin router.
pub fn admin_router(balancer: Arc<LoadBalancer>) -> Router {
    Router::new()
        .route("/api/v1/backends", get(list_backends).post(add_backend))
        .route(
            "/api/v1/backends/{id}",
            axum::routing::put(update_backend).delete(remove_backend),
        )
        .route("/api/v1/config", get(get_config).post(apply_config))
        .layer(CorsLayer::permissive())
        .with_state(balancer)
}

async fn list_backends(State(balancer): State<Arc<LoadBalancer>>) -> Json<Vec<BackendStatus>> {
    Json(balancer.backends_snapshot())
}

async fn add_backend(
    State(balancer): State<Arc<LoadBalancer>>,
    Json(request): Json<AddBackendRequest>,
) -> impl IntoResponse {
    match balancer.add_backend(&request.url).await {
        Ok(()) => (StatusCode::CREATED, String::new()).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn update_backend(
    State(balancer): State<Arc<LoadBalancer>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateBackendRequest>,
) -> StatusCode {
    if balancer.update_backend_weight(&id, request.weight).await {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn remove_backend(
    State(balancer): State<Arc<LoadBalancer>>,
    Path(id): Path<String>,
) -> StatusCode {
    if balancer.remove_backend(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn get_config(State(balancer): State<Arc<LoadBalancer>>) -> Json<Config> {
    Json(balancer.config().clone())
}

async fn apply_config(
    State(balancer): State<Arc<LoadBalancer>>,
    Json(request): Json<ApplyConfigRequest>,
) -> impl IntoResponse {
    match balancer.apply_backends(&request.backends).await {
        Ok(()) => (StatusCode::OK, String::new()).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}
