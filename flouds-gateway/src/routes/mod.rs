//! Versioned HTTP routes
//!
//! Health endpoints live at the root; everything else is nested under
//! `/api/v1` behind the auth, rate-limit, and validation middleware.

pub mod admin;
pub mod config;
pub mod health;
pub mod users;
pub mod vector_store;

use crate::middleware;
use crate::service_method::error_response;
use crate::state::AppState;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::Router;
use flouds_core::error::GatewayError;
use tower_http::limit::RequestBodyLimitLayer;

/// Build the full gateway router
#[must_use]
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/metrics", get(admin::metrics))
        .route("/admin/fingerprints", get(admin::fingerprints))
        .route(
            "/vector_store/set_vector_store",
            post(vector_store::set_vector_store),
        )
        .route(
            "/vector_store/generate_schema",
            post(vector_store::generate_schema),
        )
        .route("/vector_store/insert", post(vector_store::insert))
        .route("/vector_store/search", post(vector_store::search))
        .route("/vector_store/flush", post(vector_store::flush))
        .route("/vector_store_users/set_user", post(users::set_user))
        .route(
            "/vector_store_users/reset_password",
            post(users::reset_password),
        )
        .route("/config/add", post(config::add))
        .route("/config/get", get(config::get))
        .route("/config/list", get(config::list))
        .route("/config/update", put(config::update))
        .route("/config/delete", delete(config::delete))
        // Layering is inside-out: the last layer added runs first
        .layer(from_fn(middleware::track_metrics))
        .layer(from_fn(middleware::request_logging))
        .layer(from_fn_with_state(state.clone(), middleware::validate_request))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/health/connections", get(health::connections))
        .nest("/api/v1", api)
        .fallback(not_found)
        .layer(RequestBodyLimitLayer::new(
            state.config.security.max_request_bytes,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::trusted_host))
        .layer(from_fn_with_state(state.clone(), middleware::cors))
        .with_state(state)
}

async fn not_found() -> Response {
    error_response(&GatewayError::operation("no such endpoint"))
}
