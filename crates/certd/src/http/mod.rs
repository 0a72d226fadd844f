//! HTTP command API
//!
//! A thin adapter from JSON requests to the services; no business rules
//! live here. Every response uses the `{errCode, errMsg, ...}` envelope,
//! and any internal failure is a generic 500 with the structured cause in
//! the log.

mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::service::{AccountService, OrderService};

/// Shared state for the command handlers
pub struct AppState {
    pub accounts: Arc<AccountService>,
    pub orders: Arc<OrderService>,
}

/// Build the command-API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/account", post(handlers::create_account))
        .route(
            "/account/:uuid",
            get(handlers::get_account).delete(handlers::delete_account),
        )
        .route("/order", post(handlers::create_order))
        .route("/order/:uuid", get(handlers::get_order))
        .route("/orders", get(handlers::list_orders))
        .route(
            "/order/:uuid/authorizations",
            get(handlers::get_authorizations),
        )
        .route("/order/:uuid/challenge", get(handlers::run_challenge))
        .route("/order/:uuid/finalize", get(handlers::finalize_order))
        .route("/order/:uuid/certificate", get(handlers::get_certificate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
