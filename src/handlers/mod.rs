mod cart;
mod checkout;
mod notify;
mod payment;

pub use cart::*;
pub use checkout::*;
pub use notify::*;
pub use payment::*;

use axum::{
    Json, Router,
    middleware::from_fn,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::middleware::session_middleware;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Routes used by the buyer's browser. Every request carries a session.
fn browser_router() -> Router<AppState> {
    Router::new()
        .route("/cart", get(view_cart))
        .route("/cart/add", post(add_to_cart))
        .route("/cart/update", post(update_cart))
        .route("/cart/clear", post(clear_cart))
        .route("/checkout", post(submit_checkout))
        .route("/checkout/resume", get(resume_checkout))
        .route("/payment/callback/{provider}", get(payment_callback))
        .route("/payment/success", get(payment_success))
        .route("/payment/failed", get(payment_failed))
        .route("/payment/pending", get(payment_pending))
        .route("/payment/unknown", get(payment_unknown))
        .route("/orders/{order_number}", get(get_order))
        .layer(from_fn(session_middleware))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Provider-authenticated, no browser session
        .route("/payment/notify/{provider}", post(handle_notification))
        .merge(browser_router())
}
