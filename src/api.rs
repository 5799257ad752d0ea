pub(crate) mod admin;
pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod topics;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/v1/topics/select", post(topics::select))
        .route(
            "/admin/bulk-mode",
            get(admin::bulk_mode).put(admin::set_bulk_mode),
        )
        .route("/admin/diversity/stats", get(admin::diversity_stats))
        .route("/admin/diversity/cleanup", post(admin::cleanup))
        .route("/admin/diversity/clear", post(admin::clear))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
