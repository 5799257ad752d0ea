use axum::{Json, extract::State};
use serde::Serialize;

use crate::app::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct HealthReport {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bulk_mode: Option<bool>,
}

/// 上流が落ちていても組み込みトピックで応答できるため、プロセスが動いていれば ready。
pub(crate) async fn ready(State(state): State<AppState>) -> Json<HealthReport> {
    state.telemetry().record_ready_probe();
    Json(HealthReport {
        status: "ready",
        bulk_mode: Some(state.bulk().is_active()),
    })
}

pub(crate) async fn live(State(state): State<AppState>) -> Json<HealthReport> {
    state.telemetry().record_live_probe();
    Json(HealthReport {
        status: "live",
        bulk_mode: None,
    })
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use crate::app::{build_router, test_support::failing_registry};

    #[tokio::test]
    async fn probes_answer_ok() {
        let app = build_router(failing_registry());

        for uri in ["/health/live", "/health/ready"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).expect("request builds"))
                .await
                .expect("request succeeds");
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn metrics_are_exported() {
        let app = build_router(failing_registry());
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("request builds"))
            .await
            .expect("request succeeds");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(text.contains("topic_trend_refreshes_total"));
    }
}
