use axum::{Json, extract::State};

use crate::app::AppState;
use crate::selection::{Selection, SelectionRequest};

pub(crate) async fn select(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> Json<Selection> {
    Json(state.selector().select_topic(&request).await)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::app::{build_router, test_support};
    use crate::topic::{Audience, Tone, TrendBatch, test_topic};

    fn post(body: &str) -> Request<Body> {
        Request::post("/v1/topics/select")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    #[tokio::test]
    async fn select_returns_fresh_topic() {
        let batch = TrendBatch {
            current_trends: vec![
                test_topic(
                    "chess",
                    "Chess club tournament results",
                    Audience::High,
                    Tone::Casual,
                ),
                test_topic(
                    "robot",
                    "Robot building contest entries",
                    Audience::High,
                    Tone::Excited,
                ),
                test_topic(
                    "garden",
                    "Garden harvest festival plans",
                    Audience::Middle,
                    Tone::Casual,
                ),
            ],
            ..TrendBatch::default()
        };
        let app = build_router(test_support::registry_with(batch));

        let response = app
            .oneshot(post(r#"{"audience":"high","context":"free"}"#))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(payload["tier"], "fresh");
        assert_eq!(payload["pool_size"], 3);
        assert_eq!(payload["bulk_mode"], false);
        assert!(payload["topic"]["text"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[tokio::test]
    async fn select_defaults_context_and_falls_back() {
        let app = build_router(test_support::failing_registry());

        let response = app
            .oneshot(post(r#"{"audience":"elementary"}"#))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let payload: Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(payload["tier"], "static_fallback");
        assert_eq!(payload["topic"]["audience"], "elementary");
    }

    #[tokio::test]
    async fn select_rejects_unknown_audience() {
        let app = build_router(test_support::failing_registry());
        let response = app
            .oneshot(post(r#"{"audience":"university"}"#))
            .await
            .expect("request succeeds");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
