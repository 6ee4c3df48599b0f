use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{convert::Infallible, sync::Arc};
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    error::AppError,
    models::{GenerateRequest, OptimizeRequest, OutwardEvent},
    relay::RelayOrchestrator,
};

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayOrchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/generate-stream", post(generate_stream))
        .route("/api/generate-rendered", post(generate_rendered))
        .route("/api/optimize", post(optimize))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// Pass-through: the model's JSON text, fragment by fragment.
pub async fn generate_stream(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let request = serde_json::from_slice::<GenerateRequest>(&body)?.validate()?;
    Ok(event_stream(state.relay.stream_raw(&request)))
}

// Full pipeline: rendered HTML fragments.
pub async fn generate_rendered(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let request = serde_json::from_slice::<GenerateRequest>(&body)?.validate()?;
    Ok(event_stream(state.relay.stream_rendered(&request)))
}

/// Content optimisation is not implemented yet; non-empty input is echoed back.
pub async fn optimize(body: Bytes) -> Response {
    let body = match serde_json::from_slice::<OptimizeRequest>(&body) {
        Ok(body) => body,
        Err(e) => return optimize_rejected(format!("invalid JSON body: {e}")),
    };
    if body.markdown.trim().is_empty() {
        return optimize_rejected("markdown must not be empty".into());
    }
    tracing::info!("🛠️ Optimize request ({:?}, {} chars)", body.optimization, body.markdown.chars().count());
    Json(json!({ "success": true, "markdown": body.markdown })).into_response()
}

fn optimize_rejected(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "message": message }))).into_response()
}

fn event_stream<S>(events: S) -> Response
where
    S: Stream<Item = OutwardEvent> + Send + 'static,
{
    let body = Body::from_stream(events.map(|event| Ok::<_, Infallible>(event.encode())));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::testing::{client, ScriptedTransport};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn app(transport: &Arc<ScriptedTransport>) -> Router {
        router(AppState { relay: Arc::new(RelayOrchestrator::new(client(transport))) })
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn generate_stream_relays_fragments_as_sse() {
        let transport = Arc::new(ScriptedTransport::fragments(&["A", "B"]));
        let (status, content_type, body) =
            post_json(app(&transport), "/api/generate-stream", json!({"theme": "t", "content": "c"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/event-stream"));
        assert_eq!(body, "data: {\"content\":\"A\"}\n\ndata: {\"content\":\"B\"}\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn generate_rendered_sends_html_fragments() {
        let transport = Arc::new(ScriptedTransport::fragments(&[r#"{"title":"Hi","sections":[]}"#]));
        let (status, _, body) = post_json(
            app(&transport),
            "/api/generate-rendered",
            json!({"theme": "t", "content": "c", "templateType": "normal"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<h1>Hi</h1>"));
        assert!(body.ends_with("data: [DONE]\n\n"));
        assert!(body.split("\n\n").filter(|e| !e.is_empty()).all(|e| e.starts_with("data: ")));
    }

    #[tokio::test]
    async fn upstream_failure_is_a_single_error_event() {
        let transport = Arc::new(ScriptedTransport::with_status(500, vec![]));
        let (status, _, body) =
            post_json(app(&transport), "/api/generate-stream", json!({"theme": "t", "content": "c"})).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "data: {\"error\":\"upstream returned HTTP 500\"}\n\n");
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_upstream() {
        let transport = Arc::new(ScriptedTransport::fragments(&["A"]));
        for body in [
            json!({"content": "c"}),
            json!({"theme": "t", "content": "c", "templateType": "poster"}),
            json!({"theme": "t", "content": "c", "images": ["ftp:/x"]}),
            json!({"theme": "", "content": "c"}),
        ] {
            let (status, content_type, text) = post_json(app(&transport), "/api/generate-rendered", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(content_type.as_deref(), Some("application/json"));
            let err: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert!(err["error"]["message"].is_string());
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn optimize_echoes_or_rejects() {
        let transport = Arc::new(ScriptedTransport::fragments(&[]));
        let (status, _, body) =
            post_json(app(&transport), "/api/optimize", json!({"markdown": "# Title", "type": "seo"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<serde_json::Value>(&body).unwrap(), json!({"success": true, "markdown": "# Title"}));

        let (status, _, body) = post_json(app(&transport), "/api/optimize", json!({"markdown": ""})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(serde_json::from_str::<serde_json::Value>(&body).unwrap()["success"], json!(false));
    }

    #[tokio::test]
    async fn optimize_rejects_malformed_body_as_json() {
        let transport = Arc::new(ScriptedTransport::fragments(&[]));
        let response = app(&transport)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/optimize")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("{markdown: oops"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], json!(false));
        assert!(body["message"].as_str().unwrap().starts_with("invalid JSON body"));
    }

    #[tokio::test]
    async fn health_reports_version() {
        let transport = Arc::new(ScriptedTransport::fragments(&[]));
        let response = app(&transport)
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
