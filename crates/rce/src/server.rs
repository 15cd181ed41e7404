use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use rce_engine::{CodeRequest, ExecutionEngine, FilesRequest, MetricsQuery};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

pub(crate) const SERVICE_NAME: &str = "RCE Code Execution Service";
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const ENDPOINTS: [&str; 5] = [
    "/health",
    "/api/v1/execute",
    "/api/v2/execute",
    "/api/v1/logs",
    "/",
];

type AppState = Arc<ExecutionEngine>;

pub fn router(engine: Arc<ExecutionEngine>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/v1/execute", post(execute_code))
        .route("/api/v2/execute", post(execute_files))
        .route("/api/v1/logs", get(logs))
        .fallback(not_found)
        .with_state(engine)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now(),
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn index(State(engine): State<AppState>) -> Json<serde_json::Value> {
    let languages: Vec<&str> = engine
        .registry()
        .languages()
        .map(|spec| spec.language.as_str())
        .collect();
    Json(json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "execute": "/api/v1/execute",
            "executeMultiFile": "/api/v2/execute",
            "logs": "/api/v1/logs",
        },
        "supportedLanguages": languages,
    }))
}

async fn execute_code(
    State(engine): State<AppState>,
    body: Result<Json<CodeRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => Json(engine.execute(request).await).into_response(),
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

async fn execute_files(
    State(engine): State<AppState>,
    body: Result<Json<FilesRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => Json(engine.execute_files(request).await).into_response(),
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

async fn logs(
    State(engine): State<AppState>,
    query: Result<Query<MetricsQuery>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(query)) => Json(engine.logs(&query).await).into_response(),
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "succeeded": false,
            "errorMessage": "Endpoint not found",
            "availableEndpoints": ENDPOINTS,
        })),
    )
        .into_response()
}

fn bad_request(reason: &str) -> Response {
    debug!(reason, "malformed request");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "succeeded": false,
            "errorMessage": format!("Invalid input: {reason}"),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use rce_engine::metrics::MemoryMetricsStore;
    use rce_engine::{LanguageRegistry, SandboxPool, SandboxRunner};
    use sandbox::{ResourceLimits, SandboxFactory};
    use sandbox_process::{ProcessConfig, ProcessFactory};
    use tower::ServiceExt;

    use super::*;

    async fn app(dir: &tempfile::TempDir) -> Router {
        let mut factory = ProcessFactory::new(ProcessConfig::new(dir.path().to_path_buf()));
        factory.startup().await.unwrap();
        let registry = Arc::new(LanguageRegistry::default());
        let runner = SandboxRunner::new(
            Arc::new(factory),
            Arc::clone(&registry),
            SandboxPool::new(2, Duration::from_secs(1)),
        );
        let engine = ExecutionEngine::new(registry, runner, ResourceLimits::default())
            .with_metrics(Arc::new(MemoryMetricsStore::new(10)));
        router(Arc::new(engine))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(&dir).await, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert_eq!(body["service"], SERVICE_NAME);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn index_lists_languages() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/").body(Body::empty()).unwrap();
        let (status, body) = send(app(&dir).await, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["endpoints"]["execute"], "/api/v1/execute");
        let languages = body["supportedLanguages"].as_array().unwrap();
        assert_eq!(languages.len(), 6);
        assert!(languages.contains(&json!("python")));
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/api/v3/execute").body(Body::empty()).unwrap();
        let (status, body) = send(app(&dir).await, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["succeeded"], false);
        assert_eq!(body["errorMessage"], "Endpoint not found");
        assert!(body["availableEndpoints"].as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = post_json(
            "/api/v1/execute",
            json!({ "language": "cobol", "code": "DISPLAY 'HI'." }),
        );
        let (status, body) = send(app(&dir).await, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "succeeded": false, "errorMessage": "unsupported language" })
        );
    }

    #[tokio::test]
    async fn missing_code_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let request = post_json("/api/v1/execute", json!({ "language": "python" }));
        let (_, body) = send(app(&dir).await, request).await;
        assert_eq!(body["errorMessage"], "Invalid input");
    }

    #[tokio::test]
    async fn traversal_in_files_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = post_json(
            "/api/v2/execute",
            json!({
                "language": "python",
                "files": [{ "path": "../evil.py", "content": "" }],
            }),
        );
        let (status, body) = send(app(&dir).await, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["succeeded"], false);
        assert!(
            body["errorMessage"]
                .as_str()
                .unwrap()
                .starts_with("Invalid input")
        );
        assert!(!dir.path().join("evil.py").exists());
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/api/v1/execute")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(app(&dir).await, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["succeeded"], false);
    }

    #[tokio::test]
    async fn logs_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/api/v1/logs?limit=5&language=python")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(&dir).await, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "succeeded": true, "logs": [] }));
    }

    #[tokio::test]
    async fn logs_reject_bad_query() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::get("/api/v1/logs?limit=many")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app(&dir).await, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
