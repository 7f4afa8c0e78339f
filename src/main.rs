mod config;
mod http;
mod marketplace;
mod metrics;
mod models;
mod pipeline;
mod upload;
mod vision;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::Settings;
use eyre::WrapErr;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, HealthResponse, SearchResponse};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use upload::ImageUpload;

const SERVICE_NAME: &str = "photo-search-api";
const UPLOAD_FIELD: &str = "file";
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "photosearch.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = Settings::from_env();
    if settings.anthropic_api_key.is_none() {
        warn!(
            target = "photosearch.api",
            "ANTHROPIC_API_KEY is not set; image analysis will fail"
        );
    }
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;

    let state = AppState {
        pipeline: Pipeline::new(settings),
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
    };
    let app = build_app(state);

    let port: u16 = config::env_parse("PORT").unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "photosearch.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);
    let body_limit = state.pipeline.settings.max_upload_bytes() + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
    })
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Upload a photo, get search links on French second-hand marketplaces",
        "endpoints": {
            "analyze": "POST /api/analyze",
            "health": "GET /health",
            "docs": "/docs",
            "openapi": "/openapi.json",
        },
    }))
}

/// Analyze a photo and return marketplace search links.
///
/// - Method: `POST`
/// - Path: `/api/analyze`
/// - Body: `multipart/form-data` with the image in the `file` field
/// - Response: `SearchResponse`
async fn analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SearchResponse>, AppError> {
    crate::metrics::inc_requests("/api/analyze");
    let upload = read_upload(multipart).await?;
    info!(
        target = "photosearch.api",
        filename = upload.filename.as_deref().unwrap_or(""),
        bytes = upload.bytes.len(),
        "analyze_invoked"
    );
    let response = state.pipeline.run(upload).await?;
    Ok(Json(response))
}

async fn read_upload(mut multipart: Multipart) -> Result<ImageUpload, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(AppError::multipart)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(AppError::multipart)?;
        return Ok(ImageUpload::new(filename, bytes.to_vec()));
    }
    Err(AppError::Request {
        status: StatusCode::BAD_REQUEST,
        detail: "No file uploaded".into(),
    })
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::Request {
                status: StatusCode::UNAUTHORIZED,
                detail: "unauthorized".into(),
            });
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> impl IntoResponse {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Photo Search API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    ([("Content-Type", "text/html; charset=utf-8")], html)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    /// Malformed request that never reached the pipeline.
    Request { status: StatusCode, detail: String },
}

impl AppError {
    fn multipart(err: axum::extract::multipart::MultipartError) -> Self {
        Self::Request {
            status: err.status(),
            detail: err.body_text(),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail, error_type) = match self {
            AppError::Request { status, detail } => (status, detail, "validation_error"),
            AppError::Pipeline(err) => {
                error!(
                    target = "photosearch.api",
                    stage = err.stage(),
                    kind = ?err.kind(),
                    error = %err.detail(),
                    "analyze_failed"
                );
                match err.kind() {
                    PipelineErrorKind::InvalidInput => (
                        StatusCode::BAD_REQUEST,
                        err.detail().to_string(),
                        "validation_error",
                    ),
                    PipelineErrorKind::Upstream => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Image analysis service temporarily unavailable".to_string(),
                        "api_error",
                    ),
                    PipelineErrorKind::Routing => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "No marketplace links could be generated".to_string(),
                        "routing_error",
                    ),
                    PipelineErrorKind::Internal => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                        "internal_error",
                    ),
                }
            }
        };
        let payload = ApiError {
            detail,
            error_type: error_type.to_string(),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "photosearch-test-boundary";

    fn app(settings: Settings) -> Router {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_app(AppState {
            pipeline: Pipeline::new(settings),
            openapi: Arc::new(load_openapi()),
            prometheus_handle: handle,
        })
    }

    fn multipart_request(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let response = app(Settings::default())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
    }

    #[tokio::test]
    async fn root_points_to_docs() {
        let response = app(Settings::default())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["endpoints"]["docs"], "/docs");
    }

    #[tokio::test]
    async fn missing_file_field_is_a_validation_error() {
        let response = app(Settings::default())
            .oneshot(multipart_request("image", "photo.png", b"\x89PNG\r\n\x1a\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error_type"], "validation_error");
        assert_eq!(body["detail"], "No file uploaded");
    }

    #[tokio::test]
    async fn non_image_upload_is_rejected() {
        let response = app(Settings::default())
            .oneshot(multipart_request("file", "fake.jpg", b"definitely not a jpeg"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error_type"], "validation_error");
    }

    #[tokio::test]
    async fn missing_api_key_maps_to_service_unavailable() {
        let settings = Settings {
            anthropic_api_key: None,
            ..Settings::default()
        };
        let response = app(settings)
            .oneshot(multipart_request("file", "photo.png", b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["error_type"], "api_error");
        assert_eq!(body["detail"], "Image analysis service temporarily unavailable");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let response = app(Settings::default())
            .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["paths"]["/api/analyze"].is_object());
    }

    #[tokio::test]
    async fn pipeline_errors_map_to_status_and_type() {
        let cases = [
            (PipelineError::routing("resolve_links", "no_links"), 500, "routing_error"),
            (PipelineError::internal("resolve_links", "boom"), 500, "internal_error"),
            (
                PipelineError::invalid_input("validate_upload", "Empty file uploaded"),
                400,
                "validation_error",
            ),
            (PipelineError::upstream("analyze_image", "HTTP 529"), 503, "api_error"),
        ];
        for (err, status, error_type) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status().as_u16(), status);
            assert_eq!(json_body(response).await["error_type"], error_type);
        }
    }
}
