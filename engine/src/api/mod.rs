//! HTTP API
//!
//! Exposes each pipeline stage, the full pipeline and deployment management
//! over JSON.
//!
//! # Endpoints
//!
//! - GET /health
//! - POST /api/analyze
//! - POST /api/generate-backend
//! - POST /api/generate-ui
//! - POST /api/integrate
//! - POST /api/deploy
//! - POST /api/pipeline
//! - POST /api/documents/extract
//! - GET /api/deployments
//! - GET /api/deployments/:id
//! - POST /api/deployments/:id/stop

pub mod error;
pub mod static_site;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use sdk::errors::PipelineError;
use sdk::{
    CodeArtifact, DeploymentRecord, DocumentExcerpt, ProjectBundle, Request, RequirementsSpec,
    StopResult, UiArtifact,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::integrator;
use crate::pipeline::{Pipeline, RunOptions};
use crate::preprocess::TextExtractor;
use error::{status_for, ApiError, ApiResult};

/// Shared state of the API handlers
#[derive(Clone)]
pub struct ApiState {
    pipeline: Arc<Pipeline>,
    extractor: Arc<TextExtractor>,
}

impl ApiState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let extractor = Arc::new(TextExtractor::from_config(&pipeline.config().pipeline));
        Self {
            pipeline,
            extractor,
        }
    }
}

/// Create the API router with all endpoints
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/generate-backend", post(generate_backend))
        .route("/api/generate-ui", post(generate_ui))
        .route("/api/integrate", post(integrate))
        .route("/api/deploy", post(deploy))
        .route("/api/pipeline", post(run_pipeline))
        .route("/api/documents/extract", post(extract_document))
        .route("/api/deployments", get(list_deployments))
        .route("/api/deployments/:id", get(get_deployment))
        .route("/api/deployments/:id/stop", post(stop_deployment))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
pub struct GenerateBackendBody {
    pub spec: RequirementsSpec,
}

#[derive(Debug, Deserialize)]
pub struct GenerateUiBody {
    pub spec: RequirementsSpec,
    pub backend: CodeArtifact,
}

#[derive(Debug, Deserialize)]
pub struct IntegrateBody {
    pub backend: CodeArtifact,
    pub ui: UiArtifact,
}

/// Either a full bundle or the root directory of one on disk
#[derive(Debug, Deserialize)]
pub struct DeployBody {
    #[serde(default)]
    pub bundle: Option<ProjectBundle>,
    #[serde(default)]
    pub bundle_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct PipelineBody {
    #[serde(flatten)]
    pub request: Request,
    #[serde(default = "default_deploy")]
    pub deploy: bool,
}

fn default_deploy() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ExtractBody {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// File content, standard base64
    pub content: String,
}

/// GET /health
async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_deployments": state.pipeline.deployer().registry().active_count(),
    }))
}

/// POST /api/analyze
async fn analyze(
    State(state): State<ApiState>,
    Json(request): Json<Request>,
) -> ApiResult<Json<RequirementsSpec>> {
    Ok(Json(state.pipeline.analyze(&request).await?))
}

/// POST /api/generate-backend
async fn generate_backend(
    State(state): State<ApiState>,
    Json(body): Json<GenerateBackendBody>,
) -> ApiResult<Json<CodeArtifact>> {
    Ok(Json(state.pipeline.generate_backend(&body.spec).await?))
}

/// POST /api/generate-ui
async fn generate_ui(
    State(state): State<ApiState>,
    Json(body): Json<GenerateUiBody>,
) -> ApiResult<Json<UiArtifact>> {
    Ok(Json(
        state.pipeline.generate_ui(&body.spec, &body.backend).await?,
    ))
}

/// POST /api/integrate
async fn integrate(
    State(state): State<ApiState>,
    Json(body): Json<IntegrateBody>,
) -> ApiResult<(StatusCode, Json<ProjectBundle>)> {
    let bundle = state.pipeline.integrate(&body.backend, &body.ui).await?;
    Ok((StatusCode::CREATED, Json(bundle)))
}

/// POST /api/deploy
async fn deploy(
    State(state): State<ApiState>,
    Json(body): Json<DeployBody>,
) -> ApiResult<(StatusCode, Json<DeploymentRecord>)> {
    let bundle = match (body.bundle, body.bundle_root) {
        (Some(bundle), _) => bundle,
        (None, Some(root)) => integrator::load_bundle(&root).await?,
        (None, None) => {
            return Err(PipelineError::Validation(
                "either bundle or bundle_root is required".to_string(),
            )
            .into())
        }
    };

    let record = state
        .pipeline
        .deployer()
        .deploy_in_task(bundle)
        .await
        .map_err(|failure| failure.error)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /api/pipeline
///
/// A failed run still returns the full result, with the status of its error.
async fn run_pipeline(State(state): State<ApiState>, Json(body): Json<PipelineBody>) -> Response {
    let options = RunOptions {
        deploy: body.deploy,
    };
    let result = state.pipeline.run_in_task(body.request, options).await;
    let status = result
        .error
        .as_ref()
        .map(status_for)
        .unwrap_or(StatusCode::OK);
    (status, Json(result)).into_response()
}

/// POST /api/documents/extract
async fn extract_document(
    State(state): State<ApiState>,
    Json(body): Json<ExtractBody>,
) -> ApiResult<Json<DocumentExcerpt>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body.content.trim())
        .map_err(|e| PipelineError::Validation(format!("content is not valid base64: {}", e)))?;

    let excerpt = state
        .extractor
        .extract_excerpt(&body.name, &bytes, body.mime_type.as_deref())?;
    Ok(Json(excerpt))
}

/// GET /api/deployments
async fn list_deployments(
    State(state): State<ApiState>,
) -> ApiResult<Json<Vec<DeploymentRecord>>> {
    Ok(Json(state.pipeline.deployer().list().await?))
}

/// GET /api/deployments/:id
async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentRecord>> {
    state
        .pipeline
        .deployer()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Deployment {} not found", id)))
}

/// POST /api/deployments/:id/stop
async fn stop_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StopResult>> {
    Ok(Json(state.pipeline.stop_deployment(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::deployer::{Deployer, DeploymentRegistry};
    use crate::integrator::Integrator;
    use crate::llm::{self, Completion, ModelClient, ModelRequest};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use base64::Engine;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Unreachable;

    #[async_trait]
    impl ModelClient for Unreachable {
        async fn complete(&self, _request: &ModelRequest) -> llm::Result<Completion> {
            Err(llm::LLMError::ProviderUnavailable("offline".to_string()))
        }
    }

    fn app(dir: &TempDir) -> Router {
        let mut config = Config::default();
        config.pipeline.retry_backoff_ms = 1;
        let deployer = Deployer::new(
            config.deploy.clone(),
            Arc::new(DeploymentRegistry::with_range("127.0.0.1", 47001, 47002)),
        );
        let pipeline = Pipeline::new(
            config,
            Arc::new(Unreachable),
            Integrator::new(dir.path().to_path_buf()),
            Arc::new(deployer),
        );
        router(ApiState::new(Arc::new(pipeline)))
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(app(&dir), "GET", "/health", json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_deployments"], 0);
    }

    #[tokio::test]
    async fn test_empty_request_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let (status, body) =
            send(app(&dir), "POST", "/api/analyze", json!({ "description": "   " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation_error");
    }

    #[tokio::test]
    async fn test_pipeline_failure_returns_partial_result() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(
            app(&dir),
            "POST",
            "/api/pipeline",
            json!({ "description": "Create a hotel booking chatbot", "deploy": false }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["final_stage"], "ANALYZING");
        assert_eq!(body["error"]["kind"], "model_call_error");
        assert!(body["spec"].is_null());
    }

    #[tokio::test]
    async fn test_integrate_writes_bundle() {
        let dir = TempDir::new().unwrap();
        let backend = CodeArtifact::new(
            sdk::StackTag::python_fastapi(),
            "from fastapi import FastAPI\napp = FastAPI()\n",
        );
        let ui = UiArtifact::new(
            sdk::StackTag::javascript_react(),
            "function App() { return null; }",
        );
        let (status, body) = send(
            app(&dir),
            "POST",
            "/api/integrate",
            json!({ "backend": backend, "ui": ui }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let root = PathBuf::from(body["root"].as_str().unwrap());
        assert!(root.join("backend/app.py").is_file());
    }

    #[tokio::test]
    async fn test_extract_document() {
        let dir = TempDir::new().unwrap();
        let content = base64::engine::general_purpose::STANDARD.encode("Rooms: Suite, Double");
        let (status, body) = send(
            app(&dir),
            "POST",
            "/api/documents/extract",
            json!({ "name": "rooms.txt", "mime_type": "text/plain", "content": content }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "Rooms: Suite, Double");

        let pdf = base64::engine::general_purpose::STANDARD.encode("%PDF-1.4 binary");
        let (status, body) = send(
            app(&dir),
            "POST",
            "/api/documents/extract",
            json!({ "name": "brief.pdf", "content": pdf }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "extraction_error");
    }

    #[tokio::test]
    async fn test_unknown_deployment() {
        let dir = TempDir::new().unwrap();
        let (status, _) = send(app(&dir), "GET", "/api/deployments/nope", json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            send(app(&dir), "POST", "/api/deployments/nope/stop", json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "already_stopped");
    }

    #[tokio::test]
    async fn test_deploy_requires_bundle() {
        let dir = TempDir::new().unwrap();
        let (status, _) = send(app(&dir), "POST", "/api/deploy", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
