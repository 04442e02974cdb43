mod config;
mod metrics;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use extract::{ConceptExtractor, FormattedKeywords};
use llm::LlmClient;
use pipeline::{Pipeline, PipelineError, ProcessOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::{AppConfig, LogFormat};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

struct AppState {
    client: Arc<LlmClient>,
    // One batch at a time: the engine's scratch directories are shared.
    pipeline: Mutex<Pipeline>,
    defaults: ProcessOptions,
    metrics: Arc<Metrics>,
    model: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnomedRequest {
    texts: Vec<String>,
    api_key: String,
    use_soap: Option<bool>,
    strict_retry: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnomedResponse {
    texts: Vec<String>,
    matched_concepts: Vec<FormattedKeywords>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    model: String,
    use_soap: bool,
    strict_retry: bool,
}

#[derive(Debug, Serialize)]
struct DocumentFailure {
    document: usize,
    error: String,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Pipeline(PipelineError),
    DocumentsFailed(Vec<DocumentFailure>),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ApiError::Pipeline(e) => {
                let status = match &e {
                    PipelineError::Extract(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, json!({ "error": e.to_string() }))
            }
            ApiError::DocumentsFailed(failures) => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": "concept matching failed for some documents",
                    "failedDocuments": failures,
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(config.log_format);

    let client = LlmClient::new(config.llm.clone()).context("failed to build the LLM client")?;
    let pipeline = Pipeline::new(
        ConceptExtractor::new(config.extractor.clone()),
        config.pipeline.clone(),
    );

    let state = Arc::new(AppState {
        client: Arc::new(client),
        defaults: pipeline.default_options(),
        pipeline: Mutex::new(pipeline),
        metrics: Metrics::new(),
        model: config.llm.model.clone(),
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    info!(bind = %config.server.bind, model = %config.llm.model, "Server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/metrics", get(get_metrics))
        .route("/snomed", post(match_concepts))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            info_span!(
                "request",
                id = %Uuid::new_v4(),
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .with_state(state)
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        model: state.model.clone(),
        use_soap: state.defaults.use_soap,
        strict_retry: state.defaults.strict_retry,
    })
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn match_concepts(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SnomedRequest>,
) -> Result<Json<SnomedResponse>, ApiError> {
    if req.texts.is_empty() {
        return Err(ApiError::BadRequest("`texts` must not be empty".to_string()));
    }

    let timer = TimedOperation::start();
    let result = run_batch(&state, req).await;
    state.metrics.record_request(result.is_ok(), timer.elapsed());
    result.map(Json)
}

async fn run_batch(state: &AppState, req: SnomedRequest) -> Result<SnomedResponse, ApiError> {
    let options = ProcessOptions {
        use_soap: req.use_soap.unwrap_or(state.defaults.use_soap),
        strict_retry: req.strict_retry.unwrap_or(state.defaults.strict_retry),
    };
    let pipeline = state.pipeline.lock().await;

    info!(documents = req.texts.len(), ?options, "Processing batch");

    let output = pipeline
        .process(state.client.as_ref(), &req.texts, &req.api_key, options)
        .await
        .map_err(|e| {
            error!(error = %e, "Batch failed");
            ApiError::Pipeline(e)
        })?;

    let failures: Vec<DocumentFailure> = output
        .failures()
        .map(|(document, e)| DocumentFailure {
            document,
            error: e.to_string(),
        })
        .collect();
    state.metrics.record_documents(
        output.documents.len(),
        failures.len(),
        output.concept_count(),
    );
    if !failures.is_empty() {
        return Err(ApiError::DocumentsFailed(failures));
    }

    let matched_concepts = output
        .documents
        .into_iter()
        .filter_map(|doc| doc.concepts.ok())
        .collect();

    Ok(SnomedResponse {
        texts: output.texts,
        matched_concepts,
    })
}
