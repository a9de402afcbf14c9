use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use vgen_core::{
    JobFilter, JobStatus, JobSubmission, LengthVariantRequest, PipelineError, SubmissionOutcome,
    VariantPipeline,
};

pub type AppState = Arc<VariantPipeline>;

pub fn router(pipeline: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:id", get(show_job))
        .route("/variants/length", post(length_variants))
        .with_state(pipeline)
}

pub async fn serve(bind: SocketAddr, pipeline: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(target: "server", addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(pipeline)).await
}

/// Error body shared by every route: `{"error": ...}` or `{"issues": [...]}`.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Rejected(Vec<String>),
    NotFound(String),
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Input { .. } => ApiError::BadRequest(err.to_string()),
            PipelineError::Rejected(validation) => ApiError::Rejected(validation.messages()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Rejected(issues) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "issues": issues })),
            )
                .into_response(),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(message) => {
                error!(target: "server", "request failed: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": message })),
                )
                    .into_response()
            }
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn create_job(
    State(pipeline): State<AppState>,
    body: Result<Json<JobSubmission>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(submission) = body?;
    let outcome = pipeline.submit(submission)?;
    let status = match &outcome {
        SubmissionOutcome::DryRun { .. } => StatusCode::OK,
        SubmissionOutcome::Queued { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)).into_response())
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_jobs(
    State(pipeline): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let status = match query.status.as_deref() {
        Some(raw) => Some(raw.parse::<JobStatus>().map_err(ApiError::BadRequest)?),
        None => None,
    };
    let jobs = pipeline.jobs(&JobFilter {
        status,
        limit: query.limit,
    })?;
    Ok(Json(jobs).into_response())
}

async fn show_job(
    State(pipeline): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    match pipeline.job(&job_id)? {
        Some(job) => Ok(Json(job).into_response()),
        None => Err(ApiError::NotFound(format!("job {job_id} not found"))),
    }
}

async fn length_variants(
    State(pipeline): State<AppState>,
    body: Result<Json<LengthVariantRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    let response = pipeline.generate_length_variants(request).await?;
    Ok(Json(response).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;
    use vgen_core::gateway::{GatewayError, GeneratedContent, GenerationGateway, GenerationRequest};
    use vgen_core::job::{WebhookError, WebhookNotifier, WebhookPayload};
    use vgen_core::{SqliteJobStore, VgenConfig};

    struct EchoGateway;

    #[async_trait]
    impl GenerationGateway for EchoGateway {
        async fn generate(&self, request: GenerationRequest) -> Result<GeneratedContent, GatewayError> {
            Ok(GeneratedContent {
                content: format!("{}:{}", request.target, request.slot_index),
                model: None,
            })
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl WebhookNotifier for SilentNotifier {
        async fn notify(&self, _url: &str, _payload: &WebhookPayload) -> Result<(), WebhookError> {
            Ok(())
        }
    }

    fn app() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::new(dir.path().join("jobs.sqlite")).unwrap();
        store.initialize().unwrap();
        let pipeline = VariantPipeline::new(
            Arc::new(VgenConfig::default()),
            store,
            Arc::new(EchoGateway),
            Arc::new(SilentNotifier),
        );
        (dir, router(Arc::new(pipeline)))
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn job_body() -> Value {
        json!({
            "brand": { "name": "Acme Coffee" },
            "source_asset": { "reference": "assets/launch.mp4" },
            "platforms": ["instagram", "tiktok"],
            "variants_per_platform": 3
        })
    }

    #[tokio::test]
    async fn dry_run_returns_plan_and_validation() {
        let (_dir, app) = app();
        let mut body = job_body();
        body["dry_run"] = json!(true);
        let (status, body) = call(&app, post_json("/jobs", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "dry_run");
        assert_eq!(body["plan"]["variants"].as_array().unwrap().len(), 6);
        assert_eq!(body["validation"]["valid"], true);

        let (status, jobs) = call(&app, Request::get("/jobs").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(jobs.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn queued_job_is_visible() {
        let (_dir, app) = app();
        let (status, body) = call(&app, post_json("/jobs", job_body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let (status, job) = call(
            &app,
            Request::get(format!("/jobs/{job_id}")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["job_id"], job_id.as_str());
        assert_eq!(job["plan"]["variants"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn invalid_plan_is_unprocessable() {
        let (_dir, app) = app();
        let mut body = job_body();
        body["variants_per_platform"] = json!(40);
        let (status, body) = call(&app, post_json("/jobs", body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let issues = body["issues"].as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].as_str().unwrap().contains("ceiling of 50"));
    }

    #[tokio::test]
    async fn missing_brand_is_a_bad_request() {
        let (_dir, app) = app();
        let (status, body) = call(
            &app,
            post_json("/jobs", json!({ "source_asset": { "reference": "a.png" } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("brand"));

        let request = Request::post("/jobs")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (_dir, app) = app();
        let (status, body) = call(
            &app,
            Request::get("/jobs/job-nope").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("job-nope"));
    }

    #[tokio::test]
    async fn bad_status_filter_is_rejected() {
        let (_dir, app) = app();
        let (status, _) = call(
            &app,
            Request::get("/jobs?status=paused").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn length_variants_are_grouped() {
        let (_dir, app) = app();
        let (status, body) = call(
            &app,
            post_json("/variants/length", json!({ "content": "Fresh roast daily" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let buckets = body["buckets"].as_array().unwrap();
        let counts: Vec<_> = buckets
            .iter()
            .map(|group| group["variants"].as_array().unwrap().len())
            .collect();
        assert_eq!(counts, vec![7, 7, 6]);
        assert_eq!(buckets[0]["bucket"], "short");
        assert_eq!(buckets[0]["max_length"], 50);
        assert_eq!(buckets[0]["variants"][0]["content"], "short:0");

        let (status, _) = call(&app, post_json("/variants/length", json!({ "content": " " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_length_budget_is_a_bad_request() {
        let (_dir, app) = app();
        let (status, body) = call(
            &app,
            post_json(
                "/variants/length",
                json!({ "content": "x", "max_chars": u64::MAX }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("max_chars"));
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let (_dir, app) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }
}
