use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use vgen_core::gateway::{GatewayError, GenerationGateway, GenerationRequest};
use vgen_core::job::{sign_payload, WebhookError, WebhookNotifier, SIGNATURE_HEADER};
use vgen_core::plan::{ContentFormat, VariantTarget};
use vgen_core::{HttpGenerationGateway, HttpWebhookNotifier, JobStatus, WebhookPayload};

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<Value>>>,
    raw: Arc<Mutex<Vec<(Option<String>, Bytes)>>>,
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn request(max_length: usize) -> GenerationRequest {
    GenerationRequest {
        target: VariantTarget::Platform("x".into()).name().to_string(),
        slot_index: 2,
        prompt: "Write post copy for x promoting Acme.".into(),
        max_length,
        format: ContentFormat::Post,
        parameters: Default::default(),
    }
}

async fn generate(State(captured): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
    captured.bodies.lock().unwrap().push(body);
    Json(json!({ "content": "  Fresh beans roasted today for you  ", "model": "mock-1" }))
}

#[tokio::test]
async fn gateway_posts_request_and_trims_content() {
    let captured = Captured::default();
    let app = Router::new()
        .route("/generate", post(generate))
        .with_state(captured.clone());
    let addr = serve(app).await;

    let gateway = HttpGenerationGateway::new(format!("http://{addr}/generate"), "mock-1");
    let generated = gateway.generate(request(20)).await.unwrap();
    assert_eq!(generated.content, "Fresh beans roasted");
    assert_eq!(generated.model.as_deref(), Some("mock-1"));

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "mock-1");
    assert_eq!(bodies[0]["target"], "x");
    assert_eq!(bodies[0]["slot_index"], 2);
    assert_eq!(bodies[0]["format"], "post");
    assert_eq!(bodies[0]["max_length"], 20);
}

#[tokio::test]
async fn gateway_maps_error_status_and_empty_content() {
    let app = Router::new()
        .route(
            "/down",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        )
        .route("/empty", post(|| async { Json(json!({ "content": "   " })) }));
    let addr = serve(app).await;

    let down = HttpGenerationGateway::new(format!("http://{addr}/down"), "m");
    match down.generate(request(280)).await {
        Err(GatewayError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let empty = HttpGenerationGateway::new(format!("http://{addr}/empty"), "m");
    assert!(matches!(
        empty.generate(request(280)).await,
        Err(GatewayError::EmptyContent)
    ));
}

async fn receive(State(captured): State<Captured>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    captured.raw.lock().unwrap().push((signature, body));
    StatusCode::NO_CONTENT
}

fn payload() -> WebhookPayload {
    WebhookPayload {
        job_id: "job-1".into(),
        status: JobStatus::Completed,
        results: Vec::new(),
        completed_at: Utc::now(),
    }
}

#[tokio::test]
async fn webhook_is_signed_when_a_secret_is_set() {
    let captured = Captured::default();
    let app = Router::new()
        .route("/hook", post(receive))
        .with_state(captured.clone());
    let addr = serve(app).await;
    let url = format!("http://{addr}/hook");

    let signed = HttpWebhookNotifier::new(Duration::from_secs(2)).with_secret("s3cret");
    signed.notify(&url, &payload()).await.unwrap();
    let unsigned = HttpWebhookNotifier::new(Duration::from_secs(2));
    unsigned.notify(&url, &payload()).await.unwrap();

    let raw = captured.raw.lock().unwrap();
    assert_eq!(raw.len(), 2);
    let (signature, body) = &raw[0];
    assert_eq!(
        signature.as_deref(),
        Some(sign_payload(b"s3cret", body).unwrap().as_str())
    );
    let decoded: WebhookPayload = serde_json::from_slice(body).unwrap();
    assert_eq!(decoded.job_id, "job-1");
    assert_eq!(decoded.status, JobStatus::Completed);
    assert!(raw[1].0.is_none());
}

#[tokio::test]
async fn webhook_reports_receiver_failure() {
    let app = Router::new().route("/hook", post(|| async { StatusCode::BAD_GATEWAY }));
    let addr = serve(app).await;
    let notifier = HttpWebhookNotifier::new(Duration::from_secs(2));
    assert!(matches!(
        notifier.notify(&format!("http://{addr}/hook"), &payload()).await,
        Err(WebhookError::Status(502))
    ));
}
