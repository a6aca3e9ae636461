mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{Harness, WEBHOOK_SECRET};
use serde_json::{json, Value};
use tower::ServiceExt;

use photoflow::api::{router, AppState};
use photoflow::engine::EngineState;
use photoflow::jobs::JobStatus;
use photoflow::payments::WebhookSecret;

fn app(h: &Harness, api_token: Option<&str>) -> Router {
    router(AppState {
        gateway: h.gateway.clone(),
        reconciler: h.reconciler.clone(),
        verifier: h.verifier.clone(),
        jobs: h.jobs.clone(),
        ledger: h.ledger.clone(),
        api_token: api_token.map(str::to_string),
        max_request_bytes: 64 * 1024,
    })
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn create_body() -> String {
    json!({
        "kind": "restore",
        "preset": "restore_v2",
        "media_base64": STANDARD.encode([0xABu8; 32]),
        "content_type": "image/png",
    })
    .to_string()
}

fn create_request(user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/jobs")
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(create_body())).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let h = Harness::new();
    let resp = app(&h, None)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_job_returns_201_and_charges() {
    let h = Harness::new();
    h.fund("alice", 3).await;

    let (status, body) = send(app(&h, None), create_request(Some("alice"))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "generating");
    assert_eq!(body["credits_charged"], 1);
    assert_eq!(h.balance("alice").await, 2);
}

#[tokio::test]
async fn create_job_without_identity_is_401() {
    let h = Harness::new();

    let (status, body) = send(app(&h, None), create_request(None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "auth_error");
}

#[tokio::test]
async fn service_token_is_enforced_when_configured() {
    let h = Harness::new();
    h.fund("alice", 3).await;

    let (status, _) = send(app(&h, Some("t0ken")), create_request(Some("alice"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut req = create_request(Some("alice"));
    req.headers_mut()
        .insert("authorization", "Bearer t0ken".parse().unwrap());
    let (status, _) = send(app(&h, Some("t0ken")), req).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn short_balance_is_402() {
    let h = Harness::new();

    let (status, body) = send(app(&h, None), create_request(Some("bob"))).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "insufficient_credits");
}

#[tokio::test]
async fn engine_rejection_is_502_with_job_id() {
    let h = Harness::new();
    h.fund("alice", 3).await;
    h.engine
        .fail_next_submit(photoflow::error::ExternalErrorKind::Auth);

    let (status, body) = send(app(&h, None), create_request(Some("alice"))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["retryable"], false);
    assert!(body["job_id"].is_string());
    assert_eq!(h.balance("alice").await, 3);
}

#[tokio::test]
async fn jobs_are_only_visible_to_their_owner() {
    let h = Harness::new();
    let job = h.generating_job("alice").await;
    let uri = format!("/v1/jobs/{}", job.id);

    let get = |user: &str| {
        Request::get(uri.as_str())
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(app(&h, None), get("alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], job.id.to_string());

    let (status, _) = send(app(&h, None), get("mallory")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn credits_endpoint_reports_balance_and_history() {
    let h = Harness::new();
    h.generating_job("alice").await;

    let (status, body) = send(
        app(&h, None),
        Request::get("/v1/credits")
            .header("x-user-id", "alice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 9);
    assert_eq!(body["entries"].as_array().unwrap().len(), 2);
}

fn callback_request(job_id: uuid::Uuid, body: Value) -> Request<Body> {
    Request::post(format!("/webhooks/generation/{job_id}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn generation_callback_completes_job() {
    let h = Harness::new();
    let job = h.generating_job("alice").await;
    let ext = job.external_job_ref.clone().unwrap();
    h.engine.set_status(
        &ext,
        Ok(EngineState::Succeeded {
            output_url: "https://engine.test/out.png".into(),
        }),
    );

    let (status, body) = send(
        app(&h, None),
        callback_request(job.id, json!({ "id": ext, "status": "succeeded" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], job.id.to_string());
    assert_eq!(body["status"], "completed");
    // the unauthenticated caller gets no job details back
    assert!(body.get("output_ref").is_none());
    assert!(body.get("input_ref").is_none());
    assert!(h.job(job.id).await.output_ref.is_some());
}

#[tokio::test]
async fn callback_without_matching_reference_leaves_job_untouched() {
    let h = Harness::with_refunds();
    let job = h.generating_job("alice").await;
    let ext = job.external_job_ref.clone().unwrap();
    h.engine.set_status(
        &ext,
        Ok(EngineState::Succeeded {
            output_url: "https://engine.test/out.png".into(),
        }),
    );

    let forged = [
        json!({
            "status": "succeeded",
            "output": "http://169.254.169.254/latest/meta-data/creds.png",
        }),
        json!({ "id": "ext-guess", "status": "failed", "error": "x" }),
        json!({ "id": "", "status": "succeeded", "output": "http://10.0.0.1/a.png" }),
    ];
    for body in forged {
        let (status, resp) =
            send(app(&h, Some("svc-token")), callback_request(job.id, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(resp.get("status").is_none());
    }

    let rec = h.job(job.id).await;
    assert_eq!(rec.status(), JobStatus::Generating);
    assert!(rec.output_ref.is_none());
    assert!(rec.error_code.is_none());
    assert!(h.engine.downloaded_urls().is_empty());
    assert_eq!(
        h.engine.status_calls.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    assert_eq!(h.balance("alice").await, 9);
}

#[tokio::test]
async fn callback_body_cannot_choose_the_output() {
    let h = Harness::new();
    let job = h.generating_job("alice").await;
    let ext = job.external_job_ref.clone().unwrap();

    // engine still reports pending; the body's claim is not applied
    let (status, body) = send(
        app(&h, None),
        callback_request(
            job.id,
            json!({
                "id": ext,
                "status": "succeeded",
                "output": "http://169.254.169.254/latest/meta-data/creds.png",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "generating");
    assert!(h.engine.downloaded_urls().is_empty());
    assert_eq!(h.job(job.id).await.status(), JobStatus::Generating);
}

#[tokio::test]
async fn generation_callback_rejects_garbage() {
    let h = Harness::new();
    let job = h.generating_job("alice").await;

    let (status, _) = send(
        app(&h, None),
        Request::post(format!("/webhooks/generation/{}", job.id))
            .body(Body::from("not json"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payment_webhook_checks_signature() {
    let h = Harness::new();
    let body = json!({
        "type": "payment.succeeded",
        "data": {
            "payment_id": "evt_123",
            "metadata": { "user_id": "alice", "amount_cents": 500, "credits": 40 }
        }
    })
    .to_string();
    let ts = chrono::Utc::now().timestamp().to_string();
    let secret = WebhookSecret::from_config(WEBHOOK_SECRET).unwrap();
    let sig = secret.sign("msg_1", &ts, body.as_bytes()).unwrap();

    let request = |signature: String| {
        Request::post("/webhooks/payments")
            .header("webhook-id", "msg_1")
            .header("webhook-timestamp", ts.as_str())
            .header("webhook-signature", signature)
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let (status, resp) = send(app(&h, None), request("v1,AAAA".into())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp["error"], "signature_verification_error");
    assert_eq!(h.balance("alice").await, 0);

    let (status, resp) = send(app(&h, None), request(format!("v1,{sig}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["result"], "applied");
    assert_eq!(h.balance("alice").await, 40);

    let (status, resp) = send(app(&h, None), request(format!("v1,{sig}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["result"], "already_processed");
    assert_eq!(h.balance("alice").await, 40);
}

#[tokio::test]
async fn payment_webhook_without_headers_is_400() {
    let h = Harness::new();

    let (status, _) = send(
        app(&h, None),
        Request::post("/webhooks/payments")
            .body(Body::from("{}"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_report_job_counts() {
    let h = Harness::new();
    h.generating_job("alice").await;

    let resp = app(&h, None)
        .oneshot(Request::get("/metrics/prom").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = String::from_utf8(
        to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec(),
    )
    .unwrap();
    assert!(text.contains("photoflow_jobs{status=\"generating\"} 1"));
}
