use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use restora::config::ServiceConfig;
use restora::invoker::mock::{MockInvoker, MockRun};
use restora::router::RequestRouter;
use restora::server::app;

fn test_app(root: &std::path::Path, invoker: Arc<MockInvoker>) -> axum::Router {
    let mut config = ServiceConfig::default();
    config.output_root = root.join("results");
    app(Arc::new(RequestRouter::new(config, invoker).unwrap()))
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn restore_success_returns_output_files() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("face1.jpg");
    std::fs::write(&input, b"jpeg").unwrap();
    let invoker = Arc::new(MockInvoker::always(
        MockRun::success().writing("final_results/face1.png"),
    ));

    let body = json!({"backendKind": "codeformer", "inputPath": input}).to_string();
    let (status, json) = send_json(test_app(dir.path(), invoker), post("/restore", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    let main = json["output_files"]["main_result"].as_str().unwrap();
    assert!(main.ends_with("final_results/face1.png"));
    assert!(json["output_files"]["cropped_faces"].is_array());
}

#[tokio::test]
async fn malformed_json_is_validation_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let (status, json) = send_json(
        test_app(dir.path(), invoker.clone()),
        post("/restore", "{not json"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"]["kind"], "validation_error");
    assert_eq!(invoker.call_count(), 0);
}

#[tokio::test]
async fn missing_input_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let body = json!({"backend_kind": "gfpgan", "input_path": "/no/such/file.jpg"}).to_string();
    let (status, json) = send_json(test_app(dir.path(), invoker), post("/restore", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["diagnostics"]["field"], "input_path");
}

#[tokio::test]
async fn failing_backend_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("face1.jpg");
    std::fs::write(&input, b"jpeg").unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::failure(1, "Traceback")));

    let body = json!({"backend_kind": "codeformer", "input_path": input}).to_string();
    let (status, json) = send_json(test_app(dir.path(), invoker), post("/restore", body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["kind"], "invocation_error");
    assert_eq!(json["error"]["diagnostics"]["stderr"], "Traceback");
}

#[tokio::test]
async fn missing_output_is_bad_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("face1.jpg");
    std::fs::write(&input, b"jpeg").unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let body = json!({"backend_kind": "codeformer", "input_path": input}).to_string();
    let (status, json) = send_json(test_app(dir.path(), invoker), post("/restore", body)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["kind"], "resolution_error");
    assert!(json["error"]["diagnostics"]["attempted_patterns"].is_array());
}

#[tokio::test]
async fn generate_returns_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let lq = dir.path().join("lq.png");
    let reference = dir.path().join("ref.png");
    std::fs::write(&lq, b"png").unwrap();
    std::fs::write(&reference, b"png").unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success().writing("lq.png")));

    let body = json!({"lq_path": lq, "ref_paths": [reference]}).to_string();
    let (status, json) = send_json(test_app(dir.path(), invoker), post("/generate", body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert!(json["output_file"].as_str().unwrap().ends_with("lq.png"));
}

#[tokio::test]
async fn generate_without_refs_reports_detail() {
    let dir = tempfile::tempdir().unwrap();
    let lq = dir.path().join("lq.png");
    std::fs::write(&lq, b"png").unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let body = json!({"lq_path": lq}).to_string();
    let (status, json) = send_json(test_app(dir.path(), invoker), post("/generate", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["detail"]["diagnostics"]["field"], "ref_paths");
}

#[tokio::test]
async fn result_serves_file_with_content_type() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("out.png");
    std::fs::write(&file, b"\x89PNG").unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let uri = format!("/result{}", file.display());
    let response = test_app(dir.path(), invoker)
        .oneshot(get(&uri))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "inline; filename=\"out.png\""
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"\x89PNG");
}

#[tokio::test]
async fn result_streams_large_files_intact() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("restored.tiff");
    let payload: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    std::fs::write(&file, &payload).unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let uri = format!("/result{}", file.display());
    let response = test_app(dir.path(), invoker)
        .oneshot(get(&uri))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/tiff");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.len(), payload.len());
    assert!(bytes[..] == payload[..]);
}

#[tokio::test]
async fn result_missing_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let (status, json) =
        send_json(test_app(dir.path(), invoker), get("/result/no/such/file.png")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn list_images_filters_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("whole_imgs");
    std::fs::create_dir(&images).unwrap();
    for name in ["b.PNG", "a.jpg", "readme.md"] {
        std::fs::write(images.join(name), b"x").unwrap();
    }
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let uri = format!("/list_images?directory={}", images.display());
    let (status, json) = send_json(test_app(dir.path(), invoker), get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["images"], json!(["a.jpg", "b.PNG"]));
    assert_eq!(json["absolute_paths"].as_array().unwrap().len(), 2);
    assert_eq!(json["directory"], images.display().to_string());
}

#[tokio::test]
async fn list_images_missing_directory_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let missing = dir.path().join("nope");
    let uri = format!("/list_images?directory={}", missing.display());
    let (status, json) = send_json(test_app(dir.path(), invoker), get(&uri)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["requested_path"], missing.display().to_string());
    assert!(json["absolute_path"].is_string());
}

#[tokio::test]
async fn health_lists_backends() {
    let dir = tempfile::tempdir().unwrap();
    let invoker = Arc::new(MockInvoker::always(MockRun::success()));

    let (status, json) = send_json(test_app(dir.path(), invoker), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    let kinds: Vec<&str> = json["backends"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["codeformer", "gfpgan", "refldm"]);
}
