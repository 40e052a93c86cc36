use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use restora::client::RemoteBackend;
use restora::config::ServiceConfig;
use restora::envelope::FailureKind;
use restora::invoker::mock::{MockInvoker, MockRun};
use restora::request::{BackendKind, RawRequest};
use restora::router::{RequestRouter, Stage};
use restora::events::Event;
use restora::server::app;
use tokio::net::TcpListener;

/// A `restora` backend service on an ephemeral port. Returns its base URL.
async fn spawn_backend(root: &Path, invoker: Arc<MockInvoker>) -> String {
    let mut config = ServiceConfig::default();
    config.output_root = root.join("remote-results");
    let router = Arc::new(RequestRouter::new(config, invoker).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(router)).await.unwrap();
    });
    format!("http://{addr}")
}

fn dispatcher(root: &Path, kind: BackendKind, url: &str) -> RequestRouter {
    let mut config = ServiceConfig::default();
    config.output_root = root.join("local-results");
    config.connect_timeout = Duration::from_secs(2);
    config.remote_timeout = Duration::from_secs(10);
    config.set(&format!("{kind}.url"), url).unwrap();
    let local = Arc::new(MockInvoker::new(vec![]));
    RequestRouter::new(config, local).unwrap()
}

fn input(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"img").unwrap();
    path
}

#[tokio::test]
async fn forwards_restore_to_remote_backend() {
    let dir = tempfile::tempdir().unwrap();
    let face = input(dir.path(), "face1.jpg");
    let remote = Arc::new(MockInvoker::always(
        MockRun::success().writing("restored_imgs/face1.png"),
    ));
    let url = spawn_backend(dir.path(), remote.clone()).await;
    let router = dispatcher(dir.path(), BackendKind::Gfpgan, &url);
    assert_eq!(router.remote_url(BackendKind::Gfpgan), Some(url.as_str()));

    let envelope = router
        .handle(RawRequest {
            backend_kind: Some("gfpgan".into()),
            input_path: Some(face.to_string_lossy().into_owned()),
            weight: Some(0.3),
            upscale: Some(4),
            version: Some(restora::request::VersionField::Text("1.3".into())),
            ..RawRequest::default()
        })
        .await;

    let artifact = envelope.artifact().expect("forwarded success");
    assert!(artifact.main_result.ends_with("restored_imgs/face1.png"));
    assert!(artifact.main_result.to_string_lossy().contains("remote-results"));

    let call = &remote.calls()[0];
    assert!(call.args.windows(2).any(|w| w == ["-s", "4"]));
    assert!(call.args.windows(2).any(|w| w == ["-v", "1.3"]));
    assert!(!dir.path().join("local-results").exists());
}

#[tokio::test]
async fn forwards_generate_to_remote_backend() {
    let dir = tempfile::tempdir().unwrap();
    let lq = input(dir.path(), "lq.png");
    let reference = input(dir.path(), "ref.png");
    let remote = Arc::new(MockInvoker::always(MockRun::success().writing("lq.png")));
    let url = spawn_backend(dir.path(), remote).await;
    let router = dispatcher(dir.path(), BackendKind::RefLdm, &url);

    let envelope = router
        .handle(RawRequest {
            backend_kind: Some("refldm".into()),
            input_path: Some(lq.to_string_lossy().into_owned()),
            ref_paths: Some(vec![reference.to_string_lossy().into_owned()]),
            cfg_scale: Some(2.5),
            ddim_steps: Some(10),
            seed: Some(1),
            ..RawRequest::default()
        })
        .await;

    assert!(envelope.artifact().unwrap().main_result.ends_with("lq.png"));
}

#[tokio::test]
async fn remote_failure_keeps_its_kind() {
    let dir = tempfile::tempdir().unwrap();
    let face = input(dir.path(), "face1.jpg");
    let remote = Arc::new(MockInvoker::always(MockRun::failure(1, "segfault")));
    let url = spawn_backend(dir.path(), remote).await;
    let router = dispatcher(dir.path(), BackendKind::CodeFormer, &url);

    let envelope = router
        .handle(RawRequest {
            backend_kind: Some("codeformer".into()),
            input_path: Some(face.to_string_lossy().into_owned()),
            weight: Some(0.5),
            ..RawRequest::default()
        })
        .await;

    let failure = envelope.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Invocation);
    assert_eq!(failure.diagnostics.stderr.as_deref(), Some("segfault"));
}

#[tokio::test]
async fn unreachable_backend_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let face = input(dir.path(), "face1.jpg");
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let router = dispatcher(dir.path(), BackendKind::CodeFormer, &format!("http://{closed}"));
    let mut rx = router.events().subscribe();

    let envelope = router
        .handle(RawRequest {
            backend_kind: Some("codeformer".into()),
            input_path: Some(face.to_string_lossy().into_owned()),
            weight: Some(0.5),
            ..RawRequest::default()
        })
        .await;

    assert_eq!(
        envelope.failure().unwrap().kind,
        FailureKind::BackendUnavailable
    );

    let mut stages = Vec::new();
    while let Ok(Event::StageChanged { stage, .. }) = rx.try_recv() {
        stages.push(stage);
    }
    assert_eq!(
        stages,
        vec![Stage::Received, Stage::Validated, Stage::Invoking, Stage::Failed]
    );
}

#[tokio::test]
async fn validation_happens_before_forwarding() {
    let dir = tempfile::tempdir().unwrap();
    let router = dispatcher(dir.path(), BackendKind::CodeFormer, "http://127.0.0.1:9");

    let envelope = router
        .handle(RawRequest {
            backend_kind: Some("codeformer".into()),
            input_path: Some("/no/such/input.jpg".into()),
            weight: Some(0.5),
            ..RawRequest::default()
        })
        .await;

    assert_eq!(envelope.failure().unwrap().kind, FailureKind::Validation);
}

#[tokio::test]
async fn non_restora_service_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let face = input(dir.path(), "face1.jpg");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let other = axum::Router::new().route(
        "/restore",
        axum::routing::post(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
    );
    tokio::spawn(async move {
        axum::serve(listener, other).await.unwrap();
    });

    let remote = RemoteBackend::new(
        &format!("http://{addr}/"),
        Duration::from_secs(2),
        Duration::from_secs(5),
    )
    .unwrap();
    let request = RawRequest {
        backend_kind: Some("codeformer".into()),
        input_path: Some(face.to_string_lossy().into_owned()),
        weight: Some(0.5),
        ..RawRequest::default()
    }
    .validate()
    .unwrap();

    let envelope = remote.forward(&request).await;
    let failure = envelope.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::BackendUnavailable);
    assert!(failure.message.contains("404"));
    assert_eq!(failure.diagnostics.stdout.as_deref(), Some("nope"));
}
