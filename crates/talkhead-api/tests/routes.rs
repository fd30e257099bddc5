//! Router tests against deterministic collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use talkhead_api::{create_router, ApiConfig, AppState};
use talkhead_models::AvatarId;
use talkhead_pipeline::testing::{audio_clip, write_source_frames, FakeDetector, FakeEngine};
use talkhead_pipeline::{AvatarService, BuildRequest, Collaborators, PipelineConfig, RequestLogger};

const BOUNDARY: &str = "talkhead-test-boundary";

struct TestApp {
    root: TempDir,
    service: Arc<AvatarService>,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let config = PipelineConfig {
            results_dir: root.path().join("results"),
            batch_size: 4,
            ..Default::default()
        };
        let service = Arc::new(AvatarService::new(
            config,
            Collaborators::new(Arc::new(FakeEngine::new()), Arc::new(FakeDetector)),
        ));
        let state = AppState::with_service(ApiConfig::default(), Arc::clone(&service));
        Self {
            router: create_router(state, None),
            root,
            service,
        }
    }

    /// Build an avatar directly from fake frames.
    async fn seed_avatar(&self, id: &str) {
        let source = self.root.path().join(format!("{}-frames", id));
        write_source_frames(&source, 4, &[]);
        let avatar_id = AvatarId::parse(id).unwrap();
        let logger = RequestLogger::new("seed", &avatar_id);
        self.service
            .preprocess(
                BuildRequest {
                    avatar_id,
                    source,
                    bbox_shift: 0,
                    force_recreation: false,
                },
                &logger,
            )
            .await
            .unwrap();
    }

    fn uploads_dir(&self) -> PathBuf {
        self.service.config().uploads_dir()
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes());
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn dir_is_empty(dir: &Path) -> bool {
    !dir.exists() || std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn test_health_reports_readiness_and_loaded_avatars() {
    let app = TestApp::new();
    app.seed_avatar("alice").await;

    for path in ["/health", "/healthz"] {
        let response = app.send(get(path)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models_ready"], true);
        assert_eq!(body["engine"], "fake");
        assert_eq!(body["loaded_avatars"], serde_json::json!(["alice"]));
    }
}

#[tokio::test]
async fn test_list_avatars() {
    let app = TestApp::new();
    let body = json_body(app.send(get("/avatars")).await).await;
    assert_eq!(body, serde_json::json!([]));

    app.seed_avatar("bob").await;
    app.seed_avatar("alice").await;
    let body = json_body(app.send(get("/avatars")).await).await;
    assert_eq!(body, serde_json::json!(["alice", "bob"]));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::new();
    let request = Request::builder()
        .uri("/health")
        .header("X-Request-ID", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.headers()["x-request-id"], "req-42");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn test_metrics_route_absent_when_disabled() {
    let app = TestApp::new();
    let response = app.send(get("/metrics")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_preprocess_requires_avatar_id() {
    let app = TestApp::new();
    let request = multipart_request(
        "/avatars/preprocess",
        &[Part::File("video_file", "clip.mp4", b"not really a video")],
    );
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(dir_is_empty(&app.uploads_dir()));
}

#[tokio::test]
async fn test_preprocess_rejects_bad_fields() {
    let app = TestApp::new();

    let request = multipart_request(
        "/avatars/preprocess",
        &[Part::Text("avatar_id", "../escape"), Part::File("video_file", "clip.mp4", b"x")],
    );
    assert_eq!(app.send(request).await.status(), StatusCode::BAD_REQUEST);

    let request = multipart_request(
        "/avatars/preprocess",
        &[Part::Text("avatar_id", "alice"), Part::Text("bbox_shift", "up")],
    );
    assert_eq!(app.send(request).await.status(), StatusCode::BAD_REQUEST);

    let request = multipart_request("/avatars/preprocess", &[Part::Text("avatar_id", "alice")]);
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().unwrap().contains("video_file"));

    assert!(dir_is_empty(&app.uploads_dir()));
}

#[tokio::test]
async fn test_stream_unknown_avatar_is_404() {
    let app = TestApp::new();
    let request = multipart_request(
        "/inference/stream/ghost",
        &[Part::File("audio_file", "clip.wav", &audio_clip(5))],
    );
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(dir_is_empty(&app.uploads_dir()));
}

#[tokio::test]
async fn test_batch_unknown_avatar_is_404() {
    let app = TestApp::new();
    let request = multipart_request(
        "/inference/batch/ghost",
        &[Part::File("audio_file", "clip.wav", &audio_clip(5))],
    );
    assert_eq!(app.send(request).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_requires_audio_file() {
    let app = TestApp::new();
    app.seed_avatar("alice").await;
    let request = multipart_request("/inference/stream/alice", &[Part::Text("other", "x")]);
    assert_eq!(app.send(request).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_serves_mjpeg_and_removes_upload() {
    let app = TestApp::new();
    app.seed_avatar("alice").await;

    let request = multipart_request(
        "/inference/stream/alice",
        &[Part::File("audio_file", "clip.wav", &audio_clip(7))],
    );
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parts = body
        .windows(b"--frame\r\n".len())
        .filter(|w| *w == b"--frame\r\n")
        .count();
    assert_eq!(parts, 7);
    assert!(body.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));

    assert!(dir_is_empty(&app.uploads_dir()));
}

#[tokio::test]
async fn test_dropped_stream_removes_upload() {
    let app = TestApp::new();
    app.seed_avatar("alice").await;

    let request = multipart_request(
        "/inference/stream/alice",
        &[Part::File("audio_file", "clip.wav", &audio_clip(40))],
    );
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!dir_is_empty(&app.uploads_dir()));

    drop(response);
    assert!(dir_is_empty(&app.uploads_dir()));
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_preprocess_then_batch_with_ffmpeg() {
    let app = TestApp::new();

    let video = app.root.path().join("source.mp4");
    let status = std::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "lavfi", "-i", "color=c=gray:s=64x64:d=0.4:r=25"])
        .args(["-pix_fmt", "yuv420p"])
        .arg(&video)
        .status()
        .unwrap();
    assert!(status.success());
    let video_bytes = std::fs::read(&video).unwrap();

    let request = multipart_request(
        "/avatars/preprocess",
        &[
            Part::Text("avatar_id", "carol"),
            Part::Text("bbox_shift", "-2"),
            Part::File("video_file", "source.mp4", &video_bytes),
        ],
    );
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["avatar_id"], "carol");
    assert_eq!(body["info"]["bbox_shift"], -2);

    // Upload is kept as the avatar's source
    assert!(!dir_is_empty(&app.uploads_dir()));

    // The fake engine emits one frame per audio byte, so keep the clip tiny
    let audio = app.root.path().join("tone.wav");
    let status = std::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "lavfi", "-i", "sine=frequency=440:duration=0.01"])
        .args(["-ar", "8000"])
        .arg(&audio)
        .status()
        .unwrap();
    assert!(status.success());
    let audio_bytes = std::fs::read(&audio).unwrap();

    let request = multipart_request(
        "/inference/batch/carol",
        &[Part::File("audio_file", "tone.wav", &audio_bytes)],
    );
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[4..8], b"ftyp");
}
