// ============================================================================
// HTTP API Tests
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use frame_bus::{
    Broadcaster, EncodedImage, FrameFormat, PatternDevice, Pipeline, PipelineConfig, PipelineStats,
    PixelFormat,
};
use tower::ServiceExt;

use super::{AppState, app_router};
use crate::auth::{AllowedAccounts, Authenticator, GoogleVerifier};
use crate::handler::stream::BOUNDARY;

const CLIENT_ID: &str = "1234.apps.googleusercontent.com";

fn state(auth: Authenticator) -> AppState {
    AppState {
        broadcaster: Broadcaster::new(),
        stats: Arc::new(PipelineStats::new()),
        format: FrameFormat::new(PixelFormat::Yuyv, 64, 48),
        auth: Arc::new(auth),
        client_id: Some(CLIENT_ID.to_string()),
    }
}

fn secure() -> Authenticator {
    Authenticator::Google(GoogleVerifier::new(
        CLIENT_ID,
        AllowedAccounts::parse("alice@example.com"),
    ))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: Response) -> String {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

/// Splits a multipart/x-mixed-replace body into its image payloads.
fn parse_parts(body: &[u8]) -> Vec<Vec<u8>> {
    let delimiter = format!("--{}\r\n", BOUNDARY);
    let mut parts = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        assert!(rest.starts_with(delimiter.as_bytes()), "missing boundary");
        rest = &rest[delimiter.len()..];

        let end = rest
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("part headers end");
        let headers = std::str::from_utf8(&rest[..end]).unwrap();
        rest = &rest[end + 4..];

        assert!(headers.contains("Content-Type: image/jpeg"), "{}", headers);
        let len: usize = headers
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .expect("content length")
            .parse()
            .unwrap();
        parts.push(rest[..len].to_vec());
        assert_eq!(&rest[len..len + 2], b"\r\n");
        rest = &rest[len + 2..];
    }
    parts
}

async fn wait_parked(broadcaster: &Broadcaster) {
    for _ in 0..500 {
        if broadcaster.waiting() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("no viewer parked");
}

// ------------------------------------------------------------------------
// /stream
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_end_to_end() {
    let device = PatternDevice::new()
        .with_interval(Duration::from_millis(100))
        .with_limit(3);
    let config = PipelineConfig::default().with_size(64, 48);
    let pipeline = Arc::new(Pipeline::new(device, &config).unwrap());
    let app = app_router(AppState::new(&pipeline, Authenticator::Disabled, None));

    let run = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run().await }
    });

    let response = app.oneshot(get("/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
    );

    // the body ends once the device runs out of frames
    let body = tokio::time::timeout(
        Duration::from_secs(10),
        to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(run.await.unwrap().is_err());

    let parts = parse_parts(&body);
    assert_eq!(parts.len(), 3);
    for part in parts {
        let decoded = image::load_from_memory_with_format(&part, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }
}

#[tokio::test]
async fn test_stream_requires_authorization() {
    let state = state(secure());
    let broadcaster = state.broadcaster.clone();
    let app = app_router(state);

    let response = app.oneshot(get("/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_text(response).await,
        "User verification failed: Authorization header missing"
    );
    assert_eq!(broadcaster.waiting(), 0);
}

#[tokio::test]
async fn test_stream_rejects_non_bearer() {
    let app = app_router(state(secure()));
    let request = Request::builder()
        .uri("/stream")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwdw==")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_text(response).await,
        "User verification failed: Bearer token missing"
    );
}

// ------------------------------------------------------------------------
// /snapshot
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snapshot_returns_next_image() {
    let state = state(Authenticator::Disabled);
    let broadcaster = state.broadcaster.clone();
    let app = app_router(state);

    let request = tokio::spawn(app.oneshot(get("/snapshot")));
    wait_parked(&broadcaster).await;
    let image = EncodedImage::new(1, Bytes::from_static(b"\xFF\xD8jpeg\xFF\xD9"), 64, 48);
    assert_eq!(broadcaster.offer(&image), 1);

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, image.data());
}

#[tokio::test]
async fn test_snapshot_after_shutdown() {
    let state = state(Authenticator::Disabled);
    state.broadcaster.close();
    let response = app_router(state).oneshot(get("/snapshot")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// ------------------------------------------------------------------------
// /status and /
// ------------------------------------------------------------------------

#[tokio::test]
async fn test_status() {
    let response = app_router(state(Authenticator::Disabled))
        .oneshot(get("/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(status["format"]["width"], 64);
    assert_eq!(status["format"]["height"], 48);
    assert_eq!(status["stats"]["captured"], 0);
    assert_eq!(status["fanout"], 50);
    assert_eq!(status["streaming"], true);
}

#[tokio::test]
async fn test_status_requires_authorization() {
    let response = app_router(state(secure()))
        .oneshot(get("/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_index_pages() {
    let page = body_text(
        app_router(state(Authenticator::Disabled))
            .oneshot(get("/"))
            .await
            .unwrap(),
    )
    .await;
    assert!(page.contains(r#"src="/stream""#));

    let page = body_text(app_router(state(secure())).oneshot(get("/")).await.unwrap()).await;
    assert!(page.contains(CLIENT_ID));
    assert!(page.contains("/snapshot"));
}
