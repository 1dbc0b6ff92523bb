use std::convert::Infallible;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use frame_bus::EncodedImage;
use futures::{StreamExt, stream};

use crate::{
    api::AppState,
    handler::{ApiResult, Viewer},
};

pub const BOUNDARY: &str = "lite_cam_frame";

pub fn stream_router() -> Router<AppState> {
    Router::new()
        .route("/stream", get(mjpeg_stream))
        .route("/snapshot", get(snapshot))
}

/// Part header preceding one image in the multipart body.
fn part_header(image: &EncodedImage) -> Bytes {
    Bytes::from(format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        image.len()
    ))
}

fn no_cache(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

/// Logs the end of a viewer session once the response body is dropped.
struct Session {
    name: String,
    images: u64,
}

impl Drop for Session {
    fn drop(&mut self) {
        log::info!("viewer {} left after {} images", self.name, self.images);
    }
}

async fn mjpeg_stream(State(state): State<AppState>, Viewer(identity): Viewer) -> Response {
    log::info!("viewer {} connected to stream", identity.name());

    let mut session = Session {
        name: identity.name().to_string(),
        images: 0,
    };
    let parts = state
        .broadcaster
        .clone()
        .images()
        .flat_map(move |image| {
            session.images += 1;
            // the image bytes are shared with every other viewer of this cycle
            stream::iter([
                part_header(&image),
                image.data().clone(),
                Bytes::from_static(b"\r\n"),
            ])
        })
        .map(Ok::<_, Infallible>);

    let mut response = (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        )],
        Body::from_stream(parts),
    )
        .into_response();
    no_cache(&mut response);
    response
}

async fn snapshot(State(state): State<AppState>, Viewer(identity): Viewer) -> ApiResult<Response> {
    log::info!("viewer {} requested a snapshot", identity.name());
    let image = state
        .broadcaster
        .next_image()
        .await
        .ok_or_else(|| anyhow::anyhow!("pipeline stopped"))?;

    let mut response = (
        [(header::CONTENT_TYPE, "image/jpeg")],
        Body::from(image.data().clone()),
    )
        .into_response();
    no_cache(&mut response);
    Ok(response)
}
