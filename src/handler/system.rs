use axum::{Json, Router, extract::State, response::Html, routing::get};
use frame_bus::{FrameFormat, StatsSnapshot};
use serde::Serialize;

use crate::{
    api::AppState,
    handler::{ApiJsonResult, Viewer},
};

pub fn system_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub format: FrameFormat,
    pub stats: StatsSnapshot,
    /// Viewers parked for the next image right now.
    pub waiting: usize,
    pub fanout: usize,
    pub streaming: bool,
}

const INSECURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>lite-cam</title></head>
<body style="margin:0;background:#000">
<img src="/stream" alt="camera" style="display:block;margin:auto;max-width:100%">
</body>
</html>
"#;

// Signs in with Google, then polls /snapshot with the ID token.
const SIGN_IN_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"><title>lite-cam</title>
<script src="https://accounts.google.com/gsi/client" async defer></script>
</head>
<body style="margin:0;background:#000;color:#ccc;font-family:sans-serif">
<div id="g_id_onload" data-client_id="{{CLIENT_ID}}" data-callback="onSignIn"></div>
<div class="g_id_signin" data-type="standard"></div>
<p id="error"></p>
<img id="camera" alt="camera" style="display:block;margin:auto;max-width:100%">
<script>
async function onSignIn(response) {
  const token = response.credential;
  const camera = document.getElementById("camera");
  for (;;) {
    const res = await fetch("/snapshot", { headers: { Authorization: "Bearer " + token } });
    if (!res.ok) {
      document.getElementById("error").textContent = await res.text();
      return;
    }
    const url = URL.createObjectURL(await res.blob());
    camera.onload = () => URL.revokeObjectURL(url);
    camera.src = url;
  }
}
</script>
</body>
</html>
"#;

async fn index(State(state): State<AppState>) -> Html<String> {
    match state.client_id.as_deref() {
        Some(client_id) if !state.auth.is_disabled() => {
            Html(SIGN_IN_PAGE.replace("{{CLIENT_ID}}", &html_escape(client_id)))
        }
        _ => Html(INSECURE_PAGE.to_string()),
    }
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

async fn status(State(state): State<AppState>, _viewer: Viewer) -> ApiJsonResult<StatusResponse> {
    Ok(Json(StatusResponse {
        format: state.format,
        stats: state.stats.snapshot(),
        waiting: state.broadcaster.waiting(),
        fanout: state.broadcaster.fanout(),
        streaming: !state.broadcaster.is_closed(),
    }))
}
