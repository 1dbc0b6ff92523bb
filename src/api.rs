use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use frame_bus::{Broadcaster, FrameFormat, Pipeline, PipelineStats};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;

#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub stats: Arc<PipelineStats>,
    pub format: FrameFormat,
    pub auth: Arc<Authenticator>,
    pub client_id: Option<String>,
}

impl AppState {
    pub fn new(pipeline: &Pipeline, auth: Authenticator, client_id: Option<String>) -> Self {
        Self {
            broadcaster: pipeline.broadcaster().clone(),
            stats: pipeline.stats(),
            format: pipeline.format(),
            auth: Arc::new(auth),
            client_id,
        }
    }
}

pub(crate) fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(crate::handler::system::system_router())
        .merge(crate::handler::stream::stream_router())
        .with_state(state)
}

/// Binds `addr` and serves the API until `cancel` fires.
pub(crate) async fn start_api_server(
    addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    log::info!("API server listening on {}", addr);

    let app = app_router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server error: {}", e);
        }
    }))
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
