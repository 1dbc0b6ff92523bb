use std::sync::Arc;

use anyhow::Context;
use frame_bus::{PatternDevice, Pipeline, PipelineConfig};
use tokio_util::sync::CancellationToken;

use crate::{
    api::AppState,
    auth::{AllowedAccounts, Authenticator, GoogleVerifier},
    config::AppConfig,
};

mod api;
mod auth;
mod config;
mod handler;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("frame_bus", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(e) = run().await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let auth = authenticator(&config)?;
    let pipeline = Arc::new(open_pipeline(&config)?);

    let cancel = CancellationToken::new();
    let state = AppState::new(&pipeline, auth, config.client_id().map(str::to_string));
    let server = api::start_api_server(config.listen_addr()?, state, cancel.clone()).await?;

    let mut pipeline_task = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run().await }
    });

    let result = tokio::select! {
        joined = &mut pipeline_task => joined?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, shutting down");
            pipeline.cancel();
            pipeline_task.await?
        },
    };

    cancel.cancel();
    if let Err(e) = server.await {
        log::error!("API server task failed: {}", e);
    }
    result.context("pipeline stopped")
}

fn authenticator(config: &AppConfig) -> anyhow::Result<Authenticator> {
    if config.insecure {
        log::warn!("Server started in insecure mode: no authentication required");
        return Ok(Authenticator::Disabled);
    }
    let client_id = config
        .client_id()
        .context("OAuth client ID should be specified via OAUTH_CLIENT_ID")?;
    let accounts = AllowedAccounts::load(&config.accounts)?;
    if accounts.is_empty() {
        log::warn!(
            "{} lists no accounts, every viewer will be rejected",
            config.accounts.display()
        );
    } else {
        log::info!("{} accounts allowed to watch", accounts.len());
    }
    Ok(Authenticator::Google(GoogleVerifier::new(client_id, accounts)))
}

fn open_pipeline(config: &AppConfig) -> anyhow::Result<Pipeline> {
    let pipeline_config = config.pipeline();
    if config.is_pattern() {
        log::warn!("no camera, streaming a generated test pattern");
        return Ok(Pipeline::new(PatternDevice::new(), &pipeline_config)?);
    }
    open_camera(&config.video, &pipeline_config)
}

#[cfg(target_os = "linux")]
fn open_camera(path: &str, config: &PipelineConfig) -> anyhow::Result<Pipeline> {
    log::info!("Opening camera {}...", path);
    let device = frame_bus::v4l2::V4l2Device::open(path)?;
    let pipeline = Pipeline::new(device, config)?;
    log::info!("Camera successfully opened");
    Ok(pipeline)
}

#[cfg(not(target_os = "linux"))]
fn open_camera(path: &str, _config: &PipelineConfig) -> anyhow::Result<Pipeline> {
    anyhow::bail!("cannot open {}: V4L2 capture needs Linux, use --video pattern", path)
}
