//! Capture, relay, encode and broadcast wired together.
//!
//! ```text
//! CaptureDevice ──► capture_loop ──► relay (single slot) ──► encoder_loop ──► Broadcaster ──► viewers
//!   (blocking thread)          drops when encoder busy      (blocking thread)
//! ```

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::{Broadcaster, DEFAULT_FANOUT},
    capture::{CaptureDevice, CaptureError, capture_loop},
    encoder::{DEFAULT_QUALITY, Encode, EncodeError, JpegEncoder, encoder_loop},
    frame::{FrameFormat, PixelFormat},
    relay::relay,
    stats::PipelineStats,
};

/// How long the encoder may keep finishing its current image after capture stopped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Config
// ============================================================================

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Capture wait per frame; a timeout is logged and retried.
    pub frame_timeout: Duration,
    /// Viewers served per broadcast cycle.
    pub fanout: usize,
    /// Draw the wall-clock time into each image.
    pub timestamp: bool,
    pub quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Yuyv,
            width: 1024,
            height: 768,
            frame_timeout: Duration::from_secs(5),
            fanout: DEFAULT_FANOUT,
            timestamp: true,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl PipelineConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn with_timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl From<JoinError> for PipelineError {
    fn from(e: JoinError) -> Self {
        PipelineError::Task(e.to_string())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

type Stages = (Box<dyn CaptureDevice>, Box<dyn Encode>);

pub struct Pipeline {
    format: FrameFormat,
    frame_timeout: Duration,
    broadcaster: Broadcaster,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    started: AtomicBool,
    stages: Mutex<Option<Stages>>,
}

impl Pipeline {
    /// Negotiates the format, starts streaming and prepares a JPEG encoder for it.
    pub fn new<D: CaptureDevice>(device: D, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let quality = config.quality;
        let timestamp = config.timestamp;
        Self::with_encoder(device, config, move |format| {
            JpegEncoder::new(format)
                .with_quality(quality)
                .with_timestamp(timestamp)
        })
    }

    /// Like [`new`](Self::new), with the encoder built by `make_encoder` from
    /// the negotiated format.
    pub fn with_encoder<D, E, F>(
        mut device: D,
        config: &PipelineConfig,
        make_encoder: F,
    ) -> Result<Self, PipelineError>
    where
        D: CaptureDevice,
        E: Encode,
        F: FnOnce(FrameFormat) -> E,
    {
        let format = device.negotiate_format(config.pixel_format, config.width, config.height)?;
        device.start_streaming()?;
        log::info!("capture streaming {}", format);

        let encoder = make_encoder(format);
        Ok(Self {
            format,
            frame_timeout: config.frame_timeout,
            broadcaster: Broadcaster::with_fanout(config.fanout),
            stats: Arc::new(PipelineStats::new()),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            stages: Mutex::new(Some((Box::new(device), Box::new(encoder)))),
        })
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Runs capture and encoding until cancelled or until a stage fails.
    ///
    /// `Ok(())` means a requested shutdown. The broadcaster is closed on
    /// return, so every viewer stream ends.
    pub async fn run(&self) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::Relaxed) {
            log::warn!("pipeline already started");
            return Ok(());
        }
        let stages = self
            .stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((mut device, mut encoder)) = stages else {
            return Ok(());
        };

        let (relay_tx, relay_rx) = relay();

        let capture = tokio::task::spawn_blocking({
            let cancel = self.cancel.clone();
            let stats = self.stats.clone();
            let timeout = self.frame_timeout;
            move || {
                let result = capture_loop(&mut *device, relay_tx, timeout, cancel, &stats);
                device.close();
                result
            }
        });

        let mut encode = tokio::task::spawn_blocking({
            let broadcaster = self.broadcaster.clone();
            let stats = self.stats.clone();
            move || {
                let result = encoder_loop(&mut *encoder, relay_rx, &broadcaster, &stats);
                broadcaster.close();
                result
            }
        });

        let capture_result = joined(capture.await);
        match &capture_result {
            Ok(()) => log::info!("capture stopped"),
            Err(e) => log::error!("capture stopped: {}", e),
        }

        if self.cancel.is_cancelled() {
            // nobody will pick up the image the encoder may be holding
            self.broadcaster.close();
        }
        let encode_result = match tokio::time::timeout(DRAIN_TIMEOUT, &mut encode).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("encoder still busy {:?} after capture stopped", DRAIN_TIMEOUT);
                self.broadcaster.close();
                encode.await
            }
        };
        let encode_result = joined(encode_result);
        self.broadcaster.close();

        if let Err(e) = encode_result {
            log::error!("encoder stopped: {}", e);
            return Err(e);
        }
        capture_result
    }
}

fn joined<E>(result: Result<Result<(), E>, JoinError>) -> Result<(), PipelineError>
where
    PipelineError: From<E>,
{
    Ok(result??)
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
