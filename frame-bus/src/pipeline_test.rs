// ============================================================================
// Pipeline Tests
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;

use super::{Pipeline, PipelineConfig, PipelineError};
use crate::{
    capture::{CaptureError, PatternDevice},
    encoder::{Encode, EncodeError, JpegEncoder},
    frame::FrameFormat,
};

fn small_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_size(64, 48)
        .with_timestamp(false)
}

/// Collects sequence numbers until the broadcaster closes.
fn collect_seqs(pipeline: &Pipeline) -> tokio::task::JoinHandle<Vec<u64>> {
    let images = pipeline.broadcaster().clone().images();
    tokio::spawn(async move { images.map(|image| image.seq()).collect::<Vec<_>>().await })
}

/// Wraps the JPEG encoder and takes `delay` per frame.
struct SlowEncoder {
    inner: JpegEncoder,
    delay: Duration,
}

impl Encode for SlowEncoder {
    fn format(&self) -> FrameFormat {
        self.inner.format()
    }

    fn encode(&mut self, raw: &[u8]) -> Result<Bytes, EncodeError> {
        std::thread::sleep(self.delay);
        self.inner.encode(raw)
    }
}

struct BrokenEncoder(FrameFormat);

impl Encode for BrokenEncoder {
    fn format(&self) -> FrameFormat {
        self.0
    }

    fn encode(&mut self, raw: &[u8]) -> Result<Bytes, EncodeError> {
        Err(EncodeError::ShortFrame {
            expected: self.0.frame_len() + 1,
            actual: raw.len(),
            format: self.0,
        })
    }
}

// ------------------------------------------------------------------------
// construction
// ------------------------------------------------------------------------

#[test]
fn test_new_negotiates_format() {
    let pipeline = Pipeline::new(PatternDevice::new(), &small_config().with_size(65, 48)).unwrap();
    let format = pipeline.format();
    assert_eq!((format.width, format.height), (64, 48));
    assert!(!pipeline.is_started());
}

#[test]
fn test_new_rejects_empty_size() {
    let err = Pipeline::new(PatternDevice::new(), &small_config().with_size(0, 0))
        .err()
        .unwrap();
    assert!(matches!(err, PipelineError::Capture(CaptureError::Format(_))));
}

// ------------------------------------------------------------------------
// flow
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_viewer_receives_frames_in_order() {
    let device = PatternDevice::new()
        .with_interval(Duration::from_millis(40))
        .with_limit(8);
    let pipeline = Pipeline::new(device, &small_config()).unwrap();
    let viewer = collect_seqs(&pipeline);

    let result = pipeline.run().await;
    assert!(matches!(
        result,
        Err(PipelineError::Capture(CaptureError::Disconnected))
    ));

    let seqs = viewer.await.unwrap();
    assert_eq!(seqs, (1..=8).collect::<Vec<_>>());

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.captured, 8);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.encoded, 8);
    assert_eq!(stats.delivered, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_encoder_drops_frames() {
    let device = PatternDevice::new()
        .with_interval(Duration::from_millis(10))
        .with_limit(20);
    let pipeline = Pipeline::with_encoder(device, &small_config(), |format| SlowEncoder {
        inner: JpegEncoder::new(format).with_timestamp(false),
        delay: Duration::from_millis(60),
    })
    .unwrap();
    let viewer = collect_seqs(&pipeline);

    let _ = pipeline.run().await;
    let seqs = viewer.await.unwrap();

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.captured, 20);
    assert!(stats.dropped > 0, "{:?}", stats);
    assert!(stats.encoded < 20, "{:?}", stats);
    assert_eq!(stats.encoded + stats.dropped, stats.captured);
    // images keep their order, numbered without gaps
    assert_eq!(seqs, (1..=stats.encoded).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encoder_failure_stops_pipeline() {
    let device = PatternDevice::new().with_interval(Duration::from_millis(5));
    let pipeline = Pipeline::with_encoder(device, &small_config(), BrokenEncoder).unwrap();
    let viewer = collect_seqs(&pipeline);

    let result = tokio::time::timeout(Duration::from_secs(5), pipeline.run())
        .await
        .unwrap();
    assert!(matches!(result, Err(PipelineError::Encode(_))));
    assert!(viewer.await.unwrap().is_empty());
    assert!(pipeline.broadcaster().is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeouts_are_not_fatal() {
    // every wait times out
    let device = PatternDevice::new().with_interval(Duration::from_millis(50));
    let config = small_config().with_frame_timeout(Duration::from_millis(5));
    let pipeline = Arc::new(Pipeline::new(device, &config).unwrap());

    let run = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished());

    pipeline.cancel();
    assert!(run.await.unwrap().is_ok());

    let stats = pipeline.stats().snapshot();
    assert!(stats.timeouts > 1, "{:?}", stats);
    assert_eq!(stats.captured, 0);
}

// ------------------------------------------------------------------------
// shutdown
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_without_viewers() {
    // the encoder blocks in the broadcast fallback; cancel still ends the run
    let device = PatternDevice::new().with_interval(Duration::from_millis(10));
    let pipeline = Arc::new(Pipeline::new(device, &small_config()).unwrap());

    let run = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    pipeline.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert!(pipeline.is_cancelled());
    assert!(pipeline.broadcaster().next_image().await.is_none());

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.encoded, 1);
    assert!(stats.dropped > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_twice_is_noop() {
    let device = PatternDevice::new()
        .with_interval(Duration::from_millis(40))
        .with_limit(1);
    let pipeline = Pipeline::new(device, &small_config()).unwrap();
    let viewer = collect_seqs(&pipeline);

    assert!(pipeline.run().await.is_err());
    assert!(pipeline.is_started());
    assert!(pipeline.run().await.is_ok());
    assert_eq!(viewer.await.unwrap(), vec![1]);
}
