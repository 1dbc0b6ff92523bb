//! Webcam frame pipeline: capture raw YUYV frames, encode them to JPEG and
//! hand every image to whichever viewers are waiting for it.

pub mod annotate;
pub mod broadcast;
pub mod capture;
pub mod encoder;
pub mod frame;
pub mod pipeline;
pub mod relay;
pub mod stats;
#[cfg(feature = "linux")]
pub mod v4l2;

pub use broadcast::Broadcaster;
pub use capture::{CaptureDevice, CaptureError, PatternDevice};
pub use encoder::{Encode, EncodeError, JpegEncoder};
pub use frame::{EncodedImage, FrameFormat, PixelFormat};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use stats::{PipelineStats, StatsSnapshot};
