use bytes::Bytes;

use crate::{
    annotate::annotate,
    broadcast::Broadcaster,
    frame::{EncodedImage, FrameFormat},
    relay::RelayReceiver,
    stats::PipelineStats,
};

/// Quality used when none is configured, the common libjpeg default.
pub const DEFAULT_QUALITY: u8 = 75;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("frame holds {actual} bytes, {expected} expected for {format}")]
    ShortFrame {
        expected: usize,
        actual: usize,
        format: FrameFormat,
    },
    #[error("{0}x{1} exceeds the jpeg size limit")]
    TooLarge(u32, u32),
    #[error("jpeg encode: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),
}

/// Turns one raw frame into a servable image.
pub trait Encode: Send + 'static {
    fn format(&self) -> FrameFormat;

    fn encode(&mut self, raw: &[u8]) -> Result<Bytes, EncodeError>;
}

/// YUYV to JPEG encoder with an optional timestamp overlay.
pub struct JpegEncoder {
    format: FrameFormat,
    quality: u8,
    timestamp: bool,
    annotate_warned: bool,
    rgb: Vec<u8>,
}

impl JpegEncoder {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            quality: DEFAULT_QUALITY,
            timestamp: true,
            annotate_warned: false,
            rgb: Vec::new(),
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn with_timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn draw_timestamp(&mut self) {
        let label = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        if let Err(e) = annotate(&mut self.rgb, self.format.width, self.format.height, &label) {
            // the same failure repeats on every frame
            if !self.annotate_warned {
                log::warn!("timestamp overlay skipped: {}", e);
                self.annotate_warned = true;
            } else {
                log::trace!("timestamp overlay skipped: {}", e);
            }
        }
    }
}

impl Encode for JpegEncoder {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn encode(&mut self, raw: &[u8]) -> Result<Bytes, EncodeError> {
        let FrameFormat { width, height, .. } = self.format;
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(EncodeError::TooLarge(width, height));
        }

        yuyv_to_rgb(raw, self.format, &mut self.rgb)?;
        if self.timestamp {
            self.draw_timestamp();
        }

        let mut out = Vec::new();
        let encoder = jpeg_encoder::Encoder::new(&mut out, self.quality);
        encoder.encode(
            &self.rgb,
            width as u16,
            height as u16,
            jpeg_encoder::ColorType::Rgb,
        )?;
        Ok(Bytes::from(out))
    }
}

/// Converts packed YUYV 4:2:2 into RGB24, reusing `rgb`'s allocation.
///
/// Each 4-byte group `[Y0, U, Y1, V]` yields two pixels sharing U and V,
/// converted with BT.601 coefficients.
pub fn yuyv_to_rgb(data: &[u8], format: FrameFormat, rgb: &mut Vec<u8>) -> Result<(), EncodeError> {
    let pixel_count = format.width as usize * format.height as usize;
    let expected = format.frame_len();
    if data.len() < expected {
        return Err(EncodeError::ShortFrame {
            expected,
            actual: data.len(),
            format,
        });
    }

    rgb.clear();
    rgb.reserve(pixel_count * 3);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            rgb.extend_from_slice(&[r, g, b]);
        }
    }
    Ok(())
}

/// Encoder side of the pipeline: park on the relay, encode, broadcast.
///
/// Returns `Ok(())` when the capture side hangs up. Any encode failure is
/// returned as is; a broken format would fail every following frame too.
pub(crate) fn encoder_loop<E: Encode + ?Sized>(
    encoder: &mut E,
    relay: RelayReceiver,
    broadcaster: &Broadcaster,
    stats: &PipelineStats,
) -> Result<(), EncodeError> {
    let format = encoder.format();
    let mut frame = Vec::new();
    let mut seq = 0u64;
    while let Some(relayed) = relay.recv() {
        relayed.copy_into(&mut frame);

        let data = encoder.encode(&frame)?;
        seq += 1;
        stats.record_encoded();

        let image = EncodedImage::new(seq, data, format.width, format.height);
        let viewers = broadcaster.broadcast(image);
        stats.record_delivered(viewers);
    }
    log::info!("encoder loop finished after {} images", seq);
    Ok(())
}
