use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    frame::{FrameFormat, PixelFormat},
    relay::{HandOff, RelaySender},
    stats::PipelineStats,
};

/// Log "frame dropped" at most every N drops.
const DROP_LOG_INTERVAL: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("open device: {0}")]
    Device(String),
    #[error("negotiate format: {0}")]
    Format(String),
    #[error("start streaming: {0}")]
    Stream(String),
    #[error("read frame: {0}")]
    Read(String),
    #[error("capture device disconnected")]
    Disconnected,
    #[error("frame relay closed, encoder is gone")]
    RelayClosed,
}

impl CaptureError {
    /// A timeout is the only capture error the loop recovers from.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CaptureError::Timeout)
    }
}

/// Blocking capture device, driven from a dedicated thread.
///
/// Lifecycle: open (constructor of the implementation), `negotiate_format`,
/// `start_streaming`, then `wait_for_frame` / `read_frame` pairs, then `close`.
pub trait CaptureDevice: Send + 'static {
    /// Ask for a pixel layout and size. The device may adjust the size; the
    /// returned format is what frames will actually carry.
    fn negotiate_format(
        &mut self,
        pixel_format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<FrameFormat, CaptureError>;

    fn start_streaming(&mut self) -> Result<(), CaptureError>;

    /// Block until a frame is ready or `timeout` expires (`CaptureError::Timeout`).
    fn wait_for_frame(&mut self, timeout: Duration) -> Result<(), CaptureError>;

    /// Bytes of the frame made ready by the last `wait_for_frame`. Valid until
    /// the next call on the device.
    fn read_frame(&mut self) -> Result<&[u8], CaptureError>;

    fn close(&mut self);
}

/// Pulls frames from `device` and offers each one to the encoder through the relay.
///
/// Never blocks on a busy encoder: when nobody is parked on the relay the frame
/// is dropped. After a successful handoff it blocks until the encoder returns
/// the buffer. Returns `Ok(())` only when cancelled.
pub(crate) fn capture_loop<D: CaptureDevice + ?Sized>(
    device: &mut D,
    relay: RelaySender,
    timeout: Duration,
    cancel: CancellationToken,
    stats: &PipelineStats,
) -> Result<(), CaptureError> {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        if cancel.is_cancelled() {
            log::info!("capture loop cancelled");
            return Ok(());
        }

        match device.wait_for_frame(timeout) {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                stats.record_timeout();
                log::warn!("no frame from capture device within {:?}, retrying", timeout);
                continue;
            }
            Err(e) => return Err(e),
        }

        let frame = device.read_frame()?;
        if frame.is_empty() {
            continue;
        }
        stats.record_captured();

        // clear keeps the capacity, so the buffer only ever grows
        buffer.clear();
        buffer.extend_from_slice(frame);

        buffer = match relay.hand_off(buffer) {
            HandOff::Taken(returned) => returned,
            HandOff::Busy(kept) => {
                let dropped = stats.record_dropped();
                if dropped % DROP_LOG_INTERVAL == 1 {
                    log::debug!("encoder busy, dropped {} frames", dropped);
                }
                kept
            }
            HandOff::Closed => return Err(CaptureError::RelayClosed),
        };
    }
}

// BT.601 colour bars: white, yellow, cyan, green, magenta, red, blue, black
const BARS: [[u8; 3]; 8] = [
    [235, 128, 128],
    [210, 16, 146],
    [170, 166, 16],
    [145, 54, 34],
    [106, 202, 222],
    [81, 90, 240],
    [41, 240, 110],
    [16, 128, 128],
];

/// Synthetic device producing scrolling YUYV colour bars at a fixed interval.
///
/// Selected with `--video pattern`; also what the pipeline tests capture from.
pub struct PatternDevice {
    interval: Duration,
    limit: Option<u64>,
    format: Option<FrameFormat>,
    streaming: bool,
    produced: u64,
    frame: Vec<u8>,
}

impl PatternDevice {
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(33),
            limit: None,
            format: None,
            streaming: false,
            produced: 0,
            frame: Vec::new(),
        }
    }

    /// Time between two frames.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Report a disconnect after `limit` frames.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn render(&mut self, format: FrameFormat) {
        let width = format.width as usize;
        let height = format.height as usize;
        let shift = self.produced as usize * 2;
        self.frame.clear();
        self.frame.reserve(format.frame_len());
        for _ in 0..height {
            for x in (0..width).step_by(2) {
                let bar = ((x + shift) % width) * BARS.len() / width;
                let [y, u, v] = BARS[bar];
                self.frame.extend_from_slice(&[y, u, y, v]);
            }
        }
    }
}

impl Default for PatternDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for PatternDevice {
    fn negotiate_format(
        &mut self,
        pixel_format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<FrameFormat, CaptureError> {
        // pixel pairs share chroma, so the width has to be even
        let width = width & !1;
        if width == 0 || height == 0 {
            return Err(CaptureError::Format(format!(
                "unsupported size {}x{}",
                width, height
            )));
        }
        let format = FrameFormat::new(pixel_format, width, height);
        self.format = Some(format);
        Ok(format)
    }

    fn start_streaming(&mut self) -> Result<(), CaptureError> {
        if self.format.is_none() {
            return Err(CaptureError::Stream("format not negotiated".to_string()));
        }
        self.streaming = true;
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        if !self.streaming {
            return Err(CaptureError::Stream("device is not streaming".to_string()));
        }
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Err(CaptureError::Disconnected);
        }
        if self.interval > timeout {
            std::thread::sleep(timeout);
            return Err(CaptureError::Timeout);
        }
        std::thread::sleep(self.interval);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<&[u8], CaptureError> {
        let format = self
            .format
            .ok_or_else(|| CaptureError::Read("format not negotiated".to_string()))?;
        self.render(format);
        self.produced += 1;
        Ok(&self.frame)
    }

    fn close(&mut self) {
        self.streaming = false;
    }
}
