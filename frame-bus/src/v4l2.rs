use std::io;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::{
    capture::{CaptureDevice, CaptureError},
    frame::{FrameFormat, PixelFormat},
};

const BUFFER_COUNT: u32 = 4;
/// errno reported once the device node is gone
const ENODEV: i32 = 19;

/// Who owns the mapped buffers between two waits.
///
/// `CaptureStream::next` re-queues the buffer it handed out last before it
/// dequeues, so it may only be called while that buffer is still ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Buffers {
    /// Streaming has not been switched on yet.
    Idle,
    /// The last dequeued buffer is held by us.
    Held,
    /// Every buffer sits with the driver, after a dequeue timed out.
    Queued,
}

/// V4L2 capture device using memory mapped buffers.
pub struct V4l2Device {
    path: String,
    device: Device,
    format: Option<FrameFormat>,
    stream: Option<MmapStream<'static>>,
    buffers: Buffers,
    frame: Vec<u8>,
}

impl std::fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Device")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("streaming", &self.stream.is_some())
            .field("buffers", &self.buffers)
            .finish()
    }
}

impl V4l2Device {
    pub fn open(path: &str) -> Result<Self, CaptureError> {
        let device = Device::with_path(path)
            .map_err(|e| CaptureError::Device(format!("{}: {}", path, e)))?;
        Ok(Self {
            path: path.to_string(),
            device,
            format: None,
            stream: None,
            buffers: Buffers::Idle,
            frame: Vec::new(),
        })
    }

    fn read_error(e: io::Error) -> CaptureError {
        if e.kind() == io::ErrorKind::TimedOut {
            CaptureError::Timeout
        } else if e.raw_os_error() == Some(ENODEV) {
            CaptureError::Disconnected
        } else {
            CaptureError::Read(e.to_string())
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn negotiate_format(
        &mut self,
        pixel_format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<FrameFormat, CaptureError> {
        let fourcc = FourCC::new(&pixel_format.fourcc());
        let requested = Format::new(width, height, fourcc);
        let actual = Capture::set_format(&self.device, &requested)
            .map_err(|e| CaptureError::Format(e.to_string()))?;
        if actual.fourcc != fourcc {
            return Err(CaptureError::Format(format!(
                "{} not supported by {}, device offers {}",
                pixel_format, self.path, actual.fourcc
            )));
        }

        let format = FrameFormat::new(pixel_format, actual.width, actual.height);
        if (actual.width, actual.height) != (width, height) {
            log::info!(
                "{}: requested {}x{}, device picked {}",
                self.path,
                width,
                height,
                format
            );
        }
        self.format = Some(format);
        Ok(format)
    }

    fn start_streaming(&mut self) -> Result<(), CaptureError> {
        if self.format.is_none() {
            return Err(CaptureError::Stream("format not negotiated".to_string()));
        }
        // buffers are queued and STREAMON issued on the first dequeue
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CaptureError::Stream("device is not streaming".to_string()))?;
        stream.set_timeout(timeout);

        match self.buffers {
            Buffers::Idle => {}
            Buffers::Held => {
                // wait here so that a timeout leaves the held buffer alone
                let ready = stream
                    .handle()
                    .poll(libc::POLLIN, poll_millis(timeout))
                    .map_err(Self::read_error)?;
                if ready == 0 {
                    return Err(CaptureError::Timeout);
                }
            }
            Buffers::Queued => {
                // take one buffer back so `next` has something to re-queue;
                // its contents are not reachable and the frame is skipped
                CaptureStream::dequeue(&mut *stream).map_err(Self::read_error)?;
                self.buffers = Buffers::Held;
                log::trace!("{}: skipped one frame after a timeout", self.path);
            }
        }

        let (data, metadata) = match CaptureStream::next(stream) {
            Ok(next) => next,
            Err(e) => {
                // `next` queued the held buffer (or all of them on start)
                // before its dequeue failed
                self.buffers = Buffers::Queued;
                return Err(Self::read_error(e));
            }
        };
        self.buffers = Buffers::Held;
        let used = (metadata.bytesused as usize).min(data.len());
        self.frame.clear();
        self.frame.extend_from_slice(&data[..used]);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<&[u8], CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::Read("device is not streaming".to_string()));
        }
        Ok(&self.frame)
    }

    fn close(&mut self) {
        // dropping the stream issues STREAMOFF and unmaps the buffers
        self.buffers = Buffers::Idle;
        if self.stream.take().is_some() {
            log::info!("{}: capture stream closed", self.path);
        }
    }
}

fn poll_millis(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.close();
    }
}
