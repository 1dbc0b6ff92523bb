use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

/// Pixel layouts a capture device can be asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    /// Packed YUV 4:2:2, `[Y0, U, Y1, V]` per pixel pair.
    Yuyv,
}

impl PixelFormat {
    /// V4L2 four character code.
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::Yuyv => *b"YUYV",
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Yuyv => 2,
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            PixelFormat::Yuyv => write!(f, "YUYV"),
        }
    }
}

/// Negotiated frame geometry, fixed for the lifetime of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrameFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl FrameFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
        }
    }

    /// Size in bytes of one complete raw frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

impl Display for FrameFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{} {}x{}", self.pixel_format, self.width, self.height)
    }
}

struct EncodedInner {
    seq: u64,
    data: Bytes,
    width: u32,
    height: u32,
}

/// One compressed image, shared by every viewer of a broadcast cycle.
///
/// Cloning is a reference count bump; the bytes are never copied or mutated.
#[derive(Clone)]
pub struct EncodedImage {
    inner: Arc<EncodedInner>,
}

impl EncodedImage {
    pub fn new(seq: u64, data: Bytes, width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(EncodedInner {
                seq,
                data,
                width,
                height,
            }),
        }
    }

    /// Generation number, increasing with capture order.
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    pub fn data(&self) -> &Bytes {
        &self.inner.data
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// True when both handles point at the same encoded buffer.
    pub fn same_image(&self, other: &EncodedImage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this image.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Display for EncodedImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "EncodedImage {{ seq: {}, data: {}, {}x{} }}",
            self.inner.seq,
            self.inner.data.len(),
            self.inner.width,
            self.inner.height
        )
    }
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(self, f)
    }
}
