//! Frame ownership layer.
//!
//! - `FrameBuffer`: one captured image. Move-only; exactly one owner at a time.
//! - `FrameSource`: the acquire/release contract every camera backend implements.
//! - `PixelFormat` / `FrameSize`: sensor output description.
//!
//! `FrameSource::release` takes the buffer by value, so a released frame can
//! neither be read again nor released twice. Forgetting to release is the only
//! remaining mistake, and the pipeline code paths are tested against it with a
//! counting source.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::CaptureResult;
use crate::ingest::SourceCounters;

// ----------------------------------------------------------------------------
// Sensor description
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Jpeg,
    Rgb888,
    Rgb565,
    Grayscale,
    Yuv422,
}

impl PixelFormat {
    /// Bytes per pixel for uncompressed formats; `None` for JPEG.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Jpeg => None,
            Self::Rgb888 => Some(3),
            Self::Rgb565 | Self::Yuv422 => Some(2),
            Self::Grayscale => Some(1),
        }
    }
}

impl FromStr for PixelFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "rgb888" | "rgb" => Ok(Self::Rgb888),
            "rgb565" => Ok(Self::Rgb565),
            "grayscale" | "gray" => Ok(Self::Grayscale),
            "yuv422" | "yuyv" => Ok(Self::Yuv422),
            other => Err(anyhow::anyhow!(
                "unknown pixel format '{}': expected jpeg, rgb888, rgb565, grayscale or yuv422",
                other
            )),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Jpeg => "jpeg",
            Self::Rgb888 => "rgb888",
            Self::Rgb565 => "rgb565",
            Self::Grayscale => "grayscale",
            Self::Yuv422 => "yuv422",
        };
        f.write_str(name)
    }
}

/// Named sensor resolutions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameSize {
    Qqvga,
    Qvga,
    Cif,
    #[default]
    Vga,
    Svga,
    Xga,
    Hd,
    Sxga,
    Uxga,
}

impl FrameSize {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Qqvga => (160, 120),
            Self::Qvga => (320, 240),
            Self::Cif => (400, 296),
            Self::Vga => (640, 480),
            Self::Svga => (800, 600),
            Self::Xga => (1024, 768),
            Self::Hd => (1280, 720),
            Self::Sxga => (1280, 1024),
            Self::Uxga => (1600, 1200),
        }
    }
}

impl FromStr for FrameSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "QQVGA" => Ok(Self::Qqvga),
            "QVGA" => Ok(Self::Qvga),
            "CIF" => Ok(Self::Cif),
            "VGA" => Ok(Self::Vga),
            "SVGA" => Ok(Self::Svga),
            "XGA" => Ok(Self::Xga),
            "HD" => Ok(Self::Hd),
            "SXGA" => Ok(Self::Sxga),
            "UXGA" => Ok(Self::Uxga),
            other => Err(anyhow::anyhow!("unknown frame size '{}'", other)),
        }
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Capture time as seconds + microseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: u64,
    pub micros: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration(since_epoch)
    }

    pub fn from_duration(d: Duration) -> Self {
        Self {
            secs: d.as_secs(),
            micros: d.subsec_micros(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

/// One captured frame, checked out of a source's buffer pool.
///
/// Not `Clone`. Hand it back with `FrameSource::release` or consume it through
/// `encode::prepare_for_wire`.
#[must_use = "frame buffers must be released back to their source"]
pub struct FrameBuffer {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: Timestamp,
    slot: usize,
}

impl FrameBuffer {
    /// Called by frame sources when a pool slot has been filled.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp: Timestamp,
        slot: usize,
    ) -> Self {
        Self {
            data,
            width,
            height,
            format,
            timestamp,
            slot,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_jpeg(&self) -> bool {
        self.format == PixelFormat::Jpeg
    }

    /// Pool slot this frame occupies in its source.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("slot", &self.slot)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameSource
// ----------------------------------------------------------------------------

/// Camera backend contract.
///
/// `acquire` blocks until a frame is ready or the hardware reports failure.
/// On failure there is nothing to release. Every successful `acquire` must be
/// matched by exactly one `release`, either directly or via `Encoded::release_to`.
pub trait FrameSource: Send + Sync {
    fn acquire(&self) -> CaptureResult<FrameBuffer>;

    fn release(&self, frame: FrameBuffer);

    /// Native output format of the sensor.
    fn pixel_format(&self) -> PixelFormat;

    /// Switch sensor resolution. Backends without the control ignore it.
    fn configure(&self, _size: FrameSize) -> CaptureResult<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "frame source".to_string()
    }

    /// Acquire/release tallies, for sources that keep them.
    fn usage(&self) -> Option<SourceCounters> {
        None
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn acquire(&self) -> CaptureResult<FrameBuffer> {
        (**self).acquire()
    }

    fn release(&self, frame: FrameBuffer) {
        (**self).release(frame)
    }

    fn pixel_format(&self) -> PixelFormat {
        (**self).pixel_format()
    }

    fn configure(&self, size: FrameSize) -> CaptureResult<()> {
        (**self).configure(size)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn usage(&self) -> Option<SourceCounters> {
        (**self).usage()
    }
}
