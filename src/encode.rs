//! JPEG encoding for sources that do not emit JPEG natively.
//!
//! The wire format is always JPEG. When the sensor already produces JPEG the
//! hardware buffer is sent as-is (`Encoded::Borrowed`), otherwise the frame is
//! encoded into a heap copy (`Encoded::Owned`) and the raw buffer goes straight
//! back to the source so transmission never pins a hardware slot.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameBuffer, FrameSource, PixelFormat, Timestamp};

/// Largest value on the sensor quality scale (0 = best, 63 = worst).
pub const SENSOR_QUALITY_MAX: u8 = 63;

/// JPEG encoder quality on the 1..=100 scale (100 = best).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JpegQuality(u8);

impl JpegQuality {
    /// Fixed quality used by the live stream.
    pub const STREAM: JpegQuality = JpegQuality(80);

    pub fn new(quality: u8) -> Self {
        Self(quality.clamp(1, 100))
    }

    /// Map the sensor scale (0 best .. 63 worst) onto encoder quality.
    pub fn from_sensor_scale(sensor_quality: u8) -> Self {
        let q = u32::from(sensor_quality.min(SENSOR_QUALITY_MAX));
        let mapped = 100 - (q * 90) / u32::from(SENSOR_QUALITY_MAX);
        Self::new(mapped as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Wire-ready JPEG bytes.
///
/// `Borrowed` still owns the hardware buffer and must go back to the source;
/// `Owned` is an encoder copy whose raw frame was already released.
#[derive(Debug)]
pub enum Encoded {
    Borrowed(FrameBuffer),
    Owned { bytes: Vec<u8>, timestamp: Timestamp },
}

impl Encoded {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Borrowed(frame) => frame.data(),
            Self::Owned { bytes, .. } => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Borrowed(frame) => frame.timestamp,
            Self::Owned { timestamp, .. } => *timestamp,
        }
    }

    /// Give back whatever is still held: the hardware buffer on the borrowed
    /// path, the heap copy (by dropping it) on the owned path.
    pub fn release_to(self, source: &dyn FrameSource) {
        match self {
            Self::Borrowed(frame) => source.release(frame),
            Self::Owned { .. } => {}
        }
    }
}

pub struct Encoder;

impl Encoder {
    /// Encode a raw frame to JPEG. JPEG input is returned as a copy.
    pub fn encode(frame: &FrameBuffer, quality: JpegQuality) -> CaptureResult<Vec<u8>> {
        if frame.is_jpeg() {
            return Ok(frame.data().to_vec());
        }
        Self::encode_pixels(frame.data(), frame.width, frame.height, frame.format, quality)
    }

    pub fn encode_pixels(
        data: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        quality: JpegQuality,
    ) -> CaptureResult<Vec<u8>> {
        if width == 0 || height == 0 {
            return Err(CaptureError::encode("frame has zero dimensions"));
        }
        let bpp = format
            .bytes_per_pixel()
            .ok_or_else(|| CaptureError::encode("cannot re-encode compressed input"))?;
        let expected = width as usize * height as usize * bpp;
        if data.len() != expected {
            return Err(CaptureError::encode(format!(
                "{} frame {}x{} should be {} bytes, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            )));
        }

        let (pixels, color) = match format {
            PixelFormat::Rgb565 => (rgb565_to_rgb888(data), ExtendedColorType::Rgb8),
            PixelFormat::Yuv422 => {
                if width % 2 != 0 {
                    return Err(CaptureError::encode("yuv422 frame width must be even"));
                }
                (yuyv_to_rgb888(data), ExtendedColorType::Rgb8)
            }
            PixelFormat::Grayscale => (data.to_vec(), ExtendedColorType::L8),
            PixelFormat::Rgb888 | PixelFormat::Jpeg => (data.to_vec(), ExtendedColorType::Rgb8),
        };

        let mut out = Vec::with_capacity(expected / 8);
        JpegEncoder::new_with_quality(&mut out, quality.value())
            .encode(&pixels, width, height, color)
            .map_err(|e| CaptureError::encode(e.to_string()))?;
        Ok(out)
    }
}

/// Turn a freshly acquired frame into wire bytes.
///
/// Non-JPEG frames are encoded and released immediately, on success and on
/// failure alike. On `Err` the caller holds nothing.
pub fn prepare_for_wire(
    source: &dyn FrameSource,
    frame: FrameBuffer,
    quality: JpegQuality,
) -> CaptureResult<Encoded> {
    if frame.is_jpeg() {
        return Ok(Encoded::Borrowed(frame));
    }
    let timestamp = frame.timestamp;
    let result = Encoder::encode(&frame, quality);
    source.release(frame);
    result.map(|bytes| Encoded::Owned { bytes, timestamp })
}

/// RGB565 big-endian (sensor byte order) to RGB888.
fn rgb565_to_rgb888(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 * 3);
    for px in data.chunks_exact(2) {
        let v = u16::from_be_bytes([px[0], px[1]]);
        let r = ((v >> 11) & 0x1f) as u8;
        let g = ((v >> 5) & 0x3f) as u8;
        let b = (v & 0x1f) as u8;
        out.push((r << 3) | (r >> 2));
        out.push((g << 2) | (g >> 4));
        out.push((b << 3) | (b >> 2));
    }
    out
}

/// YUYV 4:2:2 to RGB888 (BT.601, full range).
fn yuyv_to_rgb888(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 * 3);
    for quad in data.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        push_yuv(&mut out, y0, u, v);
        push_yuv(&mut out, y1, u, v);
    }
    out
}

fn push_yuv(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;
    out.push(r.clamp(0.0, 255.0) as u8);
    out.push(g.clamp(0.0, 255.0) as u8);
    out.push(b.clamp(0.0, 255.0) as u8);
}
