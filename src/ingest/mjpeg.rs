//! Upstream HTTP camera source.
//!
//! Pulls frames from a camera that already serves MJPEG
//! (`multipart/x-mixed-replace`) or single JPEG snapshots over HTTP. Frames
//! arrive as JPEG, so the encoder is never involved on this path.
//!
//! A broken upstream connection is reported as `HardwareUnavailable` and the
//! next `acquire` reconnects.

use std::io::Read;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::pool::BufferPool;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameBuffer, FrameSource, PixelFormat, Timestamp};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct MjpegConfig {
    /// `http(s)://` URL of the upstream stream or snapshot endpoint.
    pub url: String,
    pub fb_count: usize,
    pub acquire_timeout: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            fb_count: 2,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

pub struct MjpegSource {
    config: MjpegConfig,
    agent: ureq::Agent,
    state: Mutex<MjpegState>,
    pool: BufferPool,
}

struct MjpegState {
    stream: Option<HttpStream>,
    connected_at: Option<Instant>,
}

enum HttpStream {
    Multipart(MjpegStream),
    Snapshot,
}

impl MjpegSource {
    pub fn new(config: MjpegConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        let pool = BufferPool::new(config.fb_count, config.acquire_timeout);
        Self {
            config,
            agent,
            state: Mutex::new(MjpegState {
                stream: None,
                connected_at: None,
            }),
            pool,
        }
    }

    fn connect(&self, state: &mut MjpegState) -> CaptureResult<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .map_err(|e| CaptureError::hardware(format!("connect {}: {}", self.config.url, e)))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        state.stream = if content_type.contains("multipart") {
            Some(HttpStream::Multipart(MjpegStream::new(response.into_reader())))
        } else {
            Some(HttpStream::Snapshot)
        };
        state.connected_at = Some(Instant::now());
        log::info!("upstream camera connected: {} ({})", self.config.url, content_type);
        Ok(())
    }

    fn next_jpeg(&self, state: &mut MjpegState) -> CaptureResult<Vec<u8>> {
        if state.stream.is_none() {
            self.connect(state)?;
        }
        let result = match state.stream.as_mut() {
            Some(HttpStream::Multipart(stream)) => stream.read_next_jpeg(),
            Some(HttpStream::Snapshot) => self.fetch_snapshot(),
            None => Err(CaptureError::hardware("upstream camera not connected")),
        };
        if let Err(e) = &result {
            state.stream = None;
            if let Some(since) = state.connected_at.take() {
                log::warn!(
                    "upstream camera dropped after {:?}: {}",
                    since.elapsed(),
                    e
                );
            }
        }
        result
    }

    fn fetch_snapshot(&self) -> CaptureResult<Vec<u8>> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .map_err(|e| CaptureError::hardware(format!("snapshot {}: {}", self.config.url, e)))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| CaptureError::hardware(format!("read snapshot: {}", e)))?;
        if bytes.is_empty() {
            return Err(CaptureError::hardware("empty jpeg snapshot"));
        }
        Ok(bytes)
    }
}

impl FrameSource for MjpegSource {
    fn acquire(&self) -> CaptureResult<FrameBuffer> {
        let slot = self.pool.checkout()?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let jpeg = match self.next_jpeg(&mut state) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                self.pool.checkin(slot);
                return Err(err);
            }
        };
        let (width, height) = jpeg_dimensions(&jpeg).unwrap_or((0, 0));
        Ok(FrameBuffer::new(
            jpeg,
            width,
            height,
            PixelFormat::Jpeg,
            Timestamp::now(),
            slot,
        ))
    }

    fn release(&self, frame: FrameBuffer) {
        self.pool.checkin(frame.slot());
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Jpeg
    }

    fn describe(&self) -> String {
        self.config.url.clone()
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> CaptureResult<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CaptureError::hardware(format!("read mjpeg chunk: {}", e)))?;
            if read == 0 {
                return Err(CaptureError::hardware("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Locate the first complete SOI..EOI run in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let len = jpeg_len(&buffer[start..])?;
    Some((start, start + len))
}

/// Length of the image that starts with SOI at `jpeg[0]`, through its EOI.
///
/// Header segments are skipped by their length field, so an EXIF thumbnail
/// inside APP1 cannot end the frame early. Bytes that do not parse as
/// segments fall back to the next raw `FF D9`.
fn jpeg_len(jpeg: &[u8]) -> Option<usize> {
    let mut i = 2;
    loop {
        if *jpeg.get(i)? != 0xFF {
            return next_eoi(jpeg, i);
        }
        match *jpeg.get(i + 1)? {
            0xFF => i += 1,
            0xD9 => return Some(i + 2),
            0x01 | 0xD0..=0xD7 => i += 2,
            marker => {
                let seg_len = u16::from_be_bytes([*jpeg.get(i + 2)?, *jpeg.get(i + 3)?]) as usize;
                if seg_len < 2 {
                    return next_eoi(jpeg, i + 2);
                }
                i += 2 + seg_len;
                if marker == 0xDA {
                    i = skip_entropy_coded(jpeg, i)?;
                }
            }
        }
    }
}

/// Offset of the first real marker after a scan's entropy-coded data.
fn skip_entropy_coded(jpeg: &[u8], mut i: usize) -> Option<usize> {
    loop {
        if *jpeg.get(i)? != 0xFF {
            i += 1;
            continue;
        }
        match *jpeg.get(i + 1)? {
            // Stuffed zero and restart markers belong to the scan.
            0x00 | 0xD0..=0xD7 => i += 2,
            0xFF => i += 1,
            _ => return Some(i),
        }
    }
}

fn next_eoi(jpeg: &[u8], from: usize) -> Option<usize> {
    jpeg.get(from..)?
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])
        .map(|pos| from + pos + 2)
}

/// Width and height from the first SOFn segment.
pub(crate) fn jpeg_dimensions(jpeg: &[u8]) -> Option<(u32, u32)> {
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    while i + 4 <= jpeg.len() {
        if jpeg[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = jpeg[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        let seg_len = u16::from_be_bytes([jpeg[i + 2], jpeg[i + 3]]) as usize;
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if i + 9 > jpeg.len() {
                return None;
            }
            let height = u16::from_be_bytes([jpeg[i + 5], jpeg[i + 6]]) as u32;
            let width = u16::from_be_bytes([jpeg[i + 7], jpeg[i + 8]]) as u32;
            return Some((width, height));
        }
        i += 2 + seg_len;
    }
    None
}
