//! Synthetic camera (`stub://` URLs).
//!
//! Produces moving test-pattern frames in any supported pixel format so the
//! pipeline can run on hosts without a sensor attached.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::pool::BufferPool;
use crate::encode::{Encoder, JpegQuality};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameBuffer, FrameSize, FrameSource, PixelFormat, Timestamp};

#[derive(Clone, Debug)]
pub struct StubConfig {
    pub format: PixelFormat,
    pub frame_size: FrameSize,
    /// Number of frame buffers the fake driver owns.
    pub fb_count: usize,
    pub acquire_timeout: Duration,
    /// Simulated sensor readout time per frame.
    pub frame_interval: Duration,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::Jpeg,
            frame_size: FrameSize::Vga,
            fb_count: 2,
            acquire_timeout: Duration::from_secs(5),
            frame_interval: Duration::from_millis(50),
        }
    }
}

impl StubConfig {
    /// Tiny frames, no readout delay. Used by tests.
    pub fn small(format: PixelFormat) -> Self {
        Self {
            format,
            frame_size: FrameSize::Qqvga,
            fb_count: 2,
            acquire_timeout: Duration::from_millis(50),
            frame_interval: Duration::ZERO,
        }
    }
}

struct StubState {
    frame_size: FrameSize,
    frame_count: u64,
    scene_state: u8,
    pending_failures: usize,
}

pub struct StubSource {
    config: StubConfig,
    state: Mutex<StubState>,
    pool: BufferPool,
}

impl StubSource {
    pub fn new(config: StubConfig) -> Self {
        let pool = BufferPool::new(config.fb_count, config.acquire_timeout);
        let state = StubState {
            frame_size: config.frame_size,
            frame_count: 0,
            scene_state: 0,
            pending_failures: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
            pool,
        }
    }

    /// Make the next `count` acquisitions fail as if the sensor stalled.
    pub fn fail_next(&self, count: usize) {
        self.lock().pending_failures = count;
    }

    pub fn frames_generated(&self) -> u64 {
        self.lock().frame_count
    }

    pub fn buffers_in_use(&self) -> usize {
        self.pool.in_use()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(
        &self,
        frame_count: u64,
        scene_state: u8,
        width: u32,
        height: u32,
    ) -> CaptureResult<Vec<u8>> {
        let bpp = self.config.format.bytes_per_pixel().unwrap_or(3);
        let len = width as usize * height as usize * bpp;
        let mut pixels = vec![0u8; len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + frame_count + scene_state as u64) % 256) as u8;
        }
        match self.config.format {
            PixelFormat::Jpeg => Encoder::encode_pixels(
                &pixels,
                width,
                height,
                PixelFormat::Rgb888,
                JpegQuality::STREAM,
            ),
            _ => Ok(pixels),
        }
    }
}

impl FrameSource for StubSource {
    fn acquire(&self) -> CaptureResult<FrameBuffer> {
        {
            let mut state = self.lock();
            if state.pending_failures > 0 {
                state.pending_failures -= 1;
                return Err(CaptureError::hardware("stub sensor stalled"));
            }
        }
        if !self.config.frame_interval.is_zero() {
            std::thread::sleep(self.config.frame_interval);
        }

        let slot = self.pool.checkout()?;
        let (frame_count, scene_state, frame_size) = {
            let mut state = self.lock();
            state.frame_count += 1;
            if state.frame_count % 50 == 0 {
                state.scene_state = state.scene_state.wrapping_add(1);
            }
            (state.frame_count, state.scene_state, state.frame_size)
        };
        let (width, height) = frame_size.dimensions();
        match self.render(frame_count, scene_state, width, height) {
            Ok(data) => Ok(FrameBuffer::new(
                data,
                width,
                height,
                self.config.format,
                Timestamp::now(),
                slot,
            )),
            Err(err) => {
                self.pool.checkin(slot);
                Err(CaptureError::hardware(format!("stub render failed: {}", err)))
            }
        }
    }

    fn release(&self, frame: FrameBuffer) {
        self.pool.checkin(frame.slot());
    }

    fn pixel_format(&self) -> PixelFormat {
        self.config.format
    }

    fn configure(&self, size: FrameSize) -> CaptureResult<()> {
        let mut state = self.lock();
        if state.frame_size != size {
            log::info!("stub sensor frame size {:?} -> {:?}", state.frame_size, size);
            state.frame_size = size;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("stub://{} ({})", self.config.format, self.pool.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_differ_between_acquisitions() {
        let source = StubSource::new(StubConfig::small(PixelFormat::Rgb888));
        let a = source.acquire().unwrap();
        let b = source.acquire().unwrap();
        assert_ne!(a.data(), b.data());
        assert_eq!(a.len(), 160 * 120 * 3);
        source.release(a);
        source.release(b);
        assert_eq!(source.buffers_in_use(), 0);
    }

    #[test]
    fn jpeg_stub_emits_jpeg() {
        let source = StubSource::new(StubConfig::small(PixelFormat::Jpeg));
        let frame = source.acquire().unwrap();
        assert!(frame.is_jpeg());
        assert_eq!(&frame.data()[..2], &[0xFF, 0xD8]);
        source.release(frame);
    }

    #[test]
    fn pool_starves_when_frames_are_held() {
        let source = StubSource::new(StubConfig::small(PixelFormat::Grayscale));
        let a = source.acquire().unwrap();
        let b = source.acquire().unwrap();
        assert!(source.acquire().is_err());
        source.release(a);
        let c = source.acquire().unwrap();
        source.release(b);
        source.release(c);
    }

    #[test]
    fn injected_failures_then_recovery() {
        let source = StubSource::new(StubConfig::small(PixelFormat::Jpeg));
        source.fail_next(2);
        assert!(source.acquire().is_err());
        assert!(source.acquire().is_err());
        let frame = source.acquire().unwrap();
        source.release(frame);
        assert_eq!(source.frames_generated(), 1);
    }

    #[test]
    fn configure_changes_dimensions() {
        let source = StubSource::new(StubConfig::small(PixelFormat::Grayscale));
        source.configure(FrameSize::Qvga).unwrap();
        let frame = source.acquire().unwrap();
        assert_eq!((frame.width, frame.height), (320, 240));
        source.release(frame);
    }
}
