//! Frame sources.
//!
//! - `stub://<name>`: synthetic sensor, any pixel format (no hardware needed)
//! - `http(s)://...`: upstream MJPEG / JPEG snapshot camera
//!
//! Every source owns a fixed `BufferPool`, so holding frames for too long
//! starves later `acquire` calls exactly as a camera driver would.

mod counting;
pub mod mjpeg;
mod pool;
pub mod stub;

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use counting::{CountingSource, SourceCounters};
pub use mjpeg::{MjpegConfig, MjpegSource};
pub use pool::BufferPool;
pub use stub::{StubConfig, StubSource};

use crate::frame::{FrameSize, FrameSource, PixelFormat};

/// Options shared by every backend, taken from the daemon config.
#[derive(Clone, Debug)]
pub struct SourceOptions {
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    pub fb_count: usize,
    pub acquire_timeout: Duration,
    pub frame_interval: Duration,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Jpeg,
            frame_size: FrameSize::Vga,
            fb_count: 2,
            acquire_timeout: Duration::from_secs(5),
            frame_interval: Duration::from_millis(50),
        }
    }
}

/// Pick a backend by URL scheme.
pub fn open_source(url: &str, options: &SourceOptions) -> Result<Arc<dyn FrameSource>> {
    let parsed = Url::parse(url).with_context(|| format!("parse source url '{}'", url))?;
    match parsed.scheme() {
        "stub" => {
            let source = StubSource::new(StubConfig {
                format: options.pixel_format,
                frame_size: options.frame_size,
                fb_count: options.fb_count,
                acquire_timeout: options.acquire_timeout,
                frame_interval: options.frame_interval,
            });
            Ok(Arc::new(source))
        }
        "http" | "https" => {
            if options.pixel_format != PixelFormat::Jpeg {
                log::warn!(
                    "upstream camera always delivers jpeg; ignoring pixel_format={}",
                    options.pixel_format
                );
            }
            let source = MjpegSource::new(MjpegConfig {
                url: url.to_string(),
                fb_count: options.fb_count,
                acquire_timeout: options.acquire_timeout,
                ..MjpegConfig::default()
            });
            Ok(Arc::new(source))
        }
        other => Err(anyhow!(
            "unsupported source scheme '{}'; expected stub:// or http(s)://",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_stub_by_scheme() {
        let options = SourceOptions {
            pixel_format: PixelFormat::Grayscale,
            frame_size: FrameSize::Qqvga,
            frame_interval: Duration::ZERO,
            ..SourceOptions::default()
        };
        let source = open_source("stub://front", &options).unwrap();
        assert_eq!(source.pixel_format(), PixelFormat::Grayscale);
        let frame = source.acquire().unwrap();
        assert_eq!(frame.len(), 160 * 120);
        source.release(frame);
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(open_source("rtsp://camera/1", &SourceOptions::default()).is_err());
        assert!(open_source("not a url", &SourceOptions::default()).is_err());
    }
}
