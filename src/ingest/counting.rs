use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CaptureResult;
use crate::frame::{FrameBuffer, FrameSize, FrameSource, PixelFormat};

/// Acquire/release bookkeeping around any frame source.
///
/// The daemon wraps its camera in this so `/status` can show leaked buffers;
/// tests use it to check that every acquire is matched by one release.
pub struct CountingSource<S> {
    inner: S,
    acquired: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounters {
    pub acquired: u64,
    pub released: u64,
    pub failed: u64,
}

impl SourceCounters {
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

impl<S: FrameSource> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn counters(&self) -> SourceCounters {
        SourceCounters {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    pub fn acquires(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> u64 {
        self.counters().outstanding()
    }
}

impl<S: FrameSource> FrameSource for CountingSource<S> {
    fn acquire(&self) -> CaptureResult<FrameBuffer> {
        match self.inner.acquire() {
            Ok(frame) => {
                self.acquired.fetch_add(1, Ordering::SeqCst);
                Ok(frame)
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn release(&self, frame: FrameBuffer) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(frame);
    }

    fn pixel_format(&self) -> PixelFormat {
        self.inner.pixel_format()
    }

    fn configure(&self, size: FrameSize) -> CaptureResult<()> {
        self.inner.configure(size)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }

    fn usage(&self) -> Option<SourceCounters> {
        Some(self.counters())
    }
}
