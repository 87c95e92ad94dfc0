//! Live MJPEG stream session.
//!
//! One session serves one accepted connection as an endless
//! `multipart/x-mixed-replace` body:
//!
//! ```text
//! AWAIT_FRAME -> SEND_BOUNDARY -> SEND_HEADER -> SEND_BODY -> AWAIT_FRAME
//!      \______________\______________\______________\______-> CLOSED
//! ```
//!
//! Non-JPEG frames are encoded and released before anything is written, so a
//! slow client only ever holds heap bytes, never a hardware buffer. Whatever
//! is still held when a write fails is released exactly once.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::PoisonError;
use std::time::Instant;

use crate::encode::{prepare_for_wire, Encoded, JpegQuality};
use crate::error::CaptureError;
use crate::frame::{FrameSource, Timestamp};
use crate::rate::SharedRateFilter;

pub const PART_BOUNDARY: &str = "123456789000000000000987654321";
pub const STREAM_CONTENT_TYPE: &str =
    "multipart/x-mixed-replace;boundary=123456789000000000000987654321";
const STREAM_BOUNDARY: &str = "\r\n--123456789000000000000987654321\r\n";

/// Per-part header carrying length and capture time.
pub fn part_header(len: usize, timestamp: Timestamp) -> String {
    format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\nX-Timestamp: {}\r\n\r\n",
        len, timestamp
    )
}

/// HTTP response head sent once before the first part.
pub fn write_stream_head<W: Write>(out: &mut W) -> std::io::Result<()> {
    let head = format!(
        concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: {}\r\n",
            "Access-Control-Allow-Origin: *\r\n",
            "X-Framerate: 60\r\n",
            "Cache-Control: no-store\r\n",
            "Connection: close\r\n\r\n",
        ),
        STREAM_CONTENT_TYPE
    );
    out.write_all(head.as_bytes())?;
    out.flush()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    AwaitFrame,
    SendBoundary,
    SendHeader,
    SendBody,
    Closed,
}

#[derive(Debug)]
pub enum SessionEnd {
    ClientDisconnected(CaptureError),
    /// Camera or encoder failed while waiting for the next frame.
    SourceFailed(CaptureError),
    Shutdown,
}

#[derive(Debug)]
pub struct SessionReport {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub end: SessionEnd,
}

pub struct StreamSession<'a> {
    source: &'a dyn FrameSource,
    rate: &'a SharedRateFilter,
    shutdown: Option<&'a AtomicBool>,
    quality: JpegQuality,
    state: SessionState,
    last_frame: Instant,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<'a> StreamSession<'a> {
    pub fn new(source: &'a dyn FrameSource, rate: &'a SharedRateFilter) -> Self {
        Self {
            source,
            rate,
            shutdown: None,
            quality: JpegQuality::STREAM,
            state: SessionState::AwaitFrame,
            last_frame: Instant::now(),
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    /// End the session between parts once `flag` is set.
    pub fn with_shutdown(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the client goes away, the camera fails, or
    /// shutdown is requested. Does not write the HTTP response head.
    pub fn run<W: Write>(&mut self, out: &mut W) -> SessionReport {
        let end = loop {
            if self.shutdown.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                break SessionEnd::Shutdown;
            }

            self.state = SessionState::AwaitFrame;
            let encoded = match self
                .source
                .acquire()
                .and_then(|frame| prepare_for_wire(self.source, frame, self.quality))
            {
                Ok(encoded) => encoded,
                Err(err) => {
                    log::error!("stream frame unavailable: {}", err);
                    break SessionEnd::SourceFailed(err);
                }
            };

            let sent = self.send_part(out, &encoded);
            let len = encoded.len();
            encoded.release_to(self.source);
            if let Err(err) = sent {
                log::info!("stream send failed after {} frames: {}", self.frames_sent, err);
                break SessionEnd::ClientDisconnected(err);
            }

            self.frames_sent += 1;
            self.bytes_sent += len as u64;
            let now = Instant::now();
            let frame_ms = now
                .duration_since(self.last_frame)
                .as_millis()
                .min(u128::from(u32::MAX)) as u32;
            self.last_frame = now;
            let avg_ms = self
                .rate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(frame_ms);
            log::debug!(
                "MJPG: {}B {}ms ({:.1}fps), AVG: {}ms ({:.1}fps)",
                len,
                frame_ms,
                fps(frame_ms),
                avg_ms,
                fps(avg_ms)
            );
        };
        self.state = SessionState::Closed;
        SessionReport {
            frames_sent: self.frames_sent,
            bytes_sent: self.bytes_sent,
            end,
        }
    }

    fn send_part<W: Write>(&mut self, out: &mut W, encoded: &Encoded) -> Result<(), CaptureError> {
        self.state = SessionState::SendBoundary;
        out.write_all(STREAM_BOUNDARY.as_bytes())
            .map_err(|e| CaptureError::disconnected(e.to_string()))?;

        self.state = SessionState::SendHeader;
        let header = part_header(encoded.len(), encoded.timestamp());
        out.write_all(header.as_bytes())
            .map_err(|e| CaptureError::disconnected(e.to_string()))?;

        self.state = SessionState::SendBody;
        out.write_all(encoded.bytes())
            .and_then(|_| out.flush())
            .map_err(|e| CaptureError::disconnected(e.to_string()))
    }
}

fn fps(frame_ms: u32) -> f64 {
    if frame_ms == 0 {
        0.0
    } else {
        1000.0 / f64::from(frame_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::ingest::{CountingSource, StubConfig, StubSource};
    use crate::rate::RateFilter;
    use std::io;

    /// Accepts `budget` writes, then fails like a closed socket.
    struct FlakyWriter {
        budget: usize,
        written: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"));
            }
            self.budget -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_until_write(
        format: PixelFormat,
        budget: usize,
    ) -> (CountingSource<StubSource>, SessionReport, Vec<u8>) {
        let source = CountingSource::new(StubSource::new(StubConfig::small(format)));
        let rate = RateFilter::shared(20);
        let mut out = FlakyWriter {
            budget,
            written: Vec::new(),
        };
        let report = StreamSession::new(&source, &rate).run(&mut out);
        (source, report, out.written)
    }

    #[test]
    fn every_acquire_is_released_whichever_write_fails() {
        for format in [PixelFormat::Jpeg, PixelFormat::Rgb888] {
            for budget in 0..9 {
                let (source, report, _) = run_until_write(format, budget);
                assert!(matches!(report.end, SessionEnd::ClientDisconnected(_)));
                assert_eq!(source.acquires(), source.releases(), "{} {}", format, budget);
                assert_eq!(source.inner().buffers_in_use(), 0);
            }
        }
    }

    #[test]
    fn parts_carry_boundary_length_and_timestamp() {
        // Two full parts (3 writes each) before the failure.
        let (_, report, written) = run_until_write(PixelFormat::Jpeg, 6);
        assert_eq!(report.frames_sent, 2);
        let text = String::from_utf8_lossy(&written);
        assert_eq!(text.matches("--123456789000000000000987654321\r\n").count(), 2);
        assert_eq!(text.matches("Content-Type: image/jpeg\r\n").count(), 2);
        let header_start = text.find("Content-Length: ").unwrap();
        let line_end = header_start + text[header_start..].find("\r\n").unwrap();
        let len_line = &text[header_start..line_end];
        let len: u64 = len_line["Content-Length: ".len()..].parse().unwrap();
        assert_eq!(len * 2, report.bytes_sent);
        let ts_start = text.find("X-Timestamp: ").unwrap() + "X-Timestamp: ".len();
        let ts_end = ts_start + text[ts_start..].find("\r\n").unwrap();
        let (_, micros) = text[ts_start..ts_end].split_once('.').unwrap();
        assert_eq!(micros.len(), 6);
    }

    #[test]
    fn successful_parts_feed_the_rate_filter() {
        let rate = RateFilter::shared(20);
        let source = StubSource::new(StubConfig::small(PixelFormat::Jpeg));
        let mut out = FlakyWriter {
            budget: 9,
            written: Vec::new(),
        };
        StreamSession::new(&source, &rate).run(&mut out);
        assert_eq!(rate.lock().unwrap().count(), 3);
    }

    #[test]
    fn camera_failure_closes_session() {
        let source = CountingSource::new(StubSource::new(StubConfig::small(PixelFormat::Jpeg)));
        source.inner().fail_next(1);
        let rate = RateFilter::shared(20);
        let mut out = Vec::new();
        let mut session = StreamSession::new(&source, &rate);
        let report = session.run(&mut out);
        assert!(matches!(report.end, SessionEnd::SourceFailed(_)));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(source.acquires(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn shutdown_flag_stops_before_next_frame() {
        let source = StubSource::new(StubConfig::small(PixelFormat::Jpeg));
        let rate = RateFilter::shared(20);
        let flag = AtomicBool::new(true);
        let mut out = Vec::new();
        let report = StreamSession::new(&source, &rate)
            .with_shutdown(&flag)
            .run(&mut out);
        assert!(matches!(report.end, SessionEnd::Shutdown));
        assert_eq!(report.frames_sent, 0);
    }

    #[test]
    fn stream_head_advertises_multipart() {
        let mut out = Vec::new();
        write_stream_head(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains(STREAM_CONTENT_TYPE));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
