//! Blocking HTTP surface for the live stream.
//!
//! `GET /stream` hands the connection to its own [`StreamSession`] thread;
//! `/capture`, `/status` and `/health` are answered inline on the accept loop.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::encode::{prepare_for_wire, JpegQuality};
use crate::frame::FrameSource;
use crate::ingest::SourceCounters;
use crate::rate::SharedRateFilter;
use crate::stream::{write_stream_head, SessionEnd, StreamSession};
use crate::uploader::{SharedQueue, StatsSnapshot, UploaderStats};

const MAX_REQUEST_BYTES: usize = 8192;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// A write blocked longer than this fails. A stream client that stops
    /// reading is dropped and its frame buffer goes back to the source.
    pub send_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8081".to_string(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Shared state the handlers read from.
#[derive(Clone)]
pub struct ServerContext {
    pub source: Arc<dyn FrameSource>,
    pub rate: SharedRateFilter,
    pub queue: Option<SharedQueue>,
    pub uploader: Option<Arc<UploaderStats>>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    active_streams: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }

    /// Stop accepting and signal every live session to end.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: ApiConfig,
    ctx: ServerContext,
    shutdown: Arc<AtomicBool>,
}

impl StreamServer {
    pub fn new(cfg: ApiConfig, ctx: ServerContext) -> Self {
        Self {
            cfg,
            ctx,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an existing process-wide shutdown flag.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid listen address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let active_streams = Arc::new(AtomicUsize::new(0));
        let shutdown = self.shutdown.clone();
        let server = Server {
            ctx: self.ctx,
            send_timeout: self.cfg.send_timeout,
            active_streams: active_streams.clone(),
            shutdown: shutdown.clone(),
        };
        let join = std::thread::Builder::new()
            .name("stream-server".to_string())
            .spawn(move || {
                if let Err(err) = server.run(listener) {
                    log::error!("stream server stopped: {}", err);
                }
            })
            .context("spawn stream server thread")?;

        Ok(ApiHandle {
            addr,
            active_streams,
            shutdown,
            join: Some(join),
        })
    }
}

struct Server {
    ctx: ServerContext,
    send_timeout: Duration,
    active_streams: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

#[derive(Serialize)]
struct StatusBody {
    source: String,
    pixel_format: String,
    frames: Option<SourceCounters>,
    avg_frame_ms: Option<u32>,
    active_streams: usize,
    queue: Option<QueueStatus>,
    uploader: Option<StatsSnapshot>,
}

#[derive(Serialize)]
struct QueueStatus {
    enabled: bool,
    capacity: usize,
    occupied: usize,
}

impl Server {
    fn run(&self, listener: TcpListener) -> Result<()> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.handle_connection(stream, peer) {
                        log::warn!("request from {} rejected: {}", peer, err);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(self.send_timeout))?;
        let request = read_request(&mut stream)?;
        if request.method != "GET" {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
            return Ok(());
        }
        match request.path.as_str() {
            "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
            "/status" => {
                let body = serde_json::to_vec(&self.status())?;
                write_response(&mut stream, 200, "application/json", &[], &body)
            }
            "/capture" => self.capture(&mut stream),
            "/stream" => self.start_stream(stream, peer),
            _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        }
    }

    fn status(&self) -> StatusBody {
        let avg_frame_ms = self
            .ctx
            .rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .average();
        let queue = self.ctx.queue.as_ref().map(|queue| {
            let queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
            QueueStatus {
                enabled: queue.is_enabled(),
                capacity: queue.capacity(),
                occupied: queue.len(),
            }
        });
        StatusBody {
            source: self.ctx.source.describe(),
            pixel_format: self.ctx.source.pixel_format().to_string(),
            frames: self.ctx.source.usage(),
            avg_frame_ms,
            active_streams: self.active_streams.load(Ordering::SeqCst),
            queue,
            uploader: self.ctx.uploader.as_ref().map(|stats| stats.snapshot()),
        }
    }

    fn capture(&self, stream: &mut TcpStream) -> Result<()> {
        let source = self.ctx.source.as_ref();
        let encoded = match source
            .acquire()
            .and_then(|frame| prepare_for_wire(source, frame, JpegQuality::STREAM))
        {
            Ok(encoded) => encoded,
            Err(err) => {
                log::error!("capture failed: {}", err);
                let body = serde_json::json!({ "error": err.kind() }).to_string();
                return write_json_response(stream, 500, &body);
            }
        };
        let timestamp = encoded.timestamp().to_string();
        let written = write_response(
            stream,
            200,
            "image/jpeg",
            &[
                ("Content-Disposition", "inline; filename=capture.jpg"),
                ("Access-Control-Allow-Origin", "*"),
                ("X-Timestamp", timestamp.as_str()),
            ],
            encoded.bytes(),
        );
        encoded.release_to(source);
        written
    }

    fn start_stream(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        write_stream_head(&mut stream)?;
        let source = self.ctx.source.clone();
        let rate = self.ctx.rate.clone();
        let shutdown = self.shutdown.clone();
        let active = self.active_streams.clone();
        active.fetch_add(1, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name(format!("stream-{}", peer))
            .spawn(move || {
                log::info!("stream client connected: {}", peer);
                let report = StreamSession::new(source.as_ref(), &rate)
                    .with_shutdown(&shutdown)
                    .run(&mut stream);
                match &report.end {
                    SessionEnd::ClientDisconnected(_) | SessionEnd::Shutdown => log::info!(
                        "stream client {} done: {} frames, {} bytes",
                        peer,
                        report.frames_sent,
                        report.bytes_sent
                    ),
                    SessionEnd::SourceFailed(err) => {
                        log::warn!("stream to {} ended by camera failure: {}", peer, err)
                    }
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });
        if let Err(err) = spawned {
            self.active_streams.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("spawn stream session: {}", err));
        }
        Ok(())
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    stream.set_read_timeout(None)?;
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", &[], body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        concat!(
            "{status_line}\r\n",
            "Content-Type: {content_type}\r\n",
            "Content-Length: {len}\r\n",
            "Cache-Control: no-store\r\n",
            "Connection: close\r\n",
        ),
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(&format!("{}: {}\r\n", name, value));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
