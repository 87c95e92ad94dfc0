//! Frame Relay
//!
//! Capture-delivery pipeline for a camera node: serve live video to directly
//! connected clients as an HTTP multipart stream, and push periodic stills to
//! a remote collector over an unreliable link without losing frames or growing
//! without bound.
//!
//! # Module Structure
//!
//! - `frame`: FrameBuffer ownership and the FrameSource contract
//! - `ingest`: Frame sources (synthetic sensor, upstream MJPEG camera)
//! - `encode`: JPEG encoding and the borrowed/owned wire representation
//! - `rate`: Moving average of frame intervals
//! - `stream`: Live MJPEG stream session state machine
//! - `api`: Blocking HTTP server hosting stream sessions
//! - `transport`: Delivery attempts (DNS, TCP probe, HTTP POST)
//! - `queue`: Filesystem-backed store-and-forward slots
//! - `uploader`: Capture, retry with backoff, spill and drain
//! - `settings` / `config`: Runtime settings store and daemon configuration

pub mod api;
pub mod clock;
pub mod config;
pub mod encode;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod queue;
pub mod rate;
pub mod settings;
pub mod stream;
pub mod transport;
pub mod uploader;

pub use clock::{Clock, ManualClock, SystemClock};
pub use encode::{prepare_for_wire, Encoded, Encoder, JpegQuality};
pub use error::{CaptureError, CaptureResult};
pub use frame::{FrameBuffer, FrameSize, FrameSource, PixelFormat, Timestamp};
pub use ingest::{open_source, MjpegSource, SourceOptions, StubSource};
pub use queue::{DrainReport, Enqueued, EvictionPolicy, PersistentQueue};
pub use rate::{RateFilter, SharedRateFilter};
pub use settings::{SettingsStore, UploadSettings};
pub use stream::{SessionEnd, SessionReport, StreamSession};
pub use transport::{Connectivity, HttpTransport, Transport, UploadEndpoint, UploadRequest};
pub use uploader::{CycleOutcome, SharedQueue, Uploader, UploaderLauncher, UploaderStats};
