//! Delivery attempts to the remote collector.
//!
//! The uploader talks to the network only through [`Transport`], so tests can
//! script failures without sockets. [`HttpTransport`] is the production
//! implementation.

mod endpoint;
mod http;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CaptureResult;

pub use endpoint::{normalize_gateway, registration_url, Scheme, UploadEndpoint};
pub use http::{HttpTransport, HttpTransportConfig};

/// Body and optional identity headers for one upload POST.
#[derive(Clone, Copy, Debug)]
pub struct UploadRequest<'a> {
    pub body: &'a [u8],
    pub api_key: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub stream_url: Option<&'a str>,
}

pub trait Transport: Send + Sync {
    /// One delivery attempt. `Ok` carries the 2xx status.
    fn deliver(&self, endpoint: &UploadEndpoint, request: &UploadRequest<'_>) -> CaptureResult<u16>;

    /// Announce the live stream URL to the gateway.
    fn register_stream(
        &self,
        gateway: &str,
        device_id: &str,
        stream_url: &str,
        api_key: Option<&str>,
    ) -> CaptureResult<u16>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn deliver(
        &self,
        endpoint: &UploadEndpoint,
        request: &UploadRequest<'_>,
    ) -> CaptureResult<u16> {
        (**self).deliver(endpoint, request)
    }

    fn register_stream(
        &self,
        gateway: &str,
        device_id: &str,
        stream_url: &str,
        api_key: Option<&str>,
    ) -> CaptureResult<u16> {
        (**self).register_stream(gateway, device_id, stream_url, api_key)
    }
}

/// "Is the network up" predicate consulted before each capture.
pub trait Connectivity: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Hosts with a wired or always-on link.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_reachable(&self) -> bool {
        true
    }
}

/// Link state driven by an external watcher (or a test).
#[derive(Clone, Debug)]
pub struct LinkFlag(Arc<AtomicBool>);

impl LinkFlag {
    pub fn new(up: bool) -> Self {
        Self(Arc::new(AtomicBool::new(up)))
    }

    pub fn set(&self, up: bool) {
        self.0.store(up, Ordering::SeqCst);
    }
}

impl Connectivity for LinkFlag {
    fn is_reachable(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
