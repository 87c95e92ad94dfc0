//! HTTP(S) delivery over one long-lived `ureq::Agent`.
//!
//! Each attempt runs DNS resolution and a plain TCP connect against the target
//! before the real request, so a firewalled or dead collector fails in
//! `probe_timeout` instead of after a full TLS handshake attempt. The agent is
//! shared across attempts and cycles and keeps its connection pool warm.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::endpoint::{registration_url, UploadEndpoint};
use super::{Transport, UploadRequest};
use crate::error::{CaptureError, CaptureResult};

#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    pub probe_timeout: Duration,
    /// Upper bound for one POST, connect through response body.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            user_agent: format!("frame-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub struct HttpTransport {
    agent: ureq::Agent,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build();
        Self { agent, config }
    }

    fn resolve(&self, endpoint: &UploadEndpoint) -> CaptureResult<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| CaptureError::transport(format!("dns {}: {}", endpoint.host, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(CaptureError::transport(format!(
                "dns {}: no addresses",
                endpoint.host
            )));
        }
        Ok(addrs)
    }

    fn probe(&self, endpoint: &UploadEndpoint, addrs: &[SocketAddr]) -> CaptureResult<SocketAddr> {
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(addr, self.config.probe_timeout) {
                Ok(_) => return Ok(*addr),
                Err(err) => last_err = Some(err),
            }
        }
        Err(CaptureError::transport(format!(
            "tcp probe {}:{} failed: {}",
            endpoint.host,
            endpoint.port,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no address".to_string())
        )))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(HttpTransportConfig::default())
    }
}

impl Transport for HttpTransport {
    fn deliver(
        &self,
        endpoint: &UploadEndpoint,
        request: &UploadRequest<'_>,
    ) -> CaptureResult<u16> {
        let addrs = self.resolve(endpoint)?;
        let reachable = self.probe(endpoint, &addrs)?;
        log::debug!("probe ok {} via {}", endpoint, reachable);

        let url = endpoint.url();
        let mut req = self
            .agent
            .post(&url)
            .set("Content-Type", "application/octet-stream");
        if let Some(key) = request.api_key {
            req = req.set("X-API-KEY", key);
        }
        if let Some(stream_url) = request.stream_url {
            req = req.set("X-STREAM-URL", stream_url);
        }
        if let Some(device_id) = request.device_id {
            req = req.set("X-DEVICE-ID", device_id);
        }

        match req.send_bytes(request.body) {
            Ok(response) => {
                let status = response.status();
                let body = response.into_string().unwrap_or_default();
                log::info!("POST {} -> {}", status, url);
                log::debug!("response: {}", body);
                if (200..300).contains(&status) {
                    Ok(status)
                } else {
                    Err(CaptureError::transport(format!("POST {} returned {}", url, status)))
                }
            }
            Err(ureq::Error::Status(status, _)) => Err(CaptureError::transport(format!(
                "POST {} returned {}",
                url, status
            ))),
            Err(ureq::Error::Transport(err)) => {
                Err(CaptureError::transport(format!("POST {}: {}", url, err)))
            }
        }
    }

    fn register_stream(
        &self,
        gateway: &str,
        device_id: &str,
        stream_url: &str,
        api_key: Option<&str>,
    ) -> CaptureResult<u16> {
        let url = registration_url(gateway, device_id);
        let body = serde_json::json!({ "url": stream_url }).to_string();
        let mut req = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json");
        if let Some(key) = api_key {
            req = req.set("X-API-KEY", key);
        }
        match req.send_string(&body) {
            Ok(response) if (200..300).contains(&response.status()) => Ok(response.status()),
            Ok(response) => Err(CaptureError::transport(format!(
                "register {} returned {}",
                url,
                response.status()
            ))),
            Err(ureq::Error::Status(status, _)) => Err(CaptureError::transport(format!(
                "register {} returned {}",
                url, status
            ))),
            Err(ureq::Error::Transport(err)) => {
                Err(CaptureError::transport(format!("register {}: {}", url, err)))
            }
        }
    }
}
