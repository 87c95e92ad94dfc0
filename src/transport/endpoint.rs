use std::fmt;
use url::Url;

use crate::error::{CaptureError, CaptureResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Https => f.write_str("https"),
        }
    }
}

/// Delivery target resolved for a single attempt.
///
/// Rebuilt from the settings store on every attempt so an operator changing
/// the gateway takes effect on the next try.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path plus optional query, always starting with `/`.
    pub path: String,
}

impl UploadEndpoint {
    /// Parse a full URL, assuming `http://` when no scheme is given.
    pub fn parse(raw: &str) -> CaptureResult<Self> {
        let with_scheme = ensure_scheme(raw.trim());
        let url = Url::parse(&with_scheme)
            .map_err(|e| CaptureError::transport(format!("invalid upload url '{}': {}", raw, e)))?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(CaptureError::transport(format!(
                    "unsupported upload scheme '{}'",
                    other
                )))
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CaptureError::transport(format!("upload url '{}' has no host", raw)))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| CaptureError::transport("upload url has no port"))?;
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    /// Explicit upload URL wins; otherwise `<gateway>/upload`.
    /// `None` when neither is configured.
    pub fn resolve(url: Option<&str>, gateway: Option<&str>) -> Option<CaptureResult<Self>> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        if let Some(url) = url {
            return Some(Self::parse(url));
        }
        let gateway = gateway.map(str::trim).filter(|g| !g.is_empty())?;
        Some(Self::parse(&format!("{}/upload", normalize_gateway(gateway))))
    }

    pub fn url(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{}://{}:{}{}", self.scheme, host, self.port, self.path)
    }
}

impl fmt::Display for UploadEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Gateway host or URL with a scheme and without a trailing slash.
pub fn normalize_gateway(gateway: &str) -> String {
    ensure_scheme(gateway.trim())
        .trim_end_matches('/')
        .to_string()
}

/// `<gateway>/devices/<device_id>/register_stream`
pub fn registration_url(gateway: &str, device_id: &str) -> String {
    format!(
        "{}/devices/{}/register_stream",
        normalize_gateway(gateway),
        device_id.trim()
    )
}

fn ensure_scheme(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    }
}
