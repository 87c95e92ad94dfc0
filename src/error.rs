//! Failure taxonomy for the capture-delivery pipeline.
//!
//! Every component reports one of these tags to its caller and handles it at
//! the boundary where it occurred. None of them is fatal to the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Camera busy or broken. Retried on the next scheduled capture.
    #[error("camera unavailable: {0}")]
    HardwareUnavailable(String),

    /// Corrupt or unsupported frame. The frame is dropped.
    #[error("jpeg encode failed: {0}")]
    EncodeFailed(String),

    /// DNS, TCP probe, TLS or HTTP level failure.
    #[error("transport failed: {0}")]
    TransportFailed(String),

    /// Persistent queue storage is unusable.
    #[error("queue storage failed: {0}")]
    StorageFailed(String),

    /// Live stream client went away (detected on send).
    #[error("client disconnected: {0}")]
    ClientDisconnected(String),
}

impl CaptureError {
    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::HardwareUnavailable(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::EncodeFailed(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportFailed(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageFailed(msg.into())
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::ClientDisconnected(msg.into())
    }

    /// Short tag used in log lines and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HardwareUnavailable(_) => "hardware_unavailable",
            Self::EncodeFailed(_) => "encode_failed",
            Self::TransportFailed(_) => "transport_failed",
            Self::StorageFailed(_) => "storage_failed",
            Self::ClientDisconnected(_) => "client_disconnected",
        }
    }
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
