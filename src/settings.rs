//! Runtime-tunable upload settings.
//!
//! The uploader takes a fresh [`SettingsStore::snapshot`] every cycle, so an
//! operator change (gateway, interval, frame size) applies on the next capture
//! without a restart. When backed by a file, every change is written through
//! atomically.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encode::{JpegQuality, SENSOR_QUALITY_MAX};
use crate::frame::FrameSize;
use crate::queue::{EvictionPolicy, PersistentQueue, DEFAULT_CAPACITY};

pub const MIN_INTERVAL_MS: u64 = 100;
pub const DEFAULT_INTERVAL_MS: u64 = 500;
pub const DEFAULT_SENSOR_QUALITY: u8 = 12;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Gateway host or base URL; uploads go to `<gateway>/upload`.
    pub gateway: Option<String>,
    /// Full upload URL, overrides `gateway` for uploads.
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Empty means "derive from the host name".
    pub device_id: String,
    pub stream_url: Option<String>,
    pub interval_ms: u64,
    pub frame_size: FrameSize,
    /// Sensor scale: 0 best .. 63 worst.
    pub quality: u8,
    pub queue_enabled: bool,
    pub queue_capacity: usize,
    pub max_attempts: u32,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            gateway: None,
            url: None,
            api_key: None,
            device_id: String::new(),
            stream_url: None,
            interval_ms: DEFAULT_INTERVAL_MS,
            frame_size: FrameSize::Vga,
            quality: DEFAULT_SENSOR_QUALITY,
            queue_enabled: true,
            queue_capacity: DEFAULT_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl UploadSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn jpeg_quality(&self) -> JpegQuality {
        JpegQuality::from_sensor_scale(self.quality)
    }

    /// Whether an upload target is configured at all.
    pub fn has_endpoint(&self) -> bool {
        non_empty(&self.url).is_some() || non_empty(&self.gateway).is_some()
    }

    pub fn gateway(&self) -> Option<&str> {
        non_empty(&self.gateway)
    }

    pub fn url(&self) -> Option<&str> {
        non_empty(&self.url)
    }

    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    pub fn stream_url(&self) -> Option<&str> {
        non_empty(&self.stream_url)
    }

    /// Open the spool in `dir` with the saved capacity, or a disabled queue
    /// when queueing is switched off. Capacity is fixed for the life of the
    /// returned queue.
    pub fn open_queue(&self, dir: &Path, policy: EvictionPolicy) -> PersistentQueue {
        if self.queue_enabled {
            PersistentQueue::open(dir, self.queue_capacity, policy)
        } else {
            log::info!("persistent queue disabled by settings");
            PersistentQueue::disabled(self.queue_capacity)
        }
    }

    fn normalize(&mut self) {
        self.interval_ms = self.interval_ms.max(MIN_INTERVAL_MS);
        self.quality = self.quality.min(SENSOR_QUALITY_MAX);
        self.queue_capacity = self.queue_capacity.max(1);
        self.max_attempts = self.max_attempts.max(1);
        for field in [
            &mut self.gateway,
            &mut self.url,
            &mut self.api_key,
            &mut self.stream_url,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        self.device_id = self.device_id.trim().to_string();
        if self.device_id.is_empty() {
            self.device_id = default_device_id();
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<RwLock<UploadSettings>>,
    path: Option<PathBuf>,
}

impl SettingsStore {
    /// Volatile store, lost on restart.
    pub fn in_memory(initial: UploadSettings) -> Self {
        let mut initial = initial;
        initial.normalize();
        Self {
            inner: Arc::new(RwLock::new(initial)),
            path: None,
        }
    }

    /// File-backed store. Values already saved in `path` take precedence over
    /// `defaults`; a missing file is created from `defaults`.
    pub fn open(path: impl Into<PathBuf>, defaults: UploadSettings) -> Result<Self> {
        let path = path.into();
        let mut settings = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("read settings {}", path.display()))?;
            serde_json::from_str(&raw)
                .map_err(|e| anyhow!("invalid settings file {}: {}", path.display(), e))?
        } else {
            defaults
        };
        settings.normalize();
        persist(&path, &settings)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(settings)),
            path: Some(path),
        })
    }

    pub fn snapshot(&self) -> UploadSettings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `change`, clamp, and write through. The in-memory value is kept
    /// even if persisting fails.
    pub fn update<F>(&self, change: F) -> Result<UploadSettings>
    where
        F: FnOnce(&mut UploadSettings),
    {
        let updated = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            change(&mut guard);
            guard.normalize();
            guard.clone()
        };
        if let Some(path) = &self.path {
            persist(path, &updated)?;
        }
        Ok(updated)
    }

    pub fn set_gateway(&self, gateway: &str) -> Result<()> {
        let gateway = gateway.trim().to_string();
        self.update(|s| s.gateway = Some(gateway)).map(|_| ())
    }

    pub fn set_url(&self, url: &str) -> Result<()> {
        let url = url.trim().to_string();
        self.update(|s| s.url = Some(url)).map(|_| ())
    }

    pub fn set_api_key(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.update(|s| s.api_key = Some(key)).map(|_| ())
    }

    pub fn set_device_id(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.update(|s| s.device_id = id).map(|_| ())
    }

    pub fn set_stream_url(&self, url: &str) -> Result<()> {
        let url = url.trim().to_string();
        self.update(|s| s.stream_url = Some(url)).map(|_| ())
    }

    pub fn set_interval_ms(&self, ms: u64) -> Result<()> {
        self.update(|s| s.interval_ms = ms).map(|_| ())
    }

    pub fn set_frame_size(&self, size: FrameSize) -> Result<()> {
        self.update(|s| s.frame_size = size).map(|_| ())
    }

    pub fn set_quality(&self, quality: u8) -> Result<()> {
        self.update(|s| s.quality = quality).map(|_| ())
    }

    pub fn set_queue_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.queue_enabled = enabled).map(|_| ())
    }

    pub fn set_queue_capacity(&self, capacity: usize) -> Result<()> {
        self.update(|s| s.queue_capacity = capacity).map(|_| ())
    }

    pub fn set_max_attempts(&self, attempts: u32) -> Result<()> {
        self.update(|s| s.max_attempts = attempts).map(|_| ())
    }

    /// Backing file, `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn persist(path: &Path, settings: &UploadSettings) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create settings dir {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(settings)?;
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Stable per-host identifier: `relay-` plus 12 hex chars of SHA-256(hostname).
pub fn default_device_id() -> String {
    let host = fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "frame-relay".to_string());
    let digest = Sha256::digest(host.as_bytes());
    format!("relay-{}", &hex::encode(digest)[..12])
}
