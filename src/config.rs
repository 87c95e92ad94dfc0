use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::{FrameSize, PixelFormat};
use crate::ingest::SourceOptions;
use crate::queue::{EvictionPolicy, DEFAULT_CAPACITY};
use crate::settings::{UploadSettings, DEFAULT_INTERVAL_MS, DEFAULT_MAX_ATTEMPTS};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_FB_COUNT: usize = 2;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 50;
const DEFAULT_QUEUE_DIR: &str = "spool";

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    listen_addr: Option<String>,
    settings_path: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    queue: Option<QueueConfigFile>,
    uploader: Option<UploaderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    pixel_format: Option<PixelFormat>,
    frame_size: Option<FrameSize>,
    fb_count: Option<usize>,
    acquire_timeout_ms: Option<u64>,
    frame_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    dir: Option<PathBuf>,
    capacity: Option<usize>,
    enabled: Option<bool>,
    eviction: Option<EvictionPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct UploaderConfigFile {
    gateway: Option<String>,
    url: Option<String>,
    api_key: Option<String>,
    device_id: Option<String>,
    stream_url: Option<String>,
    interval_ms: Option<u64>,
    quality: Option<u8>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: String,
    /// Where runtime settings are persisted. `None` keeps them in memory.
    pub settings_path: Option<PathBuf>,
    pub source: SourceSettings,
    pub queue: QueueSettings,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    pub fb_count: usize,
    pub acquire_timeout: Duration,
    pub frame_interval: Duration,
}

impl SourceSettings {
    pub fn options(&self) -> SourceOptions {
        SourceOptions {
            pixel_format: self.pixel_format,
            frame_size: self.frame_size,
            fb_count: self.fb_count,
            acquire_timeout: self.acquire_timeout,
            frame_interval: self.frame_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub dir: PathBuf,
    pub capacity: usize,
    pub enabled: bool,
    pub eviction: EvictionPolicy,
}

impl RelayConfig {
    /// JSON file named by `RELAY_CONFIG`, then `RELAY_*` overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like [`RelayConfig::load`] with an explicit file (e.g. from `--config`).
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let listen_addr = file
            .listen_addr
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            pixel_format: source_file.pixel_format.unwrap_or_default(),
            frame_size: source_file.frame_size.unwrap_or_default(),
            fb_count: source_file.fb_count.unwrap_or(DEFAULT_FB_COUNT),
            acquire_timeout: Duration::from_millis(
                source_file
                    .acquire_timeout_ms
                    .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS),
            ),
            frame_interval: Duration::from_millis(
                source_file
                    .frame_interval_ms
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
        };
        let queue_file = file.queue.unwrap_or_default();
        let queue = QueueSettings {
            dir: queue_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_QUEUE_DIR)),
            capacity: queue_file.capacity.unwrap_or(DEFAULT_CAPACITY),
            enabled: queue_file.enabled.unwrap_or(true),
            eviction: queue_file.eviction.unwrap_or_default(),
        };
        let up = file.uploader.unwrap_or_default();
        let defaults = UploadSettings::default();
        let upload = UploadSettings {
            gateway: up.gateway,
            url: up.url,
            api_key: up.api_key,
            device_id: up.device_id.unwrap_or_default(),
            stream_url: up.stream_url,
            interval_ms: up.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS),
            frame_size: source.frame_size,
            quality: up.quality.unwrap_or(defaults.quality),
            queue_enabled: queue.enabled,
            queue_capacity: queue.capacity,
            max_attempts: up.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        };
        Ok(Self {
            listen_addr,
            settings_path: file.settings_path,
            source,
            queue,
            upload,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_non_empty("RELAY_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(url) = env_non_empty("RELAY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(format) = env_non_empty("RELAY_PIXEL_FORMAT") {
            self.source.pixel_format = format.parse()?;
        }
        if let Some(size) = env_non_empty("RELAY_FRAME_SIZE") {
            self.source.frame_size = size.parse()?;
            self.upload.frame_size = self.source.frame_size;
        }
        if let Some(dir) = env_non_empty("RELAY_QUEUE_DIR") {
            self.queue.dir = PathBuf::from(dir);
        }
        if let Some(capacity) = env_non_empty("RELAY_QUEUE_CAPACITY") {
            self.queue.capacity = capacity
                .parse()
                .map_err(|_| anyhow!("RELAY_QUEUE_CAPACITY must be a positive integer"))?;
            self.upload.queue_capacity = self.queue.capacity;
        }
        if let Some(enabled) = env_non_empty("RELAY_QUEUE_ENABLED") {
            self.queue.enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("RELAY_QUEUE_ENABLED must be true or false"))?;
            self.upload.queue_enabled = self.queue.enabled;
        }
        if let Some(path) = env_non_empty("RELAY_SETTINGS_PATH") {
            self.settings_path = Some(PathBuf::from(path));
        }
        if let Some(gateway) = env_non_empty("RELAY_GATEWAY") {
            self.upload.gateway = Some(gateway);
        }
        if let Some(url) = env_non_empty("RELAY_UPLOAD_URL") {
            self.upload.url = Some(url);
        }
        if let Some(key) = env_non_empty("RELAY_API_KEY") {
            self.upload.api_key = Some(key);
        }
        if let Some(id) = env_non_empty("RELAY_DEVICE_ID") {
            self.upload.device_id = id;
        }
        if let Some(url) = env_non_empty("RELAY_STREAM_URL") {
            self.upload.stream_url = Some(url);
        }
        if let Some(interval) = env_non_empty("RELAY_INTERVAL_MS") {
            self.upload.interval_ms = interval.parse().map_err(|_| {
                anyhow!("RELAY_INTERVAL_MS must be an integer number of milliseconds")
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.fb_count == 0 {
            return Err(anyhow!("source.fb_count must be at least 1"));
        }
        if self.queue.capacity == 0 {
            return Err(anyhow!("queue.capacity must be at least 1"));
        }
        if self.upload.quality > crate::encode::SENSOR_QUALITY_MAX {
            return Err(anyhow!(
                "uploader.quality must be between 0 and {}",
                crate::encode::SENSOR_QUALITY_MAX
            ));
        }
        self.listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("invalid listen_addr '{}': {}", self.listen_addr, e))?;
        if let Some(url) = self.upload.url.as_deref().filter(|u| !u.trim().is_empty()) {
            crate::transport::UploadEndpoint::parse(url)?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
