use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use frame_relay::config::RelayConfig;
use frame_relay::queue::EvictionPolicy;
use frame_relay::{FrameSize, PixelFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RELAY_CONFIG",
        "RELAY_LISTEN_ADDR",
        "RELAY_SOURCE_URL",
        "RELAY_PIXEL_FORMAT",
        "RELAY_FRAME_SIZE",
        "RELAY_QUEUE_DIR",
        "RELAY_QUEUE_CAPACITY",
        "RELAY_QUEUE_ENABLED",
        "RELAY_SETTINGS_PATH",
        "RELAY_GATEWAY",
        "RELAY_UPLOAD_URL",
        "RELAY_API_KEY",
        "RELAY_DEVICE_ID",
        "RELAY_STREAM_URL",
        "RELAY_INTERVAL_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let queue_dir = file.path().with_extension("spool");
    let json = format!(
        r#"{{
            "listen_addr": "0.0.0.0:9081",
            "source": {{
                "url": "stub://porch",
                "pixel_format": "rgb565",
                "frame_size": "SVGA",
                "fb_count": 3,
                "acquire_timeout_ms": 2000
            }},
            "queue": {{
                "dir": "{}",
                "capacity": 4,
                "eviction": "oldest"
            }},
            "uploader": {{
                "gateway": "192.168.1.16:3000",
                "api_key": "changeme",
                "interval_ms": 1000,
                "quality": 20
            }}
        }}"#,
        queue_dir.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("RELAY_DEVICE_ID", "cam-porch");
    std::env::set_var("RELAY_INTERVAL_MS", "750");
    std::env::set_var("RELAY_QUEUE_ENABLED", "false");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.listen_addr, "0.0.0.0:9081");
    assert_eq!(cfg.source.url, "stub://porch");
    assert_eq!(cfg.source.pixel_format, PixelFormat::Rgb565);
    assert_eq!(cfg.source.frame_size, FrameSize::Svga);
    assert_eq!(cfg.source.fb_count, 3);
    assert_eq!(cfg.source.acquire_timeout, Duration::from_secs(2));
    assert_eq!(cfg.queue.dir, queue_dir);
    assert_eq!(cfg.queue.capacity, 4);
    assert_eq!(cfg.queue.eviction, EvictionPolicy::Oldest);
    assert!(!cfg.queue.enabled);
    assert!(!cfg.upload.queue_enabled);
    assert_eq!(cfg.upload.gateway.as_deref(), Some("192.168.1.16:3000"));
    assert_eq!(cfg.upload.api_key.as_deref(), Some("changeme"));
    assert_eq!(cfg.upload.device_id, "cam-porch");
    assert_eq!(cfg.upload.interval_ms, 750);
    assert_eq!(cfg.upload.quality, 20);
    assert_eq!(cfg.upload.frame_size, FrameSize::Svga);

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RelayConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://camera");
    assert_eq!(cfg.queue.capacity, 10);
    assert_eq!(cfg.queue.eviction, EvictionPolicy::SlotZero);
    assert_eq!(cfg.upload.max_attempts, 5);
    assert!(cfg.upload.gateway.is_none());
    assert!(cfg.settings_path.is_none());

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_INTERVAL_MS", "soon");
    assert!(RelayConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_UPLOAD_URL", "ftp://collector/upload");
    assert!(RelayConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_LISTEN_ADDR", "not-an-address");
    assert!(RelayConfig::load().is_err());
    clear_env();
}
