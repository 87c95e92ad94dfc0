//! relayd - camera capture-delivery daemon
//!
//! This daemon:
//! 1. Opens the frame source and the persistent upload queue
//! 2. Starts the background uploader (once)
//! 3. Serves the live MJPEG stream until Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use frame_relay::api::{ApiConfig, ServerContext, StreamServer};
use frame_relay::config::RelayConfig;
use frame_relay::ingest::CountingSource;
use frame_relay::rate::{RateFilter, DEFAULT_WINDOW};
use frame_relay::{
    open_source, FrameSource, HttpTransport, SettingsStore, SystemClock, Uploader,
    UploaderLauncher,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// Address for the stream server, e.g. 0.0.0.0:8081.
    #[arg(long)]
    listen: Option<String>,
    /// Gateway host or URL; uploads go to <gateway>/upload.
    #[arg(long)]
    gateway: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        cfg.listen_addr = listen;
    }
    if let Some(gateway) = args.gateway {
        cfg.upload.gateway = Some(gateway);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        })
        .context("error setting Ctrl-C handler")?;
    }

    let camera = open_source(&cfg.source.url, &cfg.source.options())?;
    log::info!("frame source: {}", camera.describe());
    let source: Arc<dyn FrameSource> = Arc::new(CountingSource::new(camera));

    let settings = match &cfg.settings_path {
        Some(path) => SettingsStore::open(path, cfg.upload.clone())?,
        None => SettingsStore::in_memory(cfg.upload.clone()),
    };
    if let Some(path) = settings.path() {
        log::info!("settings persisted at {}", path.display());
    }
    let snapshot = settings.snapshot();
    log::info!(
        "device id {}, upload interval {} ms, endpoint {}",
        snapshot.device_id,
        snapshot.interval_ms,
        snapshot
            .url()
            .or(snapshot.gateway())
            .unwrap_or("(not configured)")
    );

    // Saved settings win over the config file. Capacity is fixed for the life
    // of the process.
    let queue = snapshot.open_queue(&cfg.queue.dir, cfg.queue.eviction);
    let queue = Arc::new(Mutex::new(queue));

    let uploader = Uploader::new(
        source.clone(),
        Arc::new(HttpTransport::default()),
        queue.clone(),
        settings,
        Arc::new(SystemClock::new(shutdown.clone())),
    );
    let stats = uploader.stats();
    let launcher = UploaderLauncher::new();
    let uploader_handle = launcher.start(uploader)?;

    let ctx = ServerContext {
        source,
        rate: RateFilter::shared(DEFAULT_WINDOW),
        queue: Some(queue),
        uploader: Some(stats),
    };
    let api_handle = StreamServer::new(
        ApiConfig {
            addr: cfg.listen_addr.clone(),
            ..ApiConfig::default()
        },
        ctx,
    )
    .with_shutdown(shutdown.clone())
    .spawn()?;
    log::info!("stream server listening on http://{}/stream", api_handle.addr);

    log::info!("relayd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    shutdown.store(true, Ordering::SeqCst);
    api_handle.stop()?;
    if let Some(handle) = uploader_handle {
        handle
            .join()
            .map_err(|_| anyhow!("uploader thread panicked"))?;
    }
    Ok(())
}
