//! Background store-and-forward uploader.
//!
//! ```text
//! CAPTURE -> ATTEMPT(n) -> SUCCESS  -> DRAIN -> SLEEP -> CAPTURE
//!                       -> RETRY    -> ATTEMPT(n+1)
//!                       -> GIVE_UP  -> spill -> SLEEP
//! ```
//!
//! One cycle is [`Uploader::run_cycle`]; [`Uploader::run`] adds the `SLEEP`
//! state and loops until the clock reports shutdown. Every delay goes through
//! the injected [`Clock`].

mod backoff;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::clock::Clock;
use crate::encode::{prepare_for_wire, Encoded};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{FrameSize, FrameSource};
use crate::queue::{self, Enqueued, PersistentQueue};
use crate::settings::{SettingsStore, UploadSettings};
use crate::transport::{AlwaysOnline, Connectivity, Transport, UploadEndpoint, UploadRequest};

pub use backoff::Backoff;

/// Queue shared between the uploader (sole writer) and the status endpoint.
pub type SharedQueue = Arc<Mutex<PersistentQueue>>;

/// How one pass through the state machine ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No gateway or URL configured.
    NotConfigured,
    Offline,
    CaptureFailed,
    Delivered { attempts: u32 },
    Spilled { attempts: u32, slot: usize, evicted: bool },
    /// Every attempt failed and the frame could not be queued.
    Dropped { attempts: u32 },
}

#[derive(Debug, Default)]
pub struct UploaderStats {
    captures: AtomicU64,
    capture_failures: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    spilled: AtomicU64,
    evicted: AtomicU64,
    drained: AtomicU64,
    dropped: AtomicU64,
    registered: AtomicBool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub captures: u64,
    pub capture_failures: u64,
    pub attempts: u64,
    pub delivered: u64,
    pub spilled: u64,
    pub evicted: u64,
    pub drained: u64,
    pub dropped: u64,
    pub stream_registered: bool,
}

impl UploaderStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captures: self.captures.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            spilled: self.spilled.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            stream_registered: self.registered.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Uploader {
    source: Arc<dyn FrameSource>,
    transport: Arc<dyn Transport>,
    queue: SharedQueue,
    settings: SettingsStore,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    stats: Arc<UploaderStats>,
    applied_size: Option<FrameSize>,
    drain_backoff: Backoff,
    drain_not_before: Duration,
}

impl Uploader {
    pub fn new(
        source: Arc<dyn FrameSource>,
        transport: Arc<dyn Transport>,
        queue: SharedQueue,
        settings: SettingsStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            transport,
            queue,
            settings,
            clock,
            connectivity: Arc::new(AlwaysOnline),
            stats: Arc::new(UploaderStats::default()),
            applied_size: None,
            drain_backoff: Backoff::drain_cooldown(),
            drain_not_before: Duration::ZERO,
        }
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn stats(&self) -> Arc<UploaderStats> {
        Arc::clone(&self.stats)
    }

    /// Loop until the clock reports shutdown during `SLEEP` or a backoff.
    pub fn run(&mut self) {
        log::info!("uploader started");
        loop {
            let outcome = self.run_cycle();
            log::debug!("upload cycle: {:?}", outcome);
            // Re-read so an interval change applies to this very sleep.
            let interval = self.settings.snapshot().interval();
            if !self.clock.sleep(interval) {
                break;
            }
        }
        log::info!("uploader stopped");
    }

    /// `CAPTURE` through `DRAIN`, without the trailing `SLEEP`.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let settings = self.settings.snapshot();

        if !settings.has_endpoint() {
            log::info!("upload endpoint not configured, skipping upload");
            return CycleOutcome::NotConfigured;
        }
        if !self.connectivity.is_reachable() {
            log::info!("network not reachable, skipping upload");
            return CycleOutcome::Offline;
        }

        self.apply_frame_size(settings.frame_size);

        let encoded = match self.capture(&settings) {
            Ok(encoded) => encoded,
            Err(err) => {
                UploaderStats::bump(&self.stats.capture_failures);
                log::warn!("capture failed ({}): {}", err.kind(), err);
                return CycleOutcome::CaptureFailed;
            }
        };
        UploaderStats::bump(&self.stats.captures);

        let (delivered, attempts) = self.attempt_delivery(&settings, &encoded);
        if delivered {
            encoded.release_to(self.source.as_ref());
            UploaderStats::bump(&self.stats.delivered);
            // Identity may have changed during the retries.
            let settings = self.settings.snapshot();
            self.register_stream(&settings);
            self.drain_queue(&settings);
            return CycleOutcome::Delivered { attempts };
        }

        let outcome = self.spill(&encoded, attempts);
        encoded.release_to(self.source.as_ref());
        outcome
    }

    fn capture(&self, settings: &UploadSettings) -> CaptureResult<Encoded> {
        let frame = self.source.acquire()?;
        prepare_for_wire(self.source.as_ref(), frame, settings.jpeg_quality())
    }

    fn apply_frame_size(&mut self, size: FrameSize) {
        if self.applied_size == Some(size) {
            return;
        }
        match self.source.configure(size) {
            Ok(()) => {
                log::info!("upload frame size set to {:?}", size);
                self.applied_size = Some(size);
            }
            Err(err) => log::warn!("failed to set frame size {:?}: {}", size, err),
        }
    }

    /// `ATTEMPT(1..=max)` with backoff between failures.
    /// Returns whether delivery succeeded and how many attempts were made.
    fn attempt_delivery(&self, settings: &UploadSettings, encoded: &Encoded) -> (bool, u32) {
        let max_attempts = settings.max_attempts.max(1);
        let mut backoff = Backoff::live();
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            UploaderStats::bump(&self.stats.attempts);

            // Endpoint is resolved per attempt from the current settings.
            let current = self.settings.snapshot();
            match self.deliver_once(&current, encoded.bytes()) {
                Ok(status) => {
                    log::info!(
                        "upload delivered on attempt {}/{} ({} bytes, status {})",
                        attempts,
                        max_attempts,
                        encoded.len(),
                        status
                    );
                    return (true, attempts);
                }
                Err(err) => {
                    log::warn!("upload attempt {}/{} failed: {}", attempts, max_attempts, err);
                }
            }

            if attempts < max_attempts {
                let delay = backoff.next_delay();
                log::debug!("retrying upload in {} ms", delay.as_millis());
                if !self.clock.sleep(delay) {
                    break;
                }
            }
        }
        (false, attempts)
    }

    fn deliver_once(&self, settings: &UploadSettings, body: &[u8]) -> CaptureResult<u16> {
        let endpoint = UploadEndpoint::resolve(settings.url(), settings.gateway())
            .unwrap_or_else(|| Err(CaptureError::transport("upload endpoint not configured")))?;
        let request = UploadRequest {
            body,
            api_key: settings.api_key(),
            device_id: Some(settings.device_id.as_str()).filter(|id| !id.is_empty()),
            stream_url: settings.stream_url(),
        };
        self.transport.deliver(&endpoint, &request)
    }

    /// `GIVE_UP`: keep the frame in the persistent queue if possible.
    fn spill(&self, encoded: &Encoded, attempts: u32) -> CycleOutcome {
        if !self.settings.snapshot().queue_enabled {
            log::warn!("upload failed after {} attempts, queueing off, frame dropped", attempts);
            UploaderStats::bump(&self.stats.dropped);
            return CycleOutcome::Dropped { attempts };
        }

        let result = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enqueue(encoded.bytes());
        match result {
            Ok(enqueued) => {
                UploaderStats::bump(&self.stats.spilled);
                let evicted = matches!(enqueued, Enqueued::Evicted(_));
                if evicted {
                    UploaderStats::bump(&self.stats.evicted);
                }
                log::info!(
                    "upload failed after {} attempts, spilled to slot {}",
                    attempts,
                    enqueued.slot()
                );
                CycleOutcome::Spilled {
                    attempts,
                    slot: enqueued.slot(),
                    evicted,
                }
            }
            Err(err) => {
                log::warn!("upload failed after {} attempts, frame dropped: {}", attempts, err);
                UploaderStats::bump(&self.stats.dropped);
                CycleOutcome::Dropped { attempts }
            }
        }
    }

    /// `DRAIN`: push queued frames in slot order, stopping at the first failure.
    fn drain_queue(&mut self, settings: &UploadSettings) {
        if !settings.queue_enabled {
            return;
        }
        let now = self.clock.now();
        if now < self.drain_not_before {
            log::debug!(
                "queue drain deferred for {} ms",
                (self.drain_not_before - now).as_millis()
            );
            return;
        }

        let has_backlog = {
            let guard = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            guard.is_enabled() && !guard.is_empty()
        };
        if !has_backlog {
            return;
        }

        let transport = &self.transport;
        let stats = &self.stats;
        let report = queue::drain_shared(&self.queue, |slot, bytes| {
            let Some(Ok(endpoint)) = UploadEndpoint::resolve(settings.url(), settings.gateway())
            else {
                return false;
            };
            let request = UploadRequest {
                body: bytes,
                api_key: settings.api_key(),
                device_id: Some(settings.device_id.as_str()).filter(|id| !id.is_empty()),
                stream_url: settings.stream_url(),
            };
            UploaderStats::bump(&stats.attempts);
            match transport.deliver(&endpoint, &request) {
                Ok(_) => {
                    log::info!("drained queue slot {} ({} bytes)", slot, bytes.len());
                    true
                }
                Err(err) => {
                    log::warn!("drain of slot {} failed: {}", slot, err);
                    false
                }
            }
        });

        self.stats
            .drained
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        if report.stopped_at.is_some() {
            let cooldown = self.drain_backoff.next_delay();
            self.drain_not_before = self.clock.now() + cooldown;
            log::info!(
                "queue drain stopped with {} frames left, next drain in {} ms",
                report.remaining,
                cooldown.as_millis()
            );
        } else {
            self.drain_backoff.reset();
            self.drain_not_before = Duration::ZERO;
        }
    }

    /// One-shot stream announcement, repeated each successful cycle until 2xx.
    fn register_stream(&self, settings: &UploadSettings) {
        if self.stats.registered.load(Ordering::Relaxed) {
            return;
        }
        let (Some(gateway), Some(stream_url)) = (settings.gateway(), settings.stream_url()) else {
            return;
        };
        if settings.device_id.is_empty() {
            return;
        }
        match self.transport.register_stream(
            gateway,
            &settings.device_id,
            stream_url,
            settings.api_key(),
        ) {
            Ok(status) => {
                log::info!("stream registered ({}) for {}", status, settings.device_id);
                self.stats.registered.store(true, Ordering::Relaxed);
            }
            Err(err) => log::warn!("stream registration failed: {}", err),
        }
    }
}

/// Spawns the uploader thread at most once per launcher.
#[derive(Debug, Default)]
pub struct UploaderLauncher {
    started: AtomicBool,
}

impl UploaderLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// `Ok(None)` when an uploader was already started.
    pub fn start(&self, mut uploader: Uploader) -> Result<Option<JoinHandle<()>>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("uploader already started");
            return Ok(None);
        }
        let spawned = std::thread::Builder::new()
            .name("uploader".to_string())
            .spawn(move || uploader.run())
            .context("spawn uploader thread");
        match spawned {
            Ok(handle) => Ok(Some(handle)),
            Err(err) => {
                self.started.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::PixelFormat;
    use crate::ingest::{CountingSource, StubConfig, StubSource};
    use crate::queue::EvictionPolicy;
    use crate::settings::UploadSettings;
    use crate::transport::LinkFlag;
    use std::collections::VecDeque;

    /// Plays back scripted outcomes (`false` = fail), then accepts.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<bool>>,
        bodies: Mutex<Vec<Vec<u8>>>,
        registrations: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn failing(failures: u32) -> Self {
            let transport = Self::default();
            transport.push(&vec![false; failures as usize]);
            transport
        }

        fn push(&self, outcomes: &[bool]) {
            self.script.lock().unwrap().extend(outcomes.iter().copied());
        }
    }

    impl Transport for ScriptedTransport {
        fn deliver(&self, _: &UploadEndpoint, request: &UploadRequest<'_>) -> CaptureResult<u16> {
            if self.script.lock().unwrap().pop_front() == Some(false) {
                return Err(CaptureError::transport("scripted failure"));
            }
            self.bodies.lock().unwrap().push(request.body.to_vec());
            Ok(200)
        }

        fn register_stream(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> CaptureResult<u16> {
            *self.registrations.lock().unwrap() += 1;
            Ok(201)
        }
    }

    struct Rig {
        source: Arc<CountingSource<StubSource>>,
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
        settings: SettingsStore,
        queue: SharedQueue,
        uploader: Uploader,
        _dir: tempfile::TempDir,
    }

    fn rig(failures: u32, settings: UploadSettings) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingSource::new(StubSource::new(StubConfig::small(
            PixelFormat::Jpeg,
        ))));
        let transport = Arc::new(ScriptedTransport::failing(failures));
        let clock = Arc::new(ManualClock::new());
        let settings = SettingsStore::in_memory(settings);
        let queue = Arc::new(Mutex::new(PersistentQueue::open(
            dir.path(),
            4,
            EvictionPolicy::SlotZero,
        )));
        let uploader = Uploader::new(
            source.clone(),
            transport.clone(),
            queue.clone(),
            settings.clone(),
            clock.clone(),
        );
        Rig {
            source,
            transport,
            clock,
            settings,
            queue,
            uploader,
            _dir: dir,
        }
    }

    fn configured() -> UploadSettings {
        UploadSettings {
            gateway: Some("gw.local:3000".to_string()),
            ..UploadSettings::default()
        }
    }

    #[test]
    fn unset_endpoint_skips_capture() {
        let mut rig = rig(0, UploadSettings::default());
        assert_eq!(rig.uploader.run_cycle(), CycleOutcome::NotConfigured);
        assert_eq!(rig.source.acquires(), 0);
        assert_eq!(rig.uploader.stats().snapshot().attempts, 0);
    }

    #[test]
    fn offline_link_skips_capture() {
        let rig = rig(0, configured());
        let link = LinkFlag::new(false);
        let mut uploader = rig.uploader.with_connectivity(Arc::new(link.clone()));
        assert_eq!(uploader.run_cycle(), CycleOutcome::Offline);
        link.set(true);
        assert!(matches!(uploader.run_cycle(), CycleOutcome::Delivered { .. }));
    }

    #[test]
    fn capture_failure_goes_straight_to_sleep() {
        let mut rig = rig(0, configured());
        rig.source.inner().fail_next(1);
        assert_eq!(rig.uploader.run_cycle(), CycleOutcome::CaptureFailed);
        assert!(rig.clock.sleeps().is_empty());
        assert_eq!(rig.uploader.stats().snapshot().capture_failures, 1);
    }

    #[test]
    fn retries_follow_backoff_and_release_once() {
        let mut rig = rig(2, configured());
        assert_eq!(
            rig.uploader.run_cycle(),
            CycleOutcome::Delivered { attempts: 3 }
        );
        assert_eq!(
            rig.clock.sleeps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert_eq!(rig.source.acquires(), 1);
        assert_eq!(rig.source.releases(), 1);
    }

    #[test]
    fn exhausted_frame_is_spilled_then_released() {
        let mut rig = rig(5, configured());
        let outcome = rig.uploader.run_cycle();
        assert_eq!(
            outcome,
            CycleOutcome::Spilled {
                attempts: 5,
                slot: 0,
                evicted: false
            }
        );
        assert_eq!(rig.source.outstanding(), 0);
        assert_eq!(rig.queue.lock().unwrap().len(), 1);
    }

    #[test]
    fn queueing_disabled_drops_frame() {
        let mut rig = rig(
            5,
            UploadSettings {
                queue_enabled: false,
                max_attempts: 2,
                ..configured()
            },
        );
        assert_eq!(rig.uploader.run_cycle(), CycleOutcome::Dropped { attempts: 2 });
        assert!(rig.queue.lock().unwrap().is_empty());
        assert_eq!(rig.uploader.stats().snapshot().dropped, 1);
    }

    #[test]
    fn failed_drain_defers_next_drain() {
        let mut rig = rig(0, configured());
        rig.queue.lock().unwrap().enqueue(b"old-0").unwrap();
        rig.queue.lock().unwrap().enqueue(b"old-1").unwrap();

        // Live delivery succeeds, draining slot 0 fails.
        rig.transport.push(&[true, false]);
        assert!(matches!(rig.uploader.run_cycle(), CycleOutcome::Delivered { .. }));
        assert_eq!(rig.queue.lock().unwrap().occupied(), vec![0, 1]);

        // Still inside the cool-down: live delivery only.
        assert!(matches!(rig.uploader.run_cycle(), CycleOutcome::Delivered { .. }));
        assert_eq!(rig.queue.lock().unwrap().len(), 2);
        assert_eq!(rig.transport.bodies.lock().unwrap().len(), 2);

        rig.clock.advance(Duration::from_millis(1000));
        rig.uploader.run_cycle();
        assert!(rig.queue.lock().unwrap().is_empty());
        let bodies = rig.transport.bodies.lock().unwrap();
        assert_eq!(&bodies[3..], &[b"old-0".to_vec(), b"old-1".to_vec()]);
        assert_eq!(rig.uploader.stats().snapshot().drained, 2);
    }

    /// Accepts everything and records whether the queue was locked meanwhile.
    struct LockAwareTransport {
        queue: SharedQueue,
        delivered: Mutex<u32>,
        saw_queue_locked: Mutex<u32>,
    }

    impl Transport for LockAwareTransport {
        fn deliver(&self, _: &UploadEndpoint, _: &UploadRequest<'_>) -> CaptureResult<u16> {
            if self.queue.try_lock().is_err() {
                *self.saw_queue_locked.lock().unwrap() += 1;
            }
            *self.delivered.lock().unwrap() += 1;
            Ok(200)
        }

        fn register_stream(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> CaptureResult<u16> {
            Ok(200)
        }
    }

    #[test]
    fn queue_stays_readable_while_draining() {
        let dir = tempfile::tempdir().unwrap();
        let queue: SharedQueue = Arc::new(Mutex::new(PersistentQueue::open(
            dir.path(),
            4,
            EvictionPolicy::SlotZero,
        )));
        for payload in [b"old-0", b"old-1", b"old-2"] {
            queue.lock().unwrap().enqueue(payload).unwrap();
        }
        let transport = Arc::new(LockAwareTransport {
            queue: queue.clone(),
            delivered: Mutex::new(0),
            saw_queue_locked: Mutex::new(0),
        });
        let source = Arc::new(StubSource::new(StubConfig::small(PixelFormat::Jpeg)));
        let mut uploader = Uploader::new(
            source,
            transport.clone(),
            queue.clone(),
            SettingsStore::in_memory(configured()),
            Arc::new(ManualClock::new()),
        );

        assert_eq!(uploader.run_cycle(), CycleOutcome::Delivered { attempts: 1 });
        assert_eq!(*transport.delivered.lock().unwrap(), 4);
        assert_eq!(*transport.saw_queue_locked.lock().unwrap(), 0);
        assert!(queue.lock().unwrap().is_empty());
        assert_eq!(uploader.stats().snapshot().drained, 3);
    }

    #[test]
    fn unusable_storage_drops_exhausted_frames() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"regular file").unwrap();
        let queue: SharedQueue = Arc::new(Mutex::new(PersistentQueue::open(
            blocker.join("spool"),
            4,
            EvictionPolicy::SlotZero,
        )));
        assert!(!queue.lock().unwrap().is_enabled());
        let source = Arc::new(CountingSource::new(StubSource::new(StubConfig::small(
            PixelFormat::Jpeg,
        ))));
        let mut uploader = Uploader::new(
            source.clone(),
            Arc::new(ScriptedTransport::failing(2)),
            queue,
            SettingsStore::in_memory(UploadSettings {
                max_attempts: 2,
                ..configured()
            }),
            Arc::new(ManualClock::new()),
        );

        assert_eq!(uploader.run_cycle(), CycleOutcome::Dropped { attempts: 2 });
        assert_eq!(uploader.stats().snapshot().dropped, 1);
        assert_eq!(source.outstanding(), 0);
        // Later successes skip the drain instead of failing on the dead queue.
        assert_eq!(uploader.run_cycle(), CycleOutcome::Delivered { attempts: 1 });
    }

    #[test]
    fn registers_stream_once_after_success() {
        let mut rig = rig(
            0,
            UploadSettings {
                stream_url: Some("http://cam.local:81/stream".to_string()),
                ..configured()
            },
        );
        rig.uploader.run_cycle();
        rig.uploader.run_cycle();
        assert_eq!(*rig.transport.registrations.lock().unwrap(), 1);
        assert!(rig.uploader.stats().snapshot().stream_registered);
    }

    #[test]
    fn frame_size_change_reconfigures_source() {
        let mut rig = rig(0, configured());
        rig.uploader.run_cycle();
        assert_eq!(rig.uploader.applied_size, Some(FrameSize::Vga));
        rig.settings.set_frame_size(FrameSize::Qvga).unwrap();
        rig.uploader.run_cycle();
        assert_eq!(rig.uploader.applied_size, Some(FrameSize::Qvga));
    }

    #[test]
    fn launcher_starts_only_once() {
        let rig = rig(0, UploadSettings::default());
        let launcher = UploaderLauncher::new();
        let clock = Arc::new(ManualClock::stopping_after(1));
        let make = |clock: Arc<ManualClock>| {
            Uploader::new(
                rig.source.clone(),
                rig.transport.clone(),
                rig.queue.clone(),
                rig.settings.clone(),
                clock,
            )
        };
        let handle = launcher.start(make(clock.clone())).unwrap().unwrap();
        assert!(launcher.start(make(clock)).unwrap().is_none());
        handle.join().unwrap();
        assert!(launcher.is_started());
    }
}
