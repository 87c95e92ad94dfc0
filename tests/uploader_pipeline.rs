use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frame_relay::clock::ManualClock;
use frame_relay::ingest::{CountingSource, StubConfig, StubSource};
use frame_relay::queue::{EvictionPolicy, PersistentQueue};
use frame_relay::transport::{Transport, UploadEndpoint, UploadRequest};
use frame_relay::uploader::{CycleOutcome, SharedQueue, Uploader};
use frame_relay::{CaptureError, CaptureResult, PixelFormat, SettingsStore, UploadSettings};

/// Records every attempted body; outcomes come from a script, then succeed.
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<bool>>,
    attempts: Mutex<Vec<(Vec<u8>, bool)>>,
}

impl ScriptedTransport {
    fn with_script(outcomes: &[bool]) -> Self {
        let transport = Self::default();
        transport
            .script
            .lock()
            .unwrap()
            .extend(outcomes.iter().copied());
        transport
    }

    fn attempts(&self) -> Vec<(Vec<u8>, bool)> {
        self.attempts.lock().unwrap().clone()
    }

    fn delivered(&self) -> Vec<Vec<u8>> {
        self.attempts()
            .into_iter()
            .filter(|(_, ok)| *ok)
            .map(|(body, _)| body)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn deliver(
        &self,
        endpoint: &UploadEndpoint,
        request: &UploadRequest<'_>,
    ) -> CaptureResult<u16> {
        assert_eq!(endpoint.path, "/upload");
        let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
        self.attempts
            .lock()
            .unwrap()
            .push((request.body.to_vec(), ok));
        if ok {
            Ok(200)
        } else {
            Err(CaptureError::transport("collector unreachable"))
        }
    }

    fn register_stream(&self, _: &str, _: &str, _: &str, _: Option<&str>) -> CaptureResult<u16> {
        Ok(200)
    }
}

struct Harness {
    source: Arc<CountingSource<StubSource>>,
    transport: Arc<ScriptedTransport>,
    clock: Arc<ManualClock>,
    queue: SharedQueue,
    uploader: Uploader,
    _dir: tempfile::TempDir,
}

fn harness(script: &[bool]) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(CountingSource::new(StubSource::new(StubConfig::small(
        PixelFormat::Jpeg,
    ))));
    let transport = Arc::new(ScriptedTransport::with_script(script));
    let clock = Arc::new(ManualClock::new());
    let queue: SharedQueue = Arc::new(Mutex::new(PersistentQueue::open(
        dir.path().join("spool"),
        10,
        EvictionPolicy::SlotZero,
    )));
    let settings = SettingsStore::in_memory(UploadSettings {
        gateway: Some("192.168.1.16:3000".to_string()),
        device_id: "cam-test".to_string(),
        max_attempts: 5,
        ..UploadSettings::default()
    });
    let uploader = Uploader::new(
        source.clone(),
        transport.clone(),
        queue.clone(),
        settings,
        clock.clone(),
    );
    Harness {
        source,
        transport,
        clock,
        queue,
        uploader,
        _dir: dir,
    }
}

#[test]
fn fifth_attempt_succeeds_without_spilling() {
    let mut h = harness(&[false, false, false, false, true]);

    let outcome = h.uploader.run_cycle();

    assert_eq!(outcome, CycleOutcome::Delivered { attempts: 5 });
    assert_eq!(h.transport.attempts().len(), 5);
    let sleeps = h.clock.sleeps();
    assert_eq!(sleeps.len(), 4);
    assert!(sleeps.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(sleeps[0], Duration::from_millis(1000));
    assert!(h.queue.lock().unwrap().is_empty());
    assert_eq!(h.source.acquires(), 1);
    assert_eq!(h.source.releases(), 1);
}

#[test]
fn exhausted_attempts_spill_original_frame() {
    let mut h = harness(&[false; 5]);

    let outcome = h.uploader.run_cycle();

    assert!(matches!(outcome, CycleOutcome::Spilled { attempts: 5, .. }));
    let attempts = h.transport.attempts();
    assert_eq!(attempts.len(), 5);
    let queue = h.queue.lock().unwrap();
    assert_eq!(queue.occupied(), vec![0]);
    assert_eq!(queue.read_slot(0).unwrap().unwrap(), attempts[0].0);
    assert_eq!(h.source.outstanding(), 0);
    assert_eq!(h.uploader.stats().snapshot().spilled, 1);
}

#[test]
fn queued_frames_drain_after_later_success() {
    // Frames 1 and 2 fail every attempt; frame 3 gets through.
    let mut script = vec![false; 10];
    script.push(true);
    let mut h = harness(&script);

    assert!(matches!(h.uploader.run_cycle(), CycleOutcome::Spilled { slot: 0, .. }));
    assert!(matches!(h.uploader.run_cycle(), CycleOutcome::Spilled { slot: 1, .. }));
    let attempts = h.transport.attempts();
    let frame1 = attempts[0].0.clone();
    let frame2 = attempts[5].0.clone();
    assert_ne!(frame1, frame2);

    assert_eq!(h.uploader.run_cycle(), CycleOutcome::Delivered { attempts: 1 });

    let delivered = h.transport.delivered();
    assert_eq!(delivered.len(), 3);
    assert_eq!(delivered[1], frame1);
    assert_eq!(delivered[2], frame2);
    assert!(h.queue.lock().unwrap().is_empty());

    let stats = h.uploader.stats().snapshot();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.drained, 2);
    assert_eq!(h.source.acquires(), 3);
    assert_eq!(h.source.releases(), 3);
}

#[test]
fn interval_change_applies_to_next_sleep() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new(StubConfig::small(PixelFormat::Jpeg)));
    let clock = Arc::new(ManualClock::stopping_after(2));
    let settings = SettingsStore::in_memory(UploadSettings::default());
    let queue: SharedQueue = Arc::new(Mutex::new(PersistentQueue::open(
        dir.path(),
        2,
        EvictionPolicy::SlotZero,
    )));
    let mut uploader = Uploader::new(
        source,
        Arc::new(ScriptedTransport::default()),
        queue,
        settings.clone(),
        clock.clone(),
    );
    settings.set_interval_ms(250).unwrap();
    uploader.run();
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(250), Duration::from_millis(250)]
    );
}
