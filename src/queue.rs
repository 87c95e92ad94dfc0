//! Store-and-forward queue backed by fixed filesystem slots.
//!
//! Slot `i` lives at `<dir>/slot_<i>.bin`:
//!
//! ```text
//! "FQS1" | seq: u64 LE | len: u32 LE | payload (len bytes)
//! ```
//!
//! A slot is written to a temp file, synced and renamed into place, so it is
//! either absent or holds one complete frame. Anything that fails the header
//! or length check at open is removed and the slot counts as empty.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, CaptureResult};

pub const DEFAULT_CAPACITY: usize = 10;

const SLOT_MAGIC: &[u8; 4] = b"FQS1";
const HEADER_LEN: usize = 4 + 8 + 4;

/// Which occupied slot to overwrite when every slot is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Always overwrite slot 0.
    #[default]
    SlotZero,
    /// Overwrite the slot holding the earliest spilled frame.
    Oldest,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slot_zero" | "slot0" | "zero" => Ok(Self::SlotZero),
            "oldest" => Ok(Self::Oldest),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// Written to a previously empty slot.
    Stored(usize),
    /// Queue was full; this slot's previous frame was overwritten.
    Evicted(usize),
}

impl Enqueued {
    pub fn slot(&self) -> usize {
        match self {
            Self::Stored(i) | Self::Evicted(i) => *i,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    /// Slot whose delivery failed and stopped the drain.
    pub stopped_at: Option<usize>,
    /// Slots dropped because their file could not be read back.
    pub discarded: usize,
    pub remaining: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub index: usize,
    pub seq: u64,
    pub len: usize,
}

#[derive(Clone, Copy, Debug)]
struct SlotMeta {
    seq: u64,
    len: usize,
}

pub struct PersistentQueue {
    dir: PathBuf,
    capacity: usize,
    policy: EvictionPolicy,
    enabled: bool,
    slots: Vec<Option<SlotMeta>>,
    next_seq: u64,
}

impl PersistentQueue {
    /// Open (or create) the queue in `dir`.
    ///
    /// Never fails: if the directory cannot be used it is wiped and recreated
    /// once, and if that also fails the queue comes up disabled.
    pub fn open(dir: impl Into<PathBuf>, capacity: usize, policy: EvictionPolicy) -> Self {
        let dir = dir.into();
        let capacity = capacity.max(1);
        let mut queue = Self {
            dir,
            capacity,
            policy,
            enabled: false,
            slots: vec![None; capacity],
            next_seq: 0,
        };

        match init_storage(&queue.dir) {
            Ok(()) => queue.enabled = true,
            Err(err) => {
                log::warn!(
                    "queue storage at {} unusable ({}), reformatting",
                    queue.dir.display(),
                    err
                );
                match reformat(&queue.dir) {
                    Ok(()) => queue.enabled = true,
                    Err(err) => {
                        log::error!("queue disabled, reformat failed: {}", err);
                        return queue;
                    }
                }
            }
        }

        queue.load_slots(true);
        log::info!(
            "queue ready at {}: {}/{} slots occupied",
            queue.dir.display(),
            queue.len(),
            queue.capacity
        );
        queue
    }

    /// Read-only view of an existing queue directory.
    ///
    /// Nothing on disk is created, repaired or removed, so this is safe to
    /// run next to a live daemon. Invalid slots are skipped and the view
    /// refuses `enqueue` and `drain`.
    pub fn inspect(dir: impl Into<PathBuf>, capacity: usize) -> CaptureResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(CaptureError::storage(format!(
                "queue directory {} does not exist",
                dir.display()
            )));
        }
        let capacity = capacity.max(1);
        let mut queue = Self {
            dir,
            capacity,
            policy: EvictionPolicy::default(),
            enabled: false,
            slots: vec![None; capacity],
            next_seq: 0,
        };
        queue.load_slots(false);
        Ok(queue)
    }

    /// A queue that never stores anything.
    pub fn disabled(capacity: usize) -> Self {
        Self {
            dir: PathBuf::new(),
            capacity: capacity.max(1),
            policy: EvictionPolicy::default(),
            enabled: false,
            slots: vec![None; capacity.max(1)],
            next_seq: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of occupied slots in ascending order.
    pub fn occupied(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|_| i))
            .collect()
    }

    pub fn entries(&self) -> Vec<SlotInfo> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, s)| {
                s.map(|meta| SlotInfo {
                    index,
                    seq: meta.seq,
                    len: meta.len,
                })
            })
            .collect()
    }

    /// Spill one frame. Fills the first empty slot, otherwise evicts per policy.
    pub fn enqueue(&mut self, payload: &[u8]) -> CaptureResult<Enqueued> {
        if !self.enabled {
            return Err(CaptureError::storage("queue disabled"));
        }
        if payload.len() > u32::MAX as usize {
            return Err(CaptureError::storage("payload too large for a slot"));
        }

        let (index, evicted) = match self.slots.iter().position(Option::is_none) {
            Some(i) => (i, false),
            None => (self.eviction_target(), true),
        };

        let seq = self.next_seq;
        write_atomic(&self.slot_path(index), &encode_slot(seq, payload))
            .map_err(|e| CaptureError::storage(format!("write slot {}: {}", index, e)))?;
        self.next_seq += 1;
        self.slots[index] = Some(SlotMeta {
            seq,
            len: payload.len(),
        });

        if evicted {
            log::warn!("queue full, evicted slot {}", index);
            Ok(Enqueued::Evicted(index))
        } else {
            log::info!("queued frame in slot {} ({} bytes)", index, payload.len());
            Ok(Enqueued::Stored(index))
        }
    }

    /// Offer each occupied slot, in index order, to `deliver`.
    ///
    /// A slot is removed only after `deliver` returns `true`; the first `false`
    /// stops the drain and leaves that slot and every later one untouched.
    pub fn drain<F>(&mut self, mut deliver: F) -> DrainReport
    where
        F: FnMut(usize, &[u8]) -> bool,
    {
        let mut report = DrainReport::default();
        let mut from = 0;
        while let Some((index, payload)) = self.next_pending(from, &mut report) {
            if !deliver(index, &payload) {
                log::info!("drain stopped at slot {}", index);
                report.stopped_at = Some(index);
                break;
            }
            self.remove_slot(index);
            report.delivered += 1;
            from = index + 1;
        }
        report.remaining = self.len();
        report
    }

    /// Next occupied slot at or after `from`, with its payload. Unreadable
    /// slots on the way are removed and counted as discarded.
    fn next_pending(&mut self, from: usize, report: &mut DrainReport) -> Option<(usize, Vec<u8>)> {
        if !self.enabled {
            return None;
        }
        for index in from..self.capacity {
            if self.slots[index].is_none() {
                continue;
            }
            match self.read_slot(index) {
                Ok(Some(payload)) => return Some((index, payload)),
                Ok(None) => self.slots[index] = None,
                Err(err) => {
                    log::warn!("dropping unreadable slot {}: {}", index, err);
                    self.remove_slot(index);
                    report.discarded += 1;
                }
            }
        }
        None
    }

    /// Payload stored in slot `index`, if any.
    pub fn read_slot(&self, index: usize) -> CaptureResult<Option<Vec<u8>>> {
        if index >= self.capacity || self.slots[index].is_none() {
            return Ok(None);
        }
        let raw = read_file(&self.slot_path(index))
            .map_err(|e| CaptureError::storage(format!("read slot {}: {}", index, e)))?;
        let (_, payload) = decode_slot(&raw)
            .ok_or_else(|| CaptureError::storage(format!("slot {} is corrupt", index)))?;
        Ok(Some(payload.to_vec()))
    }

    /// Remove every queued frame.
    pub fn clear(&mut self) -> usize {
        let occupied = self.occupied();
        for index in &occupied {
            self.remove_slot(*index);
        }
        occupied.len()
    }

    fn eviction_target(&self) -> usize {
        match self.policy {
            EvictionPolicy::SlotZero => 0,
            EvictionPolicy::Oldest => self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.map(|meta| (meta.seq, i)))
                .min()
                .map(|(_, i)| i)
                .unwrap_or(0),
        }
    }

    fn remove_slot(&mut self, index: usize) {
        self.slots[index] = None;
        if let Err(err) = fs::remove_file(self.slot_path(index)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove slot {}: {}", index, err);
            }
        }
    }

    /// Load slot headers from disk. With `prune`, invalid slots and temp
    /// files left by an interrupted write are deleted.
    fn load_slots(&mut self, prune: bool) {
        for index in 0..self.capacity {
            let path = self.slot_path(index);
            if !path.exists() {
                continue;
            }
            let meta = read_file(&path).ok().and_then(|raw| {
                decode_slot(&raw).map(|(seq, payload)| SlotMeta {
                    seq,
                    len: payload.len(),
                })
            });
            match meta {
                Some(meta) => {
                    self.next_seq = self.next_seq.max(meta.seq + 1);
                    self.slots[index] = Some(meta);
                }
                None if prune => {
                    log::warn!("removing invalid queue slot {}", path.display());
                    let _ = fs::remove_file(&path);
                }
                None => log::warn!("skipping invalid queue slot {}", path.display()),
            }
        }
        if !prune {
            return;
        }
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    let _ = fs::remove_file(path);
                }
            }
        }
    }

    fn slot_path(&self, index: usize) -> PathBuf {
        slot_path(&self.dir, index)
    }
}

/// [`PersistentQueue::drain`] for a queue shared behind a mutex.
///
/// The lock is taken only to read the next slot and to remove a delivered
/// one, never while `deliver` runs, so readers such as a status endpoint are
/// not blocked behind network I/O. Callers must be the queue's only writer.
pub fn drain_shared<F>(queue: &Mutex<PersistentQueue>, mut deliver: F) -> DrainReport
where
    F: FnMut(usize, &[u8]) -> bool,
{
    let lock = || queue.lock().unwrap_or_else(PoisonError::into_inner);
    let mut report = DrainReport::default();
    let mut from = 0;
    loop {
        let pending = lock().next_pending(from, &mut report);
        let Some((index, payload)) = pending else {
            break;
        };
        if !deliver(index, &payload) {
            log::info!("drain stopped at slot {}", index);
            report.stopped_at = Some(index);
            break;
        }
        lock().remove_slot(index);
        report.delivered += 1;
        from = index + 1;
    }
    report.remaining = lock().len();
    report
}

pub fn slot_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("slot_{}.bin", index))
}

fn init_storage(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(".probe");
    write_atomic(&probe, b"ok")?;
    fs::remove_file(probe)
}

fn reformat(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        fs::remove_dir_all(dir)?;
    } else if dir.exists() {
        fs::remove_file(dir)?;
    }
    init_storage(dir)
}

fn encode_slot(seq: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(SLOT_MAGIC);
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_slot(raw: &[u8]) -> Option<(u64, &[u8])> {
    if raw.len() < HEADER_LEN || &raw[..4] != SLOT_MAGIC {
        return None;
    }
    let seq = u64::from_le_bytes(raw[4..12].try_into().ok()?);
    let len = u32::from_le_bytes(raw[12..16].try_into().ok()?) as usize;
    let payload = &raw[HEADER_LEN..];
    (payload.len() == len).then_some((seq, payload))
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)
}

fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
