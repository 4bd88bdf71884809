//! Concurrent tag database
//!
//! The [`TagDatabase`] maps each (EPC, antenna) pair to its
//! aggregate [`TagRecord`]. One writer ingests batches of tag
//! reports; any number of readers may take snapshots at the
//! same time.
//!
//! A single lock guards the map. It is held for an entire
//! batch, so readers never see a batch half-applied. Each
//! record's [`PhaseHistory`] is shared by reference: a
//! snapshot copies the map and the top-level fields, but its
//! histories continue to grow. Histories are append-only, so
//! anything a reader has already observed stays valid.
//!
//! ## Lock order
//!
//! Ingestion takes the map lock first and then the write lock
//! of each history it appends to. Readers must not hold a
//! [`read_history()`] guard while calling any [`TagDatabase`]
//! method or [`TagRecord::history_len()`]: a waiting writer
//! can block the second acquisition while it waits on the
//! first. Copy what you need out of the guard and drop it
//! before going back to the database.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::event::{Channel, TagKey, TagReadEvent, TagReport, DEFAULT_RSSI};
use crate::history::{PhaseHistory, PhaseSample};
use crate::unwrap::UnwrappedPhase;

#[cfg(not(test))]
use log::{debug, warn};

#[cfg(test)]
use std::{println as debug, println as warn};

/// A phase history shared between the database and its readers
pub type SharedHistory = Arc<RwLock<PhaseHistory>>;

/// Lock a shared history for reading
///
/// A history is never left half-written, so a poisoned lock
/// is still readable. Drop the guard before calling back into
/// the database; see the module-level lock order.
pub fn read_history(history: &SharedHistory) -> RwLockReadGuard<'_, PhaseHistory> {
    history.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_history(history: &SharedHistory) -> RwLockWriteGuard<'_, PhaseHistory> {
    history.write().unwrap_or_else(PoisonError::into_inner)
}

/// Aggregate state of one tag on one antenna
#[derive(Clone, Debug)]
pub struct TagRecord {
    /// Tag and antenna
    pub key: TagKey,

    /// Strongest RSSI ever reported (dBm)
    pub best_rssi: i32,

    /// Most recent RSSI (dBm)
    pub last_rssi: i32,

    /// First non-zero channel index reported
    pub first_channel: u32,

    /// Most recent channel index
    pub last_channel: u32,

    /// Sum of all seen counts
    pub total_seen_count: u64,

    /// Time of first sight (ms since session start)
    pub first_seen_ms: u64,

    /// Time of last sight (ms since session start)
    pub last_seen_ms: u64,

    /// Most recent raw phase, if any report carried one
    pub last_raw_phase: Option<u16>,

    /// Most recent Doppler frequency, if any report carried one
    pub last_doppler: Option<f64>,

    /// Phase history of this tag
    pub history: SharedHistory,
}

impl TagRecord {
    fn new(key: TagKey, first_seen_ms: u64) -> Self {
        Self {
            key,
            best_rssi: DEFAULT_RSSI,
            last_rssi: DEFAULT_RSSI,
            first_channel: 0,
            last_channel: 0,
            total_seen_count: 0,
            first_seen_ms,
            last_seen_ms: first_seen_ms,
            last_raw_phase: None,
            last_doppler: None,
            history: SharedHistory::default(),
        }
    }

    fn absorb(&mut self, event: &TagReadEvent) {
        self.best_rssi = i32::max(self.best_rssi, event.rssi);
        self.last_rssi = event.rssi;
        if self.first_channel == 0 {
            self.first_channel = event.channel_index;
        }
        self.last_channel = event.channel_index;
        self.total_seen_count += event.seen_count as u64;
        self.last_seen_ms = event.last_seen_ms;
        if event.raw_phase.is_some() {
            self.last_raw_phase = event.raw_phase;
        }
        if event.doppler.is_some() {
            self.last_doppler = event.doppler;
        }
    }

    /// Number of phase samples recorded
    pub fn history_len(&self) -> usize {
        read_history(&self.history).len()
    }
}

/// One ingested line item
#[derive(Clone, Debug, PartialEq)]
pub struct IngestedRead {
    /// Tag which was read
    pub key: TagKey,

    /// Channel, if the report carried a valid one
    pub channel: Option<Channel>,

    /// Unwrapped phase, if a phase sample was recorded
    pub phase: Option<UnwrappedPhase>,
}

/// What one call to [`TagDatabase::ingest_batch()`] changed
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchSummary {
    /// Keys whose records were created or updated
    pub updated_keys: BTreeSet<TagKey>,

    /// Sum of the seen counts in this batch
    pub new_seen_count: u64,

    /// Each accepted line item, in order
    pub events: Vec<IngestedRead>,

    /// Line items dropped for lack of a usable EPC
    pub rejected: usize,
}

impl BatchSummary {
    /// Reads of `key` in this batch, in order
    pub fn reads_of<'a>(&'a self, key: &'a TagKey) -> impl Iterator<Item = &'a IngestedRead> + 'a {
        self.events.iter().filter(move |read| &read.key == key)
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    records: HashMap<TagKey, TagRecord>,
    start_us: Option<u64>,
    total_seen: u64,
}

/// Keyed store of tag records
///
/// ```
/// use tagphase::{Epc, TagDatabase, TagKey, TagReport};
///
/// let db = TagDatabase::new();
/// let report = TagReport {
///     epc: Some("abba".to_owned()),
///     antenna_id: Some(1),
///     channel_index: Some(4),
///     phase: Some(1024),
///     first_seen_us: Some(1_000_000),
///     ..Default::default()
/// };
///
/// let summary = db.ingest_batch(&[report]);
/// assert_eq!(1, summary.new_seen_count);
///
/// let key = TagKey::new(Epc::new("ABBA").unwrap(), 1);
/// assert_eq!(1, db.get(&key).unwrap().history_len());
/// ```
#[derive(Debug, Default)]
pub struct TagDatabase {
    state: Mutex<DatabaseState>,
}

impl TagDatabase {
    /// Empty database with no session start time
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of tag reports
    ///
    /// The database is locked once for the whole batch. Each
    /// line item updates its tag's aggregate record and, if it
    /// carries a valid channel, appends a phase sample to the
    /// tag's history. Line items without a valid EPC are
    /// dropped.
    pub fn ingest_batch(&self, reports: &[TagReport]) -> BatchSummary {
        let mut guard = self.lock();
        let state = &mut *guard;

        let mut summary = BatchSummary::default();
        for report in reports {
            let event = match report.to_event(&mut state.start_us) {
                Ok(event) => event,
                Err(err) => {
                    warn!("database: dropping tag report: {}", err);
                    summary.rejected += 1;
                    continue;
                }
            };

            let record = state
                .records
                .entry(event.key.clone())
                .or_insert_with(|| {
                    debug!("database: new tag {}", event.key);
                    TagRecord::new(event.key.clone(), event.first_seen_ms)
                });
            record.absorb(&event);

            let phase = match &event.channel {
                Ok(channel) => Some(write_history(&record.history).push(PhaseSample {
                    timestamp_ms: event.first_seen_ms,
                    raw_phase: event.raw_phase,
                    channel: *channel,
                    rssi: event.rssi,
                    doppler: event.doppler,
                })),
                Err(err) => {
                    warn!("database: {}: no phase sample: {}", event.key, err);
                    None
                }
            };

            summary.new_seen_count += event.seen_count as u64;
            summary.updated_keys.insert(event.key.clone());
            summary.events.push(IngestedRead {
                key: event.key,
                channel: event.channel.ok(),
                phase,
            });
        }

        state.total_seen += summary.new_seen_count;
        summary
    }

    /// Shallow copy of every record
    ///
    /// Histories in the copy are shared with the database and
    /// may keep growing.
    pub fn snapshot(&self) -> HashMap<TagKey, TagRecord> {
        self.lock().records.clone()
    }

    /// Shallow copy of one record
    pub fn get(&self, key: &TagKey) -> Option<TagRecord> {
        self.lock().records.get(key).cloned()
    }

    /// Shared history of one tag
    pub fn history(&self, key: &TagKey) -> Option<SharedHistory> {
        self.lock().records.get(key).map(|rec| rec.history.clone())
    }

    /// Number of tags known
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// True if no tag has been seen since the last clear
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Session start time (µs, reader clock), if known
    pub fn start_time(&self) -> Option<u64> {
        self.lock().start_us
    }

    /// Set the session start time
    ///
    /// Call this when the reader announces the start of an
    /// inventory. Has no effect if a start time is already
    /// known.
    pub fn set_start_time(&self, start_us: u64) {
        let mut state = self.lock();
        if state.start_us.is_none() {
            debug!("database: session starts at {} µs", start_us);
            state.start_us = Some(start_us);
        }
    }

    /// Total of all seen counts ever ingested
    ///
    /// Not affected by [`clear()`](TagDatabase::clear).
    pub fn total_tags_seen(&self) -> u64 {
        self.lock().total_seen
    }

    /// Drop every record and the session start time
    ///
    /// The next report starts a new session clock. Histories
    /// held by readers remain valid but are no longer updated.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.records = HashMap::new();
        state.start_us = None;
    }

    fn lock(&self) -> MutexGuard<'_, DatabaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::event::{Epc, EventError};

    fn report(epc: &str, chan: u32, phase: u16, t_us: u64) -> TagReport {
        TagReport {
            epc: Some(epc.to_owned()),
            antenna_id: Some(1),
            channel_index: Some(chan),
            phase: Some(phase),
            first_seen_us: Some(t_us),
            last_seen_us: Some(t_us),
            ..Default::default()
        }
    }

    fn key(epc: &str) -> TagKey {
        TagKey::new(Epc::new(epc).expect("valid EPC"), 1)
    }

    #[test]
    fn test_aggregate_rules() {
        let db = TagDatabase::new();
        db.set_start_time(1_000_000);
        db.set_start_time(5); // ignored

        let mut first = report("ab", 0, 100, 1_002_000);
        first.peak_rssi = Some(-70);
        first.seen_count = Some(3);
        first.doppler = Some(1.5);

        let mut second = report("ab", 9, 200, 1_005_000);
        second.peak_rssi = Some(-50);

        let mut third = report("ab", 12, 300, 1_009_000);
        third.peak_rssi = Some(-60);
        third.phase = None;

        let summary = db.ingest_batch(&[first, second, third]);
        assert_eq!(5, summary.new_seen_count);
        assert_eq!(1, summary.updated_keys.len());
        assert_eq!(3, summary.events.len());
        assert_eq!(0, summary.rejected);

        let rec = db.get(&key("AB")).expect("record");
        assert_eq!(-50, rec.best_rssi);
        assert_eq!(-60, rec.last_rssi);
        assert_eq!(9, rec.first_channel);
        assert_eq!(12, rec.last_channel);
        assert_eq!(5, rec.total_seen_count);
        assert_eq!(2, rec.first_seen_ms);
        assert_eq!(9, rec.last_seen_ms);
        assert_eq!(Some(200), rec.last_raw_phase);
        assert_eq!(Some(1.5), rec.last_doppler);

        // channel 0 updated the record but recorded no phase
        assert_eq!(None, summary.events[0].channel);
        assert_eq!(None, summary.events[0].phase);
        assert_eq!(2, rec.history_len());
        assert_eq!(&[5, 9], read_history(&rec.history).timestamps());

        assert_eq!(5, db.total_tags_seen());
    }

    #[test]
    fn test_start_time_from_first_report() {
        let db = TagDatabase::new();
        assert_eq!(None, db.start_time());

        let summary = db.ingest_batch(&[report("01", 1, 0, 7_000_000), report("02", 1, 0, 7_004_000)]);
        assert_eq!(Some(7_000_000), db.start_time());
        assert_eq!(0, db.get(&key("01")).expect("record").first_seen_ms);
        assert_eq!(4, db.get(&key("02")).expect("record").first_seen_ms);

        let keys: Vec<String> = summary.updated_keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(vec!["01@1", "02@1"], keys);
    }

    #[test]
    fn test_bad_epc_dropped() {
        let db = TagDatabase::new();
        let mut missing = report("00", 1, 0, 0);
        missing.epc = None;

        let summary = db.ingest_batch(&[missing, report("nothex!", 1, 0, 0), report("cafe", 2, 0, 0)]);
        assert_eq!(2, summary.rejected);
        assert_eq!(1, summary.events.len());
        assert_eq!(1, db.len());
        assert_eq!(Err(EventError::MissingEpc), TagReport::default().to_event(&mut None));
    }

    #[test]
    fn test_self_diff_per_read() {
        let db = TagDatabase::new();
        let summary = db.ingest_batch(&[
            report("aa", 5, 0, 0),
            report("bb", 5, 0, 0),
            report("aa", 5, 2048, 1000),
        ]);

        let aa = key("AA");
        let reads: Vec<_> = summary.reads_of(&aa).collect();
        assert_eq!(2, reads.len());
        assert_eq!(None, reads[0].phase.expect("sample").self_diff);
        assert_eq!(Some(0.0), reads[1].phase.expect("sample").self_diff.map(f64::round));
    }

    #[test]
    fn test_snapshot_shares_history() {
        let db = TagDatabase::new();
        db.ingest_batch(&[report("aa", 1, 0, 0)]);

        let snap = db.snapshot();
        let hist = snap.get(&key("AA")).expect("record").history.clone();
        assert_eq!(1, read_history(&hist).len());

        // the snapshot's history sees later appends
        db.ingest_batch(&[report("aa", 1, 10, 1000)]);
        assert_eq!(2, read_history(&hist).len());
        assert!(Arc::ptr_eq(&hist, &db.history(&key("AA")).expect("history")));

        // but not new keys
        db.ingest_batch(&[report("bb", 1, 10, 2000)]);
        assert_eq!(1, snap.len());
        assert_eq!(2, db.len());
    }

    #[test]
    fn test_clear() {
        let db = TagDatabase::new();
        db.ingest_batch(&[report("aa", 1, 0, 5_000_000)]);
        let hist = db.history(&key("AA")).expect("history");

        db.clear();
        assert!(db.is_empty());
        assert_eq!(None, db.start_time());
        assert_eq!(1, db.total_tags_seen());

        // a fresh record and clock after the clear
        db.ingest_batch(&[report("aa", 1, 0, 9_000_000)]);
        assert_eq!(Some(9_000_000), db.start_time());
        assert_eq!(1, db.get(&key("AA")).expect("record").history_len());
        assert_eq!(1, read_history(&hist).len());
    }

    #[test]
    fn test_concurrent_readers() {
        let db = TagDatabase::new();
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..200u64 {
                    db.ingest_batch(&[
                        report("aa", 1 + (i % 50) as u32, (i % 4096) as u16, i * 1000),
                        report("bb", 1 + (i % 50) as u32, 0, i * 1000),
                    ]);
                }
            });
            s.spawn(|| {
                for _ in 0..200 {
                    for rec in db.snapshot().values() {
                        let hist = read_history(&rec.history);
                        assert_eq!(hist.len(), hist.channels().len());
                        assert_eq!(hist.len(), hist.cumulative_degrees().len());
                    }
                }
            });
        });

        assert_eq!(200, db.get(&key("AA")).expect("record").history_len());
        assert_eq!(400, db.total_tags_seen());
    }

    #[test]
    fn test_reader_lock_order() {
        let db = TagDatabase::new();
        let sensor = key("AA");
        db.ingest_batch(&[report("aa", 1, 0, 0)]);

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 1..300u64 {
                    db.ingest_batch(&[report("aa", 1 + (i % 50) as u32, 7, i * 1000)]);
                }
            });
            s.spawn(|| {
                let shared = db.history(&sensor).expect("history");
                for _ in 0..300 {
                    // copy out of the guard, then release it
                    let seen = read_history(&shared).len();
                    let rec = db.get(&sensor).expect("record");
                    assert!(rec.history_len() >= seen);
                    assert!(db.len() >= 1);
                }
            });
        });

        assert_eq!(300, db.get(&sensor).expect("record").history_len());
    }
}
