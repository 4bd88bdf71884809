//! Per-tag phase history
//!
//! A [`PhaseHistory`] is a set of parallel, append-only
//! arrays. Index `i` of every array describes the same read.
//! Arrays never shrink and entries are never rewritten, so a
//! reader which observed a length of `n` may always read the
//! first `n` entries.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::event::{Channel, NUM_CHANNELS};
use crate::unwrap::{fold_ambiguity, raw_to_radians, PhaseUnwrapper, UnwrappedPhase, STEP_LIMITS};

/// Approximate tag reads per second in a live session
///
/// Converts a real-time window given in seconds into a
/// sample count.
pub const READS_PER_SECOND: usize = 35;

/// Sample count for a real-time window of `secs` seconds
pub fn window_samples(secs: usize) -> usize {
    secs * READS_PER_SECOND
}

/// One read to append to a [`PhaseHistory`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseSample {
    /// Time of the read (ms since session start)
    pub timestamp_ms: u64,

    /// Raw phase (1/4096 turn); absent → 0
    pub raw_phase: Option<u16>,

    /// RF channel
    pub channel: Channel,

    /// RSSI (dBm)
    pub rssi: i32,

    /// Doppler (Hz); absent → 0
    pub doppler: Option<f64>,
}

/// Append-only phase history of one tag on one antenna
#[derive(Clone, Debug, Default)]
pub struct PhaseHistory {
    timestamps: Vec<u64>,
    raw_radians: Vec<f64>,
    unwrapped_degrees: Vec<f64>,
    self_diff_degrees: Vec<Option<f64>>,
    channels: Vec<Channel>,
    rssis: Vec<i32>,
    dopplers: Vec<f64>,
    cumulative_radians: Vec<f64>,
    cumulative_degrees: Vec<f64>,
    unwrapper: PhaseUnwrapper,
}

impl PhaseHistory {
    /// Empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a read
    ///
    /// Unwraps the phase against its channel anchor, extends the
    /// running own-trajectory difference, and returns the
    /// unwrapped result.
    pub fn push(&mut self, sample: PhaseSample) -> UnwrappedPhase {
        let unwrapped = self.unwrapper.unwrap(sample.raw_phase, sample.channel);

        self.timestamps.push(sample.timestamp_ms);
        self.raw_radians
            .push(raw_to_radians(sample.raw_phase.unwrap_or(0)));
        self.unwrapped_degrees.push(unwrapped.degrees);
        self.self_diff_degrees.push(unwrapped.self_diff);
        self.channels.push(sample.channel);
        self.rssis.push(sample.rssi);
        self.dopplers.push(sample.doppler.unwrap_or(0.0));

        let cumulative = self.next_cumulative();
        self.cumulative_radians.push(cumulative);
        self.cumulative_degrees.push(cumulative.to_degrees());

        unwrapped
    }

    /// Number of reads
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True if there are no reads
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Read timestamps (ms since session start)
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    /// Uncorrected phase of each read (radians)
    pub fn raw_radians(&self) -> &[f64] {
        &self.raw_radians
    }

    /// Unwrapped phase of each read (degrees)
    pub fn unwrapped_degrees(&self) -> &[f64] {
        &self.unwrapped_degrees
    }

    /// Difference from the channel anchor (degrees)
    pub fn self_diff_degrees(&self) -> &[Option<f64>] {
        &self.self_diff_degrees
    }

    /// RF channel of each read
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// RSSI of each read (dBm)
    pub fn rssis(&self) -> &[i32] {
        &self.rssis
    }

    /// Doppler of each read (Hz)
    pub fn dopplers(&self) -> &[f64] {
        &self.dopplers
    }

    /// Running own-trajectory difference (radians)
    pub fn cumulative_radians(&self) -> &[f64] {
        &self.cumulative_radians
    }

    /// Running own-trajectory difference (degrees)
    pub fn cumulative_degrees(&self) -> &[f64] {
        &self.cumulative_degrees
    }

    /// Channel anchors and unwrapping state
    pub fn unwrapper(&self) -> &PhaseUnwrapper {
        &self.unwrapper
    }

    /// Group unwrapped phases by RF channel
    ///
    /// If `window` is given, only the most recent `window`
    /// reads are considered.
    pub fn channel_buckets(&self, window: Option<usize>) -> ChannelBuckets {
        let start = match window {
            Some(w) => self.len().saturating_sub(w),
            None => 0,
        };

        self.channels[start..]
            .iter()
            .copied()
            .zip(self.unwrapped_degrees[start..].iter().copied())
            .collect()
    }

    /// Copy the history into its persisted form
    ///
    /// If `window` is given, only the most recent `window`
    /// reads are exported.
    pub fn export(&self, window: Option<usize>) -> HistoryExport {
        let start = match window {
            Some(w) => self.len().saturating_sub(w),
            None => 0,
        };

        HistoryExport {
            timestamps: self.timestamps[start..].to_vec(),
            channels: self.channels[start..].iter().map(|c| c.get()).collect(),
            diffs: self.cumulative_degrees[start..].to_vec(),
            rssis: self.rssis[start..].to_vec(),
            raw_phases: self.unwrapped_degrees[start..].to_vec(),
        }
    }

    // Next value of the running difference
    //
    // Must be called after the newest read is pushed. Reads on
    // a new channel carry the previous value forward; the first
    // two reads are zero.
    fn next_cumulative(&self) -> f64 {
        let n = self.raw_radians.len();
        if n < 3 {
            return 0.0;
        }

        let prev = self.cumulative_radians[n - 2];
        if self.channels[n - 1] != self.channels[n - 2] {
            return prev;
        }

        let delta = self.raw_radians[n - 1] - self.raw_radians[n - 2];
        prev + fold_ambiguity(delta, STEP_LIMITS)
    }
}

/// Unwrapped phase samples grouped by RF channel
///
/// Built on demand from a [`PhaseHistory`]. Each bucket keeps
/// the order in which the reads occurred.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelBuckets {
    buckets: Vec<Vec<f64>>,
}

impl ChannelBuckets {
    /// Append a sample to the bucket for `channel`
    pub fn push(&mut self, channel: Channel, phase: f64) {
        self.buckets[channel.index()].push(phase);
    }

    /// Samples observed on `channel`
    ///
    /// Returns an empty slice if there are none.
    pub fn get(&self, channel: Channel) -> &[f64] {
        &self.buckets[channel.index()]
    }

    /// Iterate over channels which have at least one sample
    pub fn iter(&self) -> impl Iterator<Item = (Channel, &[f64])> {
        Channel::all()
            .zip(self.buckets.iter())
            .filter(|(_, b)| !b.is_empty())
            .map(|(c, b)| (c, b.as_slice()))
    }

    /// Number of channels with samples
    pub fn occupied(&self) -> usize {
        self.buckets.iter().filter(|b| !b.is_empty()).count()
    }

    /// Total number of samples, across all channels
    pub fn total_samples(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// Convert to a map of channel number to samples
    pub fn to_map(&self) -> BTreeMap<u8, Vec<f64>> {
        self.iter().map(|(c, b)| (c.get(), b.to_vec())).collect()
    }
}

impl Default for ChannelBuckets {
    fn default() -> Self {
        Self {
            buckets: vec![Vec::new(); NUM_CHANNELS],
        }
    }
}

impl FromIterator<(Channel, f64)> for ChannelBuckets {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (Channel, f64)>,
    {
        let mut out = Self::default();
        for (channel, phase) in iter {
            out.push(channel, phase);
        }
        out
    }
}

/// Persisted form of a [`PhaseHistory`]
///
/// Flat, index-aligned sequences. `diffs` is the running
/// own-trajectory difference and `raw_phases` the unwrapped
/// phase, both in degrees.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistoryExport {
    /// Read timestamps (ms since session start)
    pub timestamps: Vec<u64>,

    /// RF channel of each read
    pub channels: Vec<u8>,

    /// Running own-trajectory difference (degrees)
    pub diffs: Vec<f64>,

    /// RSSI (dBm)
    pub rssis: Vec<i32>,

    /// Unwrapped phase (degrees)
    pub raw_phases: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::TryFrom;

    use assert_approx_eq::assert_approx_eq;

    fn sample(t: u64, raw: u16, chan: u32) -> PhaseSample {
        PhaseSample {
            timestamp_ms: t,
            raw_phase: Some(raw),
            channel: Channel::try_from(chan).expect("valid channel"),
            rssi: -60,
            doppler: None,
        }
    }

    fn assert_aligned(hist: &PhaseHistory) {
        let n = hist.len();
        assert_eq!(n, hist.raw_radians().len());
        assert_eq!(n, hist.unwrapped_degrees().len());
        assert_eq!(n, hist.self_diff_degrees().len());
        assert_eq!(n, hist.channels().len());
        assert_eq!(n, hist.rssis().len());
        assert_eq!(n, hist.dopplers().len());
        assert_eq!(n, hist.cumulative_radians().len());
        assert_eq!(n, hist.cumulative_degrees().len());
    }

    #[test]
    fn test_arrays_stay_aligned() {
        let mut hist = PhaseHistory::new();
        assert!(hist.is_empty());
        for i in 0..10 {
            hist.push(sample(i, (i * 10) as u16, 1 + (i % 3) as u32));
            assert_aligned(&hist);
        }
        assert_eq!(10, hist.len());
        assert_eq!(&[0.0; 10][..], hist.dopplers());
    }

    #[test]
    fn test_cumulative_diff() {
        let mut hist = PhaseHistory::new();

        // fewer than three reads: no differencing
        hist.push(sample(0, 0, 3));
        hist.push(sample(1, 100, 3));
        assert_eq!(&[0.0, 0.0], hist.cumulative_radians());

        // same channel: accumulate
        hist.push(sample(2, 200, 3));
        let step = raw_to_radians(100);
        assert_approx_eq!(step, hist.cumulative_radians()[2]);

        // channel switch: carry forward
        hist.push(sample(3, 3000, 4));
        assert_approx_eq!(step, hist.cumulative_radians()[3]);

        // same channel, jump by a half turn: folded away
        hist.push(sample(4, 3000 + 2048 - 4096 + 50, 4));
        assert_approx_eq!(step + raw_to_radians(50), hist.cumulative_radians()[4]);
        assert_approx_eq!(
            hist.cumulative_radians()[4].to_degrees(),
            hist.cumulative_degrees()[4]
        );
    }

    #[test]
    fn test_self_diff_recorded() {
        let mut hist = PhaseHistory::new();
        let first = hist.push(sample(0, 0, 5));
        let second = hist.push(sample(1, 2048, 5));
        assert_eq!(None, first.self_diff);
        assert_eq!(&[None, second.self_diff], hist.self_diff_degrees());
        assert_eq!(1, hist.unwrapper().anchored_channels());
    }

    #[test]
    fn test_channel_buckets() {
        let mut hist = PhaseHistory::new();
        hist.push(sample(0, 0, 1));
        hist.push(sample(1, 0, 2));
        hist.push(sample(2, 1024, 1));
        hist.push(sample(3, 0, 2));
        hist.push(sample(4, 512, 1));

        let chan1 = Channel::try_from(1).unwrap();
        let chan2 = Channel::try_from(2).unwrap();

        let all = hist.channel_buckets(None);
        assert_eq!(2, all.occupied());
        assert_eq!(5, all.total_samples());
        assert_eq!(3, all.get(chan1).len());
        assert_approx_eq!(90.0, all.get(chan1)[1]);
        assert_approx_eq!(45.0, all.get(chan1)[2]);
        assert!(all.get(Channel::try_from(3).unwrap()).is_empty());

        // only the last two reads
        let recent = hist.channel_buckets(Some(2));
        assert_eq!(&[0.0][..], recent.get(chan2));
        assert_eq!(1, recent.get(chan1).len());

        let map = all.to_map();
        assert_eq!(vec![1u8, 2], map.keys().cloned().collect::<Vec<_>>());

        // a window larger than the history takes everything
        assert_eq!(all, hist.channel_buckets(Some(1000)));
    }

    #[test]
    fn test_export() {
        let mut hist = PhaseHistory::new();
        for i in 0..5 {
            hist.push(sample(i * 10, 0, 7));
        }

        let full = hist.export(None);
        assert_eq!(vec![0, 10, 20, 30, 40], full.timestamps);
        assert_eq!(vec![7u8; 5], full.channels);
        assert_eq!(5, full.diffs.len());
        assert_eq!(vec![-60; 5], full.rssis);
        assert_eq!(5, full.raw_phases.len());

        let tail = hist.export(Some(2));
        assert_eq!(vec![30, 40], tail.timestamps);
    }
}
