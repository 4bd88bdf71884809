//! Channel-wise alignment of two tags
//!
//! The sensor and reference tags are read independently, so
//! their per-channel phase sequences differ in length and
//! sampling. [`align_channels()`] warps each channel's pair of
//! sequences into correspondence with [`fastdtw()`](crate::fastdtw)
//! and measures how far apart the aligned phases are.
//!
//! Every channel is independent. A channel which fails to
//! align is skipped without affecting the others. With the
//! `parallel` feature, channels are aligned concurrently and
//! the results are identical.

use arrayvec::ArrayVec;
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::differential::clean_aligned_difference;
use crate::dtw::{fastdtw, AlignError};
use crate::event::{Channel, NUM_CHANNELS};
use crate::history::ChannelBuckets;

#[cfg(not(test))]
use log::{trace, warn};

#[cfg(test)]
use std::{println as trace, println as warn};

/// Reason a channel produced no aligned pair
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Only the reference tag was read on this channel
    #[error("no sensor samples")]
    NoSensorSamples,

    /// Only the sensor tag was read on this channel
    #[error("no reference samples")]
    NoReferenceSamples,

    /// Time warping failed
    #[error(transparent)]
    Failed(#[from] AlignError),
}

/// Sensor and reference phases of one channel, warped to equal length
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedPair {
    /// RF channel
    pub channel: Channel,

    /// Warped sensor phases (degrees)
    pub sensor: Vec<f64>,

    /// Warped reference phases (degrees)
    pub reference: Vec<f64>,

    /// Total warp distance
    pub distance: f64,
}

impl AlignedPair {
    /// Number of aligned samples
    pub fn len(&self) -> usize {
        self.sensor.len()
    }

    /// True if there are no aligned samples
    pub fn is_empty(&self) -> bool {
        self.sensor.is_empty()
    }

    /// Cleaned absolute phase difference of each aligned sample
    ///
    /// Each `|sensor − reference|` is folded against a full turn
    /// above 270° and against a half turn above 135°.
    pub fn differences(&self) -> impl Iterator<Item = f64> + '_ {
        self.sensor
            .iter()
            .zip(self.reference.iter())
            .map(|(s, r)| clean_aligned_difference((s - r).abs()))
    }
}

/// Result of aligning one channel
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelOutcome {
    /// Both tags were warped into correspondence
    Aligned(AlignedPair),

    /// The channel contributes nothing this cycle
    Skipped { channel: Channel, reason: SkipReason },
}

impl ChannelOutcome {
    /// RF channel of this outcome
    pub fn channel(&self) -> Channel {
        match self {
            ChannelOutcome::Aligned(pair) => pair.channel,
            ChannelOutcome::Skipped { channel, .. } => *channel,
        }
    }

    /// The aligned pair, if alignment succeeded
    pub fn aligned(&self) -> Option<&AlignedPair> {
        match self {
            ChannelOutcome::Aligned(pair) => Some(pair),
            ChannelOutcome::Skipped { .. } => None,
        }
    }

    /// True if alignment was attempted and failed
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ChannelOutcome::Skipped {
                reason: SkipReason::Failed(_),
                ..
            }
        )
    }
}

/// Outcomes of one alignment pass, in channel order
///
/// Holds one [`ChannelOutcome`] for every channel on which
/// either tag has samples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelAlignments {
    outcomes: ArrayVec<ChannelOutcome, NUM_CHANNELS>,
}

impl ChannelAlignments {
    /// All outcomes, in channel order
    pub fn iter(&self) -> std::slice::Iter<'_, ChannelOutcome> {
        self.outcomes.iter()
    }

    /// Successfully aligned channels
    pub fn aligned(&self) -> impl Iterator<Item = &AlignedPair> {
        self.outcomes.iter().filter_map(ChannelOutcome::aligned)
    }

    /// Number of channels with an outcome
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// True if neither tag had any samples
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of channels which failed to align
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    /// Cleaned phase differences of each aligned channel
    pub fn differences(&self) -> Vec<(Channel, Vec<f64>)> {
        self.aligned()
            .map(|pair| (pair.channel, pair.differences().collect()))
            .collect()
    }

    /// Mean of all cleaned differences, across every channel
    ///
    /// `None` if no channel aligned. This is the DTW-based
    /// differential signal for one reporting cycle.
    pub fn mean_difference(&self) -> Option<f64> {
        let (sum, count) = self
            .aligned()
            .flat_map(|pair| pair.differences())
            .fold((0.0f64, 0usize), |(sum, count), d| (sum + d, count + 1));

        if count > 0 {
            Some(sum / count as f64)
        } else {
            None
        }
    }
}

impl<'a> IntoIterator for &'a ChannelAlignments {
    type Item = &'a ChannelOutcome;
    type IntoIter = std::slice::Iter<'a, ChannelOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Align the sensor and reference tags on every RF channel
///
/// `radius` is the FastDTW search radius. Channels on which
/// neither tag has samples are omitted from the result.
///
/// ```
/// use std::convert::TryFrom;
/// use tagphase::{align_channels, ChannelBuckets, Channel};
///
/// let ch = Channel::try_from(3).unwrap();
/// let sensor: ChannelBuckets = vec![(ch, 10.0), (ch, 12.0), (ch, 14.0)].into_iter().collect();
/// let reference: ChannelBuckets = vec![(ch, 0.0), (ch, 4.0)].into_iter().collect();
///
/// let aligned = align_channels(&sensor, &reference, 1);
/// assert_eq!(1, aligned.len());
/// assert!(aligned.mean_difference().unwrap() > 0.0);
/// ```
pub fn align_channels(
    sensor: &ChannelBuckets,
    reference: &ChannelBuckets,
    radius: usize,
) -> ChannelAlignments {
    let channels: ArrayVec<Channel, NUM_CHANNELS> = Channel::all()
        .filter(|&ch| !sensor.get(ch).is_empty() || !reference.get(ch).is_empty())
        .collect();

    #[cfg(feature = "parallel")]
    let outcomes = channels
        .as_slice()
        .par_iter()
        .map(|&ch| align_channel(ch, sensor.get(ch), reference.get(ch), radius))
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    #[cfg(not(feature = "parallel"))]
    let outcomes = channels
        .iter()
        .map(|&ch| align_channel(ch, sensor.get(ch), reference.get(ch), radius))
        .collect();

    ChannelAlignments { outcomes }
}

// Align a single channel
fn align_channel(
    channel: Channel,
    sensor: &[f64],
    reference: &[f64],
    radius: usize,
) -> ChannelOutcome {
    let reason = if sensor.is_empty() {
        SkipReason::NoSensorSamples
    } else if reference.is_empty() {
        SkipReason::NoReferenceSamples
    } else {
        match fastdtw(sensor, reference, radius) {
            Ok(warp) => {
                let (s, r) = warp.project(sensor, reference);
                trace!(
                    "aligner: channel {}: {}×{} → {} (distance {:.1})",
                    channel,
                    sensor.len(),
                    reference.len(),
                    s.len(),
                    warp.distance
                );
                return ChannelOutcome::Aligned(AlignedPair {
                    channel,
                    sensor: s,
                    reference: r,
                    distance: warp.distance,
                });
            }
            Err(err) => {
                warn!("aligner: channel {} skipped: {}", channel, err);
                SkipReason::Failed(err)
            }
        }
    };

    ChannelOutcome::Skipped { channel, reason }
}
