use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::aligner::ChannelAlignments;
use crate::history::HistoryExport;
use crate::stability::StabilityOutput;

/// Result of one reporting cycle
///
/// One cycle processes one batch of tag reports. The
/// [`accepted()`](CycleReport::accepted) value, if any, is the
/// pipeline's output for the cycle. The other fields show how
/// it was obtained.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    /// Lifetime cycle counter, starting at one
    pub cycle: u64,

    /// Number of distinct tags updated by the batch
    pub updated_tags: usize,

    /// Sum of the seen counts in the batch
    pub new_seen_count: u64,

    /// True if the batch recorded a phase sample of the sensor tag
    pub sensor_reported: bool,

    /// Cleaned cross-tag difference (degrees)
    pub cross_tag: Option<f64>,

    /// Channel-wise alignment, if the sensor tag reported
    pub alignments: Option<ChannelAlignments>,

    /// Mean aligned difference (degrees)
    pub dtw_mean: Option<f64>,

    /// Value fed to the stability filter
    pub candidate: Option<f64>,

    /// Stability filter verdict on the candidate
    pub stability: Option<StabilityOutput>,
}

impl CycleReport {
    /// Value emitted this cycle (degrees), if any
    pub fn accepted(&self) -> Option<f64> {
        self.stability.as_ref().and_then(StabilityOutput::accepted)
    }

    /// True if the filter withheld the candidate as multipath
    pub fn is_multipath(&self) -> bool {
        self.stability
            .as_ref()
            .map_or(false, StabilityOutput::is_rejected)
    }

    /// Number of channels aligned this cycle
    pub fn aligned_channels(&self) -> usize {
        self.alignments
            .as_ref()
            .map_or(0, |a| a.aligned().count())
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} tag(s), {} read(s)",
            self.cycle, self.updated_tags, self.new_seen_count
        )?;
        if let Some(xt) = self.cross_tag {
            write!(f, ", cross-tag {:.2}°", xt)?;
        }
        if let Some(mean) = self.dtw_mean {
            write!(
                f,
                ", dtw {:.2}° over {} channel(s)",
                mean,
                self.aligned_channels()
            )?;
        }
        match &self.stability {
            Some(out) => write!(f, ", {}", out),
            None => f.write_str(", no candidate"),
        }
    }
}

/// Persisted form of a sensing session
///
/// Holds the complete history of both tags and their
/// channel-wise unwrapped phases.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionExport {
    /// EPC of the sensor tag
    pub sensor_epc: String,

    /// EPC of the reference tag
    pub reference_epc: String,

    /// Sensor tag history
    pub sensor: HistoryExport,

    /// Reference tag history
    pub reference: HistoryExport,

    /// Sensor unwrapped phase, by channel (degrees)
    pub sensor_channels: BTreeMap<u8, Vec<f64>>,

    /// Reference unwrapped phase, by channel (degrees)
    pub reference_channels: BTreeMap<u8, Vec<f64>>,
}
