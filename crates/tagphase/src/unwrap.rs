//! Per-channel phase unwrapping
//!
//! The radio reports phase as an integer in units of 1/4096
//! of a full turn. Between two reads of the same, physically
//! unchanged path, the reported value may jump by a full turn
//! (ordinary wrapping) *or* by exactly half a turn, which is
//! an artifact of the reader hardware.
//!
//! The [`PhaseUnwrapper`] anchors each RF channel to its first
//! observed phase. Every later sample on that channel is
//! compared against the anchor and corrected in two steps:
//!
//! 1. a full-turn correction if the difference exceeds
//!    [`ANCHOR_LIMITS`]`.full`; then
//! 2. a half-turn correction if the *recomputed* difference
//!    exceeds [`ANCHOR_LIMITS`]`.half`.
//!
//! ```txt
//!  diff (rad)
//!   |  > 5.8 ........ subtract 2π
//!   |  > 2.5 ........ subtract π
//!   0 --------------- keep
//!   | < -2.5 ........ add π
//!   | < -5.8 ........ add 2π
//! ```

use std::f64::consts::PI;

use crate::event::{Channel, NUM_CHANNELS};

/// Raw phase units per full turn
pub const PHASE_UNITS_PER_TURN: f64 = 4096.0;

/// Self-difference reported before a channel has an anchor
///
/// Numeric stand-in for "no reference yet," used wherever a
/// plain number must be stored.
pub const UNSET_SELF_DIFF: f64 = -1.0;

/// Thresholds for a two-stage turn/half-turn correction
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FoldLimits {
    /// Magnitude above which a full turn is removed
    pub full: f64,

    /// Magnitude above which a half turn is removed
    pub half: f64,

    /// Size of one full turn, in the units of the value
    pub turn: f64,
}

/// Corrections against a channel anchor (radians)
pub const ANCHOR_LIMITS: FoldLimits = FoldLimits {
    full: 5.8,
    half: 2.5,
    turn: 2.0 * PI,
};

/// Corrections between consecutive samples (radians)
pub const STEP_LIMITS: FoldLimits = FoldLimits {
    full: 6.0,
    half: 3.0,
    turn: 2.0 * PI,
};

/// Remove turn and half-turn ambiguity from a phase difference
///
/// Subtracts `sign(delta) * turn` when `|delta| > full`, then
/// subtracts `sign * turn / 2` when the corrected value still
/// exceeds `half`. Comparisons are strict.
#[inline]
pub fn fold_ambiguity(delta: f64, limits: FoldLimits) -> f64 {
    let mut delta = delta;
    if delta.abs() > limits.full {
        delta -= delta.signum() * limits.turn;
    }
    if delta.abs() > limits.half {
        delta -= delta.signum() * limits.turn / 2.0;
    }
    delta
}

/// Convert raw phase units to radians
#[inline]
pub fn raw_to_radians(raw_phase: u16) -> f64 {
    raw_phase as f64 * (2.0 * PI / PHASE_UNITS_PER_TURN)
}

/// Result of unwrapping one sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnwrappedPhase {
    /// Corrected phase (degrees)
    pub degrees: f64,

    /// Difference from the channel anchor (degrees)
    ///
    /// `None` for the first sample on a channel, which
    /// becomes the anchor.
    pub self_diff: Option<f64>,
}

impl UnwrappedPhase {
    /// Self-difference, or [`UNSET_SELF_DIFF`] if there is none
    pub fn self_diff_or_sentinel(&self) -> f64 {
        self.self_diff.unwrap_or(UNSET_SELF_DIFF)
    }
}

/// Per-channel phase unwrapper
///
/// Holds one anchor per RF channel. An anchor is set on the
/// first observation of its channel and never rewritten.
#[derive(Clone, Debug)]
pub struct PhaseUnwrapper {
    anchors: [Option<f64>; NUM_CHANNELS],
}

impl PhaseUnwrapper {
    /// New unwrapper with no anchors
    pub fn new() -> Self {
        Self {
            anchors: [None; NUM_CHANNELS],
        }
    }

    /// Unwrap a raw phase sample observed on `channel`
    ///
    /// A missing `raw_phase` is treated as zero. The first
    /// sample on a channel is stored as its anchor and has no
    /// self-difference.
    pub fn unwrap(&mut self, raw_phase: Option<u16>, channel: Channel) -> UnwrappedPhase {
        let radians = raw_to_radians(raw_phase.unwrap_or(0));
        let anchor = &mut self.anchors[channel.index()];

        match *anchor {
            None => {
                *anchor = Some(radians);
                UnwrappedPhase {
                    degrees: radians.to_degrees(),
                    self_diff: None,
                }
            }
            Some(anchor) => {
                let corrected = anchor + fold_ambiguity(radians - anchor, ANCHOR_LIMITS);
                UnwrappedPhase {
                    degrees: corrected.to_degrees(),
                    self_diff: Some((corrected - anchor).to_degrees()),
                }
            }
        }
    }

    /// Anchor of `channel` (radians), if set
    pub fn anchor(&self, channel: Channel) -> Option<f64> {
        self.anchors[channel.index()]
    }

    /// Number of channels which have an anchor
    pub fn anchored_channels(&self) -> usize {
        self.anchors.iter().filter(|a| a.is_some()).count()
    }
}

impl Default for PhaseUnwrapper {
    fn default() -> Self {
        Self::new()
    }
}
