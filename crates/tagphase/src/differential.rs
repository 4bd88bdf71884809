//! Cross-tag differential phase
//!
//! The sensing output is the difference between the
//! self-difference of a *sensor* tag and that of a nearby
//! *reference* tag. Both tags see the same multipath and
//! reader drift; the difference leaves the phase shift
//! caused by the sensed quantity.

/// Largest magnitude produced by [`clean_cross_tag()`] (degrees)
pub const CROSS_TAG_RANGE: f64 = 150.0;

/// Remove turn and half-turn artifacts from a cross-tag difference
///
/// Values beyond ±300° lose a full turn; values still beyond
/// ±150° lose a half turn. Inputs beyond a full turn are first
/// reduced modulo 360°, so the output always lies within
/// `[-150, 150]` for finite inputs.
///
/// ```
/// use tagphase::clean_cross_tag;
///
/// assert_eq!(-30.0, clean_cross_tag(340.0 - 10.0));
/// assert_eq!(120.0, clean_cross_tag(300.0));
/// assert_eq!(150.0, clean_cross_tag(150.0));
/// ```
pub fn clean_cross_tag(diff: f64) -> f64 {
    let mut diff = if diff.abs() > 360.0 {
        diff % 360.0
    } else {
        diff
    };

    if diff.abs() > 300.0 {
        diff -= diff.signum() * 360.0;
    }
    if diff.abs() > CROSS_TAG_RANGE {
        diff -= diff.signum() * 180.0;
    }
    diff
}

/// Clean an element of a channel-wise absolute difference
///
/// The input is a magnitude. Values over 270° are folded
/// against a full turn and values over 135° against a half
/// turn.
#[inline]
pub fn clean_aligned_difference(diff: f64) -> f64 {
    if diff > 270.0 {
        (diff - 360.0).abs()
    } else if diff > 135.0 {
        (diff - 180.0).abs()
    } else {
        diff
    }
}

/// Which of the two designated tags a read came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagRole {
    /// The tag whose phase encodes the sensed quantity
    Sensor,

    /// The tag used to cancel common-mode drift
    Reference,
}

/// Tracks the latest self-difference of both tags
///
/// A value is available once the reference tag has a
/// self-difference. The sensor tag must also have one; a
/// read which has just anchored a new channel carries none.
///
/// Whether the reference tag has been read at all is tracked
/// separately. It stays set across channel hops until
/// [`reset()`](CrossTagDiff::reset).
#[derive(Clone, Debug, Default)]
pub struct CrossTagDiff {
    sensor: Option<f64>,
    reference: Option<f64>,
    reference_observed: bool,
}

impl CrossTagDiff {
    /// Nothing observed yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest self-difference of a tag (degrees)
    ///
    /// `self_diff` is `None` when the read anchored a channel.
    pub fn update(&mut self, role: TagRole, self_diff: Option<f64>) {
        match role {
            TagRole::Sensor => self.sensor = self_diff,
            TagRole::Reference => {
                self.reference = self_diff;
                self.reference_observed = true;
            }
        }
    }

    /// True once any reference read has been recorded
    pub fn reference_observed(&self) -> bool {
        self.reference_observed
    }

    /// Latest sensor self-difference
    pub fn sensor(&self) -> Option<f64> {
        self.sensor
    }

    /// Latest reference self-difference
    pub fn reference(&self) -> Option<f64> {
        self.reference
    }

    /// Cleaned sensor − reference difference (degrees)
    pub fn value(&self) -> Option<f64> {
        Some(clean_cross_tag(self.sensor? - self.reference?))
    }

    /// Forget both tags
    pub fn reset(&mut self) {
        self.sensor = None;
        self.reference = None;
        self.reference_observed = false;
    }
}
