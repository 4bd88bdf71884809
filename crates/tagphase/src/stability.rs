//! Rolling dispersion gate
//!
//! Multipath reflections make the differential phase jump
//! erratically. The [`StabilityFilter`] keeps the last `N`
//! candidate values in a circular buffer and only emits their
//! mean while the buffer's standard deviation stays under a
//! threshold.
//!
//! ```txt
//!   candidate ──► [ v0 v1 … vN-1 ] ──► σ < threshold ? ──► mean
//!                      ▲ cursor                │
//!                                              └─► (withheld)
//! ```
//!
//! Rejection withholds one emission. It never clears the
//! buffer, so output resumes as soon as the outliers age out.

use nalgebra::DVector;

#[cfg(not(test))]
use log::trace;

#[cfg(test)]
use std::println as trace;

/// Default number of values in the rolling buffer
pub const DEFAULT_STABILITY_WINDOW: usize = 20;

/// Default dispersion threshold (degrees, standard deviation)
pub const DEFAULT_DISPERSION_THRESHOLD: f64 = 3.0;

/// Result of one [`StabilityFilter::input()`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StabilityOutput {
    /// The buffer is not yet full
    ///
    /// `count` values have been written so far.
    Filling { count: usize },

    /// The buffer is stable; `mean` is the emitted value
    Accepted { mean: f64, std_dev: f64 },

    /// Dispersion too high; nothing is emitted
    Rejected { std_dev: f64 },
}

impl StabilityOutput {
    /// The emitted value, if any
    pub fn accepted(&self) -> Option<f64> {
        match self {
            StabilityOutput::Accepted { mean, .. } => Some(*mean),
            _ => None,
        }
    }

    /// True if the filter judged this input a multipath outlier
    pub fn is_rejected(&self) -> bool {
        matches!(self, StabilityOutput::Rejected { .. })
    }

    /// Standard deviation of the buffer, once full
    pub fn std_dev(&self) -> Option<f64> {
        match self {
            StabilityOutput::Filling { .. } => None,
            StabilityOutput::Accepted { std_dev, .. } => Some(*std_dev),
            StabilityOutput::Rejected { std_dev } => Some(*std_dev),
        }
    }
}

impl std::fmt::Display for StabilityOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StabilityOutput::Filling { count } => write!(f, "filling ({})", count),
            StabilityOutput::Accepted { mean, std_dev } => {
                write!(f, "accepted {:.2}° (σ {:.2}°)", mean, std_dev)
            }
            StabilityOutput::Rejected { std_dev } => write!(f, "multipath (σ {:.2}°)", std_dev),
        }
    }
}

/// Fixed-capacity rolling dispersion filter
///
/// The buffer becomes *populated* on the `N`-th input, and
/// that input is already evaluated. Every later input
/// overwrites the oldest value.
///
/// ```
/// use tagphase::{StabilityFilter, StabilityOutput};
///
/// let mut filt = StabilityFilter::new(3, 1.0);
/// assert_eq!(StabilityOutput::Filling { count: 1 }, filt.input(10.0));
/// assert_eq!(StabilityOutput::Filling { count: 2 }, filt.input(10.0));
/// assert_eq!(Some(10.0), filt.input(10.0).accepted());
/// assert!(filt.input(40.0).is_rejected());
/// ```
#[derive(Clone, Debug)]
pub struct StabilityFilter {
    buffer: DVector<f64>,
    cursor: usize,
    written: usize,
    threshold: f64,
}

impl StabilityFilter {
    /// New filter over `capacity` values
    ///
    /// Inputs are accepted while the population standard
    /// deviation of the buffer is strictly less than
    /// `threshold`. A `capacity` of zero is treated as one.
    pub fn new(capacity: usize, threshold: f64) -> Self {
        Self {
            buffer: DVector::zeros(usize::max(capacity, 1)),
            cursor: 0,
            written: 0,
            threshold,
        }
    }

    /// Add a candidate value and evaluate the buffer
    pub fn input(&mut self, value: f64) -> StabilityOutput {
        let cap = self.capacity();
        self.buffer[self.cursor] = value;
        self.cursor = (self.cursor + 1) % cap;
        self.written = usize::min(self.written + 1, cap);

        if !self.is_populated() {
            return StabilityOutput::Filling {
                count: self.written,
            };
        }

        let mean = self.buffer.mean();
        let std_dev = (self.buffer.add_scalar(-mean).norm_squared() / cap as f64).sqrt();
        if std_dev < self.threshold {
            StabilityOutput::Accepted { mean, std_dev }
        } else {
            trace!(
                "stability: rejected {:.2} (σ = {:.2}, limit {:.2})",
                value,
                std_dev,
                self.threshold
            );
            StabilityOutput::Rejected { std_dev }
        }
    }

    /// True once `capacity` values have been written
    pub fn is_populated(&self) -> bool {
        self.written >= self.capacity()
    }

    /// Buffer size
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Dispersion threshold (standard deviation)
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Change the dispersion threshold
    ///
    /// Buffered values are kept.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Buffered values, oldest first
    pub fn values(&self) -> Vec<f64> {
        let cap = self.capacity();
        let start = if self.is_populated() { self.cursor } else { 0 };
        (0..self.written)
            .map(|i| self.buffer[(start + i) % cap])
            .collect()
    }

    /// Empty the buffer
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.cursor = 0;
        self.written = 0;
    }
}

impl Default for StabilityFilter {
    fn default() -> Self {
        Self::new(DEFAULT_STABILITY_WINDOW, DEFAULT_DISPERSION_THRESHOLD)
    }
}
