use strum::EnumMessage;

use crate::event::{Epc, EventError};
use crate::history::window_samples;
use crate::pipeline::PhasePipeline;
use crate::presets::SensorPreset;
use crate::stability::{DEFAULT_DISPERSION_THRESHOLD, DEFAULT_STABILITY_WINDOW};

/// Which differential signal feeds the stability filter
///
/// ```
/// use std::str::FromStr;
/// use tagphase::SignalSource;
///
/// assert_eq!(SignalSource::CrossTag, SignalSource::from_str("cross-tag").unwrap());
/// assert_eq!("dtw", SignalSource::Dtw.as_ref());
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::EnumMessage,
    strum_macros::EnumString,
)]
pub enum SignalSource {
    /// Mean channel-wise difference after time warping
    ///
    /// Available once the reference tag has been read at all,
    /// even while its latest read is anchoring a new channel.
    #[strum(
        serialize = "dtw",
        detailed_message = "mean phase difference of the time-warped channels"
    )]
    Dtw,

    /// Latest sensor self-difference minus reference self-difference
    #[strum(
        serialize = "cross-tag",
        detailed_message = "sensor minus reference self-difference"
    )]
    CrossTag,

    /// Latest sensor self-difference alone
    ///
    /// No reference tag is required. Drift common to both tags
    /// is not removed.
    #[strum(
        serialize = "sensor",
        detailed_message = "sensor self-difference only, no reference"
    )]
    Sensor,
}

impl SignalSource {
    /// Human-readable description
    pub fn describe(&self) -> &'static str {
        self.get_detailed_message().unwrap_or("")
    }
}

impl Default for SignalSource {
    fn default() -> Self {
        SignalSource::Dtw
    }
}

/// Builds a differential phase pipeline
///
/// The builder comes with a sensible set of default options.
/// All you really need to provide are the EPCs of the sensor
/// tag and of its reference tag.
///
/// The API specified by the builder is part of this crate's
/// API. The actual default values are *not*, however, and
/// are subject to revision in any minor release. If you
/// care very strongly about a setting, be sure to configure
/// it here.
///
/// ```
/// use tagphase::{Epc, PhasePipelineBuilder, SignalSource};
///
/// let pipeline = PhasePipelineBuilder::new(
///     Epc::new("ECECFB63AC1F3841EC880467").unwrap(),
///     Epc::new("CECEFB63AC1F3841EC880467").unwrap(),
/// )
/// .with_stability_window(10)
/// .with_signal_source(SignalSource::CrossTag)
/// .build();
/// assert_eq!(SignalSource::CrossTag, pipeline.signal_source());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct PhasePipelineBuilder {
    sensor_epc: Epc,
    reference_epc: Epc,
    antenna: u16,
    stability_window: usize,
    dispersion_threshold: f64,
    signal_source: SignalSource,
    history_window_secs: Option<usize>,
    dtw_radius: usize,
}

impl PhasePipelineBuilder {
    /// New pipeline with "sensible" defaults
    ///
    /// `sensor_epc` is the tag whose phase responds to the
    /// sensed quantity. `reference_epc` is a nearby tag which
    /// shares its multipath and reader drift.
    pub fn new(sensor_epc: Epc, reference_epc: Epc) -> Self {
        Self {
            sensor_epc,
            reference_epc,
            antenna: 1,
            stability_window: DEFAULT_STABILITY_WINDOW,
            dispersion_threshold: DEFAULT_DISPERSION_THRESHOLD,
            signal_source: SignalSource::default(),
            history_window_secs: Some(10),
            dtw_radius: 1,
        }
    }

    /// New pipeline for a known sensor deployment
    ///
    /// Takes the tag pair and history window from `preset`.
    /// Other options take their defaults.
    pub fn from_preset(preset: &SensorPreset) -> Result<Self, EventError> {
        let (sensor, reference) = preset.epcs()?;
        let mut out = Self::new(sensor, reference);
        out.with_history_window_secs(preset.window_secs);
        Ok(out)
    }

    /// Build a pipeline
    ///
    /// Once built, the pipeline is immediately ready to
    /// process tag reports.
    pub fn build(&self) -> PhasePipeline {
        PhasePipeline::from(self)
    }

    /// Sensor tag EPC
    pub fn with_sensor_epc(&mut self, epc: Epc) -> &mut Self {
        self.sensor_epc = epc;
        self
    }

    /// Reference tag EPC
    pub fn with_reference_epc(&mut self, epc: Epc) -> &mut Self {
        self.reference_epc = epc;
        self
    }

    /// Antenna which reads both tags
    pub fn with_antenna(&mut self, antenna: u16) -> &mut Self {
        self.antenna = antenna;
        self
    }

    /// Stability filter length (values)
    ///
    /// Nothing is emitted until this many candidate values have
    /// been seen. Longer windows are smoother but slower to
    /// recover from multipath. Clamped to at least one.
    pub fn with_stability_window(&mut self, len: usize) -> &mut Self {
        self.stability_window = usize::max(len, 1);
        self
    }

    /// Stability filter dispersion threshold (degrees)
    ///
    /// A window is emitted only while its standard deviation is
    /// less than `max_std_dev`. Very large values disable
    /// multipath rejection. Negative values are treated as
    /// zero, which rejects everything.
    pub fn with_dispersion_threshold(&mut self, max_std_dev: f64) -> &mut Self {
        self.dispersion_threshold = f64::max(max_std_dev, 0.0);
        self
    }

    /// Signal fed to the stability filter
    pub fn with_signal_source(&mut self, source: SignalSource) -> &mut Self {
        self.signal_source = source;
        self
    }

    /// Real-time history window (seconds)
    ///
    /// Channel-wise alignment considers only the most recent
    /// reads of each tag, about [`READS_PER_SECOND`](crate::READS_PER_SECOND)
    /// per second of window.
    pub fn with_history_window_secs(&mut self, secs: usize) -> &mut Self {
        self.history_window_secs = Some(usize::max(secs, 1));
        self
    }

    /// Align the full history of each tag
    ///
    /// Alignment cost grows with the session length.
    pub fn without_history_window(&mut self) -> &mut Self {
        self.history_window_secs = None;
        self
    }

    /// FastDTW search radius
    ///
    /// Larger values approach exact time warping at greater
    /// cost. Values below one may fail to align odd-length
    /// sequences.
    pub fn with_dtw_radius(&mut self, radius: usize) -> &mut Self {
        self.dtw_radius = radius;
        self
    }

    /// Sensor tag EPC
    pub fn sensor_epc(&self) -> &Epc {
        &self.sensor_epc
    }

    /// Reference tag EPC
    pub fn reference_epc(&self) -> &Epc {
        &self.reference_epc
    }

    /// Antenna which reads both tags
    pub fn antenna(&self) -> u16 {
        self.antenna
    }

    /// Stability filter length (values)
    pub fn stability_window(&self) -> usize {
        self.stability_window
    }

    /// Stability filter dispersion threshold (degrees)
    pub fn dispersion_threshold(&self) -> f64 {
        self.dispersion_threshold
    }

    /// Signal fed to the stability filter
    pub fn signal_source(&self) -> SignalSource {
        self.signal_source
    }

    /// Real-time history window (seconds), or `None` for all
    pub fn history_window_secs(&self) -> Option<usize> {
        self.history_window_secs
    }

    /// Real-time history window (reads), or `None` for all
    pub fn history_window_samples(&self) -> Option<usize> {
        self.history_window_secs.map(window_samples)
    }

    /// FastDTW search radius
    pub fn dtw_radius(&self) -> usize {
        self.dtw_radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use crate::presets::preset;

    fn epc(s: &str) -> Epc {
        Epc::new(s).expect("valid EPC")
    }

    #[test]
    fn test_defaults() {
        let builder = PhasePipelineBuilder::new(epc("AA"), epc("BB"));
        assert_eq!("AA", builder.sensor_epc().as_str());
        assert_eq!("BB", builder.reference_epc().as_str());
        assert_eq!(1, builder.antenna());
        assert_eq!(20, builder.stability_window());
        assert_eq!(3.0, builder.dispersion_threshold());
        assert_eq!(SignalSource::Dtw, builder.signal_source());
        assert_eq!(Some(10), builder.history_window_secs());
        assert_eq!(Some(350), builder.history_window_samples());
        assert_eq!(1, builder.dtw_radius());
    }

    #[test]
    fn test_setters_clamp() {
        let mut builder = PhasePipelineBuilder::new(epc("AA"), epc("BB"));
        builder
            .with_stability_window(0)
            .with_dispersion_threshold(-4.0)
            .with_history_window_secs(0)
            .with_antenna(2)
            .with_reference_epc(epc("CC"));
        assert_eq!(1, builder.stability_window());
        assert_eq!(0.0, builder.dispersion_threshold());
        assert_eq!(Some(1), builder.history_window_secs());
        assert_eq!(2, builder.antenna());
        assert_eq!("CC", builder.reference_epc().as_str());

        builder.without_history_window();
        assert_eq!(None, builder.history_window_samples());
    }

    #[test]
    fn test_from_preset() {
        let builder =
            PhasePipelineBuilder::from_preset(preset("soil").expect("preset")).expect("valid");
        assert_eq!("DEEDDEEDAC1F3841EC880467", builder.sensor_epc().as_str());
        assert_eq!("BABABABAAC1F3841EC880467", builder.reference_epc().as_str());
        assert_eq!(Some(10), builder.history_window_secs());
    }

    #[test]
    fn test_signal_source() {
        for src in SignalSource::iter() {
            assert_eq!(Ok(src), SignalSource::from_str(src.as_ref()));
            assert_eq!(src.as_ref(), &src.to_string());
            assert!(!src.describe().is_empty());
        }
        assert!(SignalSource::from_str("fft").is_err());
    }
}
