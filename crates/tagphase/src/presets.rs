//! Known sensor deployments
//!
//! Each deployment pairs a sensor tag with its reference tag
//! and chooses how many seconds of recent history feed the
//! channel-wise alignment.

use phf::phf_map;

use crate::event::{Epc, EventError};

/// Name of the preset used when none is given
pub const DEFAULT_PRESET: &str = "photo";

/// A sensor tag, its reference tag, and display hints
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SensorPreset {
    /// Preset name
    pub name: &'static str,

    /// EPC of the sensor tag
    pub sensor_epc: &'static str,

    /// EPC of the reference tag
    pub reference_epc: &'static str,

    /// Real-time history window (seconds)
    pub window_secs: usize,

    /// Suggested vertical plot range (degrees)
    pub y_range: u32,
}

impl SensorPreset {
    /// Parsed sensor and reference EPCs
    pub fn epcs(&self) -> Result<(Epc, Epc), EventError> {
        Ok((Epc::new(self.sensor_epc)?, Epc::new(self.reference_epc)?))
    }
}

impl std::fmt::Display for SensorPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: sensor {}, reference {}, {} s window",
            self.name, self.sensor_epc, self.reference_epc, self.window_secs
        )
    }
}

/// Look up a preset by name
///
/// Names are matched case-insensitively.
///
/// ```
/// let soil = tagphase::preset("Soil").unwrap();
/// assert_eq!("DEEDDEEDAC1F3841EC880467", soil.sensor_epc);
/// assert_eq!(10, soil.window_secs);
/// assert!(tagphase::preset("nope").is_none());
/// ```
pub fn preset(name: &str) -> Option<&'static SensorPreset> {
    PRESETS.get(name.trim().to_ascii_lowercase().as_str())
}

/// Names of every preset, sorted
pub fn preset_names() -> Vec<&'static str> {
    let mut names: Vec<_> = PRESETS.keys().copied().collect();
    names.sort_unstable();
    names
}

static PRESETS: phf::Map<&'static str, SensorPreset> = phf_map! {
    "stub" => SensorPreset {
        name: "stub",
        sensor_epc: "ADDAFB63AC1F3841EC880467",
        reference_epc: "ADDA1B63AC1F3841EC880467",
        window_secs: 1,
        y_range: 60,
    },
    "soil" => SensorPreset {
        name: "soil",
        sensor_epc: "DEEDDEEDAC1F3841EC880467",
        reference_epc: "BABABABAAC1F3841EC880467",
        window_secs: 10,
        y_range: 120,
    },
    "force" => SensorPreset {
        name: "force",
        sensor_epc: "EDDEFB63AC1F3681EC880468",
        reference_epc: "DEEDFB63AC1F3681EC880468",
        window_secs: 4,
        y_range: 90,
    },
    "photo" => SensorPreset {
        name: "photo",
        sensor_epc: "ECECFB63AC1F3841EC880467",
        reference_epc: "CECEFB63AC1F3841EC880467",
        window_secs: 4,
        y_range: 30,
    },
    "test" => SensorPreset {
        name: "test",
        sensor_epc: "ABBAFB63AC1F3841EC880467",
        reference_epc: "BAABFB63AC1F3841EC880467",
        window_secs: 4,
        y_range: 30,
    },
};
