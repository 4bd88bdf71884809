//! Inbound tag reports and normalized read events

use std::convert::TryFrom;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Number of RF channels the radio may hop across
pub const NUM_CHANNELS: usize = 50;

/// RSSI substituted when a report carries no `PeakRSSI` (dBm)
pub const DEFAULT_RSSI: i32 = -120;

/// Error interpreting a tag report line item
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventError {
    /// The report has no EPC at all
    #[error("tag report is missing its EPC")]
    MissingEpc,

    /// EPC is not a hexadecimal string
    #[error("invalid EPC \"{0}\": expected hexadecimal digits")]
    InvalidEpc(String),

    /// Channel index outside of `1..=50`
    #[error("channel index {0} is outside of 1..={max}", max = NUM_CHANNELS)]
    ChannelOutOfRange(u32),
}

/// Electronic Product Code
///
/// The unique identifier carried by a tag. EPCs are stored
/// as upper-case hexadecimal strings, which is how the radio
/// session reports them.
///
/// ```
/// use tagphase::Epc;
///
/// let epc = Epc::new("deedDEEDac1f3841ec880467").unwrap();
/// assert_eq!("DEEDDEEDAC1F3841EC880467", epc.as_str());
/// assert!(Epc::new("not-hex").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epc(String);

impl Epc {
    /// Parse and normalize an EPC string
    ///
    /// Surrounding whitespace is removed and the digits are
    /// upper-cased.
    pub fn new<S>(epc: S) -> Result<Self, EventError>
    where
        S: AsRef<str>,
    {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^[0-9A-F]+$").expect("bad EPC regexp");
        }

        let epc = epc.as_ref().trim().to_ascii_uppercase();
        if RE.is_match(&epc) {
            Ok(Self(epc))
        } else {
            Err(EventError::InvalidEpc(epc))
        }
    }

    /// EPC as an upper-case hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Epc {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Epc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Epc {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// RF channel index, `1..=50`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    /// One-based channel number
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based index into per-channel tables
    pub fn index(&self) -> usize {
        self.0 as usize - 1
    }

    /// Channel for a zero-based table index
    pub(crate) fn from_index(index: usize) -> Option<Self> {
        if index < NUM_CHANNELS {
            Some(Self(index as u8 + 1))
        } else {
            None
        }
    }

    /// Iterate over every channel, in order
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..NUM_CHANNELS).filter_map(Channel::from_index)
    }
}

impl TryFrom<u32> for Channel {
    type Error = EventError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value >= 1 && value as usize <= NUM_CHANNELS {
            Ok(Self(value as u8))
        } else {
            Err(EventError::ChannelOutOfRange(value))
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of the Tag Database: one tag as seen by one antenna
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagKey {
    /// Tag identifier
    pub epc: Epc,

    /// Antenna which read the tag
    pub antenna_id: u16,
}

impl TagKey {
    /// Key for `epc` on antenna `antenna_id`
    pub fn new(epc: Epc, antenna_id: u16) -> Self {
        Self { epc, antenna_id }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.epc, self.antenna_id)
    }
}

/// One line item of a radio tag report
///
/// This is the decoded form handed over by the radio session.
/// Every field may be absent. Field names match the wire
/// names so that recorded reports can be deserialized
/// directly.
///
/// Defaults are substituted when the report is normalized
/// into a [`TagReadEvent`]:
///
/// | field         | default |
/// |---------------|---------|
/// | phase         | 0       |
/// | doppler       | 0       |
/// | RSSI          | −120    |
/// | seen count    | 1       |
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TagReport {
    /// Tag EPC, hexadecimal
    #[serde(rename = "EPC", default)]
    pub epc: Option<String>,

    /// Antenna which read the tag
    #[serde(rename = "AntennaID", default)]
    pub antenna_id: Option<u16>,

    /// RF channel, `1..=50`
    #[serde(rename = "ChannelIndex", default)]
    pub channel_index: Option<u32>,

    /// Peak RSSI of the read (dBm)
    #[serde(rename = "PeakRSSI", default)]
    pub peak_rssi: Option<i32>,

    /// Number of times the tag was seen for this line item
    #[serde(rename = "TagSeenCount", default)]
    pub seen_count: Option<u32>,

    /// First-seen time (µs, reader clock)
    #[serde(rename = "FirstSeenTimestampUTC", default)]
    pub first_seen_us: Option<u64>,

    /// Last-seen time (µs, reader clock)
    #[serde(rename = "LastSeenTimestampUTC", default)]
    pub last_seen_us: Option<u64>,

    /// Raw phase, 1/4096ths of a full turn
    #[serde(rename = "ImpinjRFPhaseAngle", default)]
    pub phase: Option<u16>,

    /// Doppler frequency (Hz)
    #[serde(rename = "ImpinjRFDopplerFrequency", default)]
    pub doppler: Option<f64>,
}

/// A normalized tag-read event
///
/// Produced once per [`TagReport`] line item after default
/// substitution. Timestamps are in whole milliseconds relative
/// to the session start time.
#[derive(Clone, Debug, PartialEq)]
pub struct TagReadEvent {
    /// Tag which was read
    pub key: TagKey,

    /// RF channel of the read
    ///
    /// `Err` if the report carried an unusable channel. Such
    /// events still update the tag's aggregate record but do
    /// not produce a phase sample.
    pub channel: Result<Channel, EventError>,

    /// Channel index as reported, 0 if absent
    pub channel_index: u32,

    /// Raw phase (1/4096 turn), if reported
    pub raw_phase: Option<u16>,

    /// RSSI (dBm)
    pub rssi: i32,

    /// Doppler frequency (Hz), if reported
    pub doppler: Option<f64>,

    /// Seen count for this line item
    pub seen_count: u32,

    /// First-seen time (ms since session start)
    pub first_seen_ms: u64,

    /// Last-seen time (ms since session start)
    pub last_seen_ms: u64,
}

impl TagReadEvent {
    /// Raw phase with the default substituted
    pub fn raw_phase_or_default(&self) -> u16 {
        self.raw_phase.unwrap_or(0)
    }

    /// Doppler with the default substituted
    pub fn doppler_or_default(&self) -> f64 {
        self.doppler.unwrap_or(0.0)
    }
}

impl TagReport {
    /// Normalize into a [`TagReadEvent`]
    ///
    /// `start_us` is the session start time. If it is not yet
    /// known, this report's first-seen time becomes the start
    /// time and is written back.
    pub fn to_event(&self, start_us: &mut Option<u64>) -> Result<TagReadEvent, EventError> {
        let epc = Epc::new(self.epc.as_deref().ok_or(EventError::MissingEpc)?)?;
        let key = TagKey::new(epc, self.antenna_id.unwrap_or(0));

        let (start, first_seen_ms) = match *start_us {
            Some(start) => (
                start,
                relative_ms(self.first_seen_us.unwrap_or(start), start),
            ),
            None => {
                // missed the start of inventory, or the database was
                // cleared while running
                let start = self.first_seen_us.unwrap_or(0);
                *start_us = Some(start);
                (start, 0)
            }
        };
        let last_seen_ms = relative_ms(self.last_seen_us.unwrap_or(start), start);

        let channel_index = self.channel_index.unwrap_or(0);
        Ok(TagReadEvent {
            key,
            channel: Channel::try_from(channel_index),
            channel_index,
            raw_phase: self.phase,
            rssi: self.peak_rssi.unwrap_or(DEFAULT_RSSI),
            doppler: self.doppler,
            seen_count: self.seen_count.unwrap_or(1),
            first_seen_ms,
            last_seen_ms,
        })
    }
}

// Whole milliseconds between reader timestamps, saturating at zero
#[inline]
fn relative_ms(t_us: u64, start_us: u64) -> u64 {
    t_us.saturating_sub(start_us) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epc() {
        let epc = Epc::new(" abba0123 ").expect("valid EPC");
        assert_eq!("ABBA0123", epc.as_str());
        assert_eq!("ABBA0123", &format!("{}", epc));

        assert_eq!(
            Err(EventError::InvalidEpc("XYZ".to_owned())),
            Epc::new("xyz")
        );
        assert!(Epc::new("").is_err());
    }

    #[test]
    fn test_channel() {
        assert_eq!(Channel::try_from(1).unwrap().index(), 0);
        assert_eq!(Channel::try_from(50).unwrap().index(), 49);
        assert_eq!(
            Err(EventError::ChannelOutOfRange(0)),
            Channel::try_from(0)
        );
        assert_eq!(
            Err(EventError::ChannelOutOfRange(51)),
            Channel::try_from(51)
        );
        assert_eq!(50, Channel::all().count());
        assert_eq!(Some(50), Channel::all().last().map(|c| c.get()));
    }

    #[test]
    fn test_report_defaults() {
        let report = TagReport {
            epc: Some("abba".to_owned()),
            antenna_id: Some(1),
            channel_index: Some(7),
            first_seen_us: Some(5_000_000),
            ..Default::default()
        };

        // no start time: this report starts the session
        let mut start = None;
        let evt = report.to_event(&mut start).expect("valid report");
        assert_eq!(Some(5_000_000), start);
        assert_eq!(0, evt.first_seen_ms);
        assert_eq!(0, evt.last_seen_ms);
        assert_eq!(DEFAULT_RSSI, evt.rssi);
        assert_eq!(1, evt.seen_count);
        assert_eq!(0, evt.raw_phase_or_default());
        assert_eq!(0.0, evt.doppler_or_default());
        assert_eq!(Ok(7), evt.channel.map(|c| c.get()));

        // later report is relative to the start
        let report = TagReport {
            first_seen_us: Some(5_250_999),
            last_seen_us: Some(5_300_000),
            ..report
        };
        let evt = report.to_event(&mut start).expect("valid report");
        assert_eq!(250, evt.first_seen_ms);
        assert_eq!(300, evt.last_seen_ms);
    }

    #[test]
    fn test_report_errors() {
        let mut start = Some(0);
        assert_eq!(
            Err(EventError::MissingEpc),
            TagReport::default().to_event(&mut start)
        );

        // missing channel is not fatal to the event
        let report = TagReport {
            epc: Some("01".to_owned()),
            ..Default::default()
        };
        let evt = report.to_event(&mut start).expect("valid report");
        assert_eq!(Err(EventError::ChannelOutOfRange(0)), evt.channel);
    }

    #[test]
    fn test_deserialize() {
        let report: TagReport = serde_json::from_str(
            r#"{"EPC": "DEEDDEEDAC1F3841EC880467", "AntennaID": 1, "ChannelIndex": 12,
                "PeakRSSI": -51, "TagSeenCount": 2, "FirstSeenTimestampUTC": 1000,
                "LastSeenTimestampUTC": 2000, "ImpinjRFPhaseAngle": 1024}"#,
        )
        .expect("valid JSON");
        assert_eq!(Some(12), report.channel_index);
        assert_eq!(Some(1024), report.phase);
        assert_eq!(None, report.doppler);
        assert_eq!(Some(-51), report.peak_rssi);
    }
}
