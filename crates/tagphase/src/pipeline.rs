//! Full differential phase pipeline

#[cfg(not(test))]
use log::{debug, info};

#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;

use std::sync::Arc;

use crate::aligner::{align_channels, ChannelAlignments};
use crate::builder::{PhasePipelineBuilder, SignalSource};
use crate::database::{read_history, TagDatabase};
use crate::differential::{clean_cross_tag, CrossTagDiff, TagRole};
use crate::event::{TagKey, TagReport};
use crate::history::ChannelBuckets;
use crate::output::{CycleReport, SessionExport};
use crate::stability::StabilityFilter;

/// A complete differential phase pipeline
///
/// Each batch of tag reports runs through:
///
/// 1. The tag database, which unwraps each read's phase
///    against its channel anchor and appends it to the tag's
///    history.
/// 2. The cross-tag differencer, which subtracts the reference
///    tag's latest self-difference from the sensor tag's.
/// 3. The channel-wise aligner, which time-warps the recent
///    history of both tags on every RF channel and averages
///    their aligned differences.
/// 4. The stability filter, which emits a smoothed value only
///    while recent values agree.
///
/// The aligner runs once per batch, and only if the batch
/// recorded a phase sample of the sensor tag.
///
/// To create the pipeline, first create its Builder:
///
/// ```
/// use tagphase::{Epc, PhasePipelineBuilder, TagReport};
///
/// let mut pipeline = PhasePipelineBuilder::new(
///     Epc::new("AAAA").unwrap(),
///     Epc::new("BBBB").unwrap(),
/// )
/// .with_stability_window(2)
/// .build();
///
/// let read = |epc: &str, phase: u16| TagReport {
///     epc: Some(epc.to_owned()),
///     antenna_id: Some(1),
///     channel_index: Some(7),
///     phase: Some(phase),
///     ..Default::default()
/// };
///
/// let mut accepted = Vec::new();
/// for phase in [1000, 1000, 1010, 1010, 1020] {
///     let batch = [read("BBBB", 500), read("AAAA", phase)];
///     accepted.extend(pipeline.process_batch(&batch).accepted());
/// }
/// assert!(!accepted.is_empty());
/// ```
#[derive(Debug)]
pub struct PhasePipeline {
    database: Arc<TagDatabase>,
    sensor: TagKey,
    reference: TagKey,
    signal_source: SignalSource,
    history_window: Option<usize>,
    dtw_radius: usize,
    cross_tag: CrossTagDiff,
    filter: StabilityFilter,
    cycle_counter: u64,
}

impl PhasePipeline {
    /// Process one batch of tag reports
    ///
    /// A batch is everything the reader delivered in one
    /// report. Returns the outcome of this reporting cycle.
    pub fn process_batch(&mut self, reports: &[TagReport]) -> CycleReport {
        self.cycle_counter += 1;
        let summary = self.database.ingest_batch(reports);

        let mut sensor_reported = false;
        for read in &summary.events {
            let role = if read.key == self.sensor {
                TagRole::Sensor
            } else if read.key == self.reference {
                TagRole::Reference
            } else {
                continue;
            };

            if let Some(phase) = read.phase {
                self.cross_tag.update(role, phase.self_diff);
                sensor_reported |= role == TagRole::Sensor;
            }
        }

        let alignments = if sensor_reported {
            Some(self.align())
        } else {
            None
        };
        let dtw_mean = alignments
            .as_ref()
            .and_then(ChannelAlignments::mean_difference);
        let cross_tag = self.cross_tag.value();

        let candidate = if sensor_reported {
            match self.signal_source {
                SignalSource::Dtw => dtw_mean.filter(|_| self.cross_tag.reference_observed()),
                SignalSource::CrossTag => cross_tag,
                SignalSource::Sensor => self.cross_tag.sensor().map(clean_cross_tag),
            }
        } else {
            None
        };
        let stability = candidate.map(|v| self.filter.input(v));

        let report = CycleReport {
            cycle: self.cycle_counter,
            updated_tags: summary.updated_keys.len(),
            new_seen_count: summary.new_seen_count,
            sensor_reported,
            cross_tag,
            alignments,
            dtw_mean,
            candidate,
            stability,
        };

        match report.accepted() {
            Some(_) => info!("pipeline: {}", report),
            None => debug!("pipeline: {}", report),
        }
        report
    }

    /// Process batches of tag reports from a source
    ///
    /// Bind an iterator which will consume the `batches` and
    /// produce one [`CycleReport`] per batch. Each batch is
    /// anything which can be viewed as a slice of
    /// [`TagReport`], such as a `Vec<TagReport>`.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn iter<'p, I, T>(&'p mut self, batches: I) -> PipelineIter<'p, T>
    where
        I: IntoIterator<IntoIter = T>,
        T: Iterator,
        T::Item: AsRef<[TagReport]>,
    {
        PipelineIter {
            source: batches.into_iter(),
            pipeline: self,
        }
    }

    /// The tag database
    ///
    /// Readers may hold the database and take snapshots while
    /// the pipeline continues to ingest.
    pub fn database(&self) -> Arc<TagDatabase> {
        self.database.clone()
    }

    /// Database key of the sensor tag
    pub fn sensor_key(&self) -> &TagKey {
        &self.sensor
    }

    /// Database key of the reference tag
    pub fn reference_key(&self) -> &TagKey {
        &self.reference
    }

    /// Signal fed to the stability filter
    pub fn signal_source(&self) -> SignalSource {
        self.signal_source
    }

    /// The stability filter
    pub fn stability_filter(&self) -> &StabilityFilter {
        &self.filter
    }

    /// Number of batches processed since the last reset
    pub fn cycle_counter(&self) -> u64 {
        self.cycle_counter
    }

    /// Export the complete history of both tags
    ///
    /// A tag which has never been read exports as empty.
    pub fn session_export(&self) -> SessionExport {
        let mut out = SessionExport {
            sensor_epc: self.sensor.epc.to_string(),
            reference_epc: self.reference.epc.to_string(),
            ..Default::default()
        };

        if let Some(hist) = self.database.history(&self.sensor) {
            let hist = read_history(&hist);
            out.sensor = hist.export(None);
            out.sensor_channels = hist.channel_buckets(None).to_map();
        }
        if let Some(hist) = self.database.history(&self.reference) {
            let hist = read_history(&hist);
            out.reference = hist.export(None);
            out.reference_channels = hist.channel_buckets(None).to_map();
        }
        out
    }

    /// Clear all tag state and filter history
    ///
    /// The tag database is emptied and its session clock
    /// restarted. Readers holding the database see it empty.
    pub fn reset(&mut self) {
        self.database.clear();
        self.cross_tag.reset();
        self.filter.reset();
        self.cycle_counter = 0;
    }

    // Align the recent history of both tags
    fn align(&self) -> ChannelAlignments {
        let buckets = |key: &TagKey| -> ChannelBuckets {
            self.database
                .history(key)
                .map_or_else(ChannelBuckets::default, |shared| {
                    let hist = read_history(&shared);
                    hist.channel_buckets(self.history_window)
                })
        };

        align_channels(
            &buckets(&self.sensor),
            &buckets(&self.reference),
            self.dtw_radius,
        )
    }
}

impl From<&PhasePipelineBuilder> for PhasePipeline {
    /// Create the pipeline from its Builder
    fn from(cfg: &PhasePipelineBuilder) -> Self {
        Self {
            database: Arc::new(TagDatabase::new()),
            sensor: TagKey::new(cfg.sensor_epc().clone(), cfg.antenna()),
            reference: TagKey::new(cfg.reference_epc().clone(), cfg.antenna()),
            signal_source: cfg.signal_source(),
            history_window: cfg.history_window_samples(),
            dtw_radius: cfg.dtw_radius(),
            cross_tag: CrossTagDiff::new(),
            filter: StabilityFilter::new(cfg.stability_window(), cfg.dispersion_threshold()),
            cycle_counter: 0,
        }
    }
}

/// Batch source iterator
///
/// This iterator is bound to a source of tag report batches.
/// Calling the `next()` method processes the next batch and
/// returns its [`CycleReport`], or `None` once the source is
/// exhausted.
#[derive(Debug)]
pub struct PipelineIter<'p, I>
where
    I: Iterator,
    I::Item: AsRef<[TagReport]>,
{
    source: I,
    pipeline: &'p mut PhasePipeline,
}

impl<'p, I> Iterator for PipelineIter<'p, I>
where
    I: Iterator,
    I::Item: AsRef<[TagReport]>,
{
    type Item = CycleReport;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.source.next()?;
        Some(self.pipeline.process_batch(batch.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    use crate::event::Epc;
    use crate::stability::StabilityOutput;

    const SENSOR: &str = "ECECFB63AC1F3841EC880467";
    const REFERENCE: &str = "CECEFB63AC1F3841EC880467";

    fn read(epc: &str, chan: u32, phase: u16, t_us: u64) -> TagReport {
        TagReport {
            epc: Some(epc.to_owned()),
            antenna_id: Some(1),
            channel_index: Some(chan),
            peak_rssi: Some(-55),
            phase: Some(phase),
            first_seen_us: Some(t_us),
            last_seen_us: Some(t_us),
            ..Default::default()
        }
    }

    fn builder() -> PhasePipelineBuilder {
        PhasePipelineBuilder::new(
            Epc::new(SENSOR).expect("valid EPC"),
            Epc::new(REFERENCE).expect("valid EPC"),
        )
    }

    // raw phase units for an angle in degrees
    fn units(deg: f64) -> u16 {
        ((deg / 360.0 * 4096.0).round() as i64).rem_euclid(4096) as u16
    }

    // Both tags hop across a few channels. The sensor phase on
    // every channel sits `offset` degrees above its anchor and
    // the reference stays on its anchor.
    fn session(offset: f64, batches: usize) -> Vec<Vec<TagReport>> {
        (0..batches)
            .map(|i| {
                let chan = 1 + (i % 4) as u32;
                let t = i as u64 * 25_000;
                let shift = if i < 4 { 0.0 } else { offset };
                vec![
                    read(REFERENCE, chan, units(40.0 * chan as f64), t),
                    read(SENSOR, chan, units(100.0 + 10.0 * chan as f64 + shift), t + 1000),
                ]
            })
            .collect()
    }

    #[test]
    fn test_cross_tag_stream() {
        let mut pipeline = builder()
            .with_signal_source(SignalSource::CrossTag)
            .with_stability_window(5)
            .build();

        let reports: Vec<CycleReport> = pipeline.iter(session(12.0, 40)).collect();
        assert_eq!(40, reports.len());
        assert_eq!(40, pipeline.cycle_counter());

        // first visit to each channel only anchors it
        for rep in &reports[..4] {
            assert!(rep.sensor_reported);
            assert_eq!(None, rep.cross_tag);
            assert_eq!(None, rep.candidate);
        }

        // then a steady 12° difference
        for rep in &reports[4..] {
            assert_approx_eq!(12.0, rep.cross_tag.expect("both tags"), 0.2);
        }
        assert_eq!(
            Some(StabilityOutput::Filling { count: 1 }),
            reports[4].stability
        );
        let accepted: Vec<f64> = reports.iter().filter_map(CycleReport::accepted).collect();
        assert_eq!(40 - 4 - 4, accepted.len());
        for v in accepted {
            assert_approx_eq!(12.0, v, 0.2);
        }
    }

    #[test]
    fn test_dtw_stream() {
        let mut pipeline = builder().with_stability_window(3).build();
        assert_eq!(SignalSource::Dtw, pipeline.signal_source());

        let reports: Vec<CycleReport> = pipeline.iter(session(0.0, 24)).collect();
        let last = reports.last().expect("reports");
        let alignments = last.alignments.as_ref().expect("sensor reported");
        assert_eq!(4, alignments.aligned().count());
        assert_eq!(0, alignments.failures());

        // reference sits 40·c°, sensor 100 + 10·c° on channel c
        let expect = [1.0f64, 2.0, 3.0, 4.0]
            .iter()
            .map(|c| (100.0 + 10.0 * c - 40.0 * c).abs())
            .sum::<f64>()
            / 4.0;
        assert_approx_eq!(expect, last.dtw_mean.expect("aligned"), 0.2);

        // the window still holds cycles where some channels had
        // one read fewer than others
        assert_approx_eq!(expect, last.accepted().expect("stable"), 2.0);
    }

    #[test]
    fn test_dtw_reference_hops_channel() {
        let mut pipeline = builder().with_stability_window(1).build();
        for i in 0..4u64 {
            let t = i * 25_000;
            let rep = pipeline.process_batch(&[
                read(REFERENCE, 7, units(30.0), t),
                read(SENSOR, 7, units(60.0), t + 1000),
            ]);
            assert!(rep.candidate.is_some());
        }

        // the reference anchors channel 8 while the sensor stays on 7
        let rep = pipeline.process_batch(&[
            read(REFERENCE, 8, units(200.0), 100_000),
            read(SENSOR, 7, units(60.0), 101_000),
        ]);
        assert_eq!(None, rep.cross_tag);
        let dtw_mean = rep.dtw_mean.expect("channel 7 aligned");
        assert_approx_eq!(30.0, dtw_mean, 0.2);
        assert_eq!(Some(dtw_mean), rep.candidate);
        assert_eq!(Some(dtw_mean), rep.accepted());

        // no reference read yet after a reset
        pipeline.reset();
        let rep = pipeline.process_batch(&[read(SENSOR, 7, units(60.0), 0)]);
        assert!(rep.sensor_reported);
        assert_eq!(None, rep.candidate);
    }

    #[test]
    fn test_sensor_only() {
        let mut pipeline = builder()
            .with_signal_source(SignalSource::Sensor)
            .with_stability_window(1)
            .build();

        // no reference tag at all
        let batches: Vec<Vec<TagReport>> = (0..6)
            .map(|i| vec![read(SENSOR, 9, units(if i < 1 { 0.0 } else { 20.0 }), i * 1000)])
            .collect();
        let reports: Vec<CycleReport> = pipeline.iter(&batches).collect();
        assert_eq!(None, reports[0].accepted());
        assert_approx_eq!(20.0, reports[5].accepted().expect("stable"), 0.1);
        assert_eq!(None, reports[5].cross_tag);
    }

    #[test]
    fn test_no_sensor_no_candidate() {
        let mut pipeline = builder().with_stability_window(1).build();
        let rep = pipeline.process_batch(&[read(REFERENCE, 1, 0, 0), read(REFERENCE, 1, 5, 10)]);
        assert!(!rep.sensor_reported);
        assert_eq!(None, rep.alignments);
        assert_eq!(None, rep.candidate);
        assert_eq!(None, rep.stability);
        assert_eq!(1, rep.updated_tags);
        assert_eq!(2, rep.new_seen_count);

        // unrelated tags are stored but ignored
        let rep = pipeline.process_batch(&[read("0BAD", 1, 0, 20)]);
        assert_eq!(None, rep.candidate);
        assert_eq!(2, pipeline.database().len());
    }

    #[test]
    fn test_multipath_rejected() {
        let mut pipeline = builder()
            .with_signal_source(SignalSource::CrossTag)
            .with_stability_window(4)
            .with_dispersion_threshold(2.0)
            .build();

        let mut batches = session(10.0, 12);
        // a burst of wildly different sensor phase
        batches.push(vec![
            read(REFERENCE, 1, units(40.0), 400_000),
            read(SENSOR, 1, units(110.0 + 60.0), 401_000),
        ]);

        let reports: Vec<CycleReport> = pipeline.iter(batches).collect();
        assert!(reports[11].accepted().is_some());
        assert!(reports[12].is_multipath());
        assert_eq!(None, reports[12].accepted());
    }

    #[test]
    fn test_export_and_reset() {
        let mut pipeline = builder().build();
        for _ in pipeline.iter(session(5.0, 8)) {}

        let export = pipeline.session_export();
        assert_eq!(SENSOR, export.sensor_epc);
        assert_eq!(8, export.sensor.timestamps.len());
        assert_eq!(8, export.reference.raw_phases.len());
        assert_eq!(vec![1u8, 2, 3, 4], export.sensor_channels.keys().cloned().collect::<Vec<_>>());
        assert_eq!(2, export.reference_channels[&3].len());

        let json = serde_json::to_value(&export).expect("serializable");
        for field in ["timestamps", "channels", "diffs", "rssis", "raw_phases"] {
            assert!(json["sensor"][field].is_array(), "missing {}", field);
        }

        let db = pipeline.database();
        pipeline.reset();
        assert!(db.is_empty());
        assert_eq!(0, pipeline.cycle_counter());
        assert!(!pipeline.stability_filter().is_populated());

        let export = pipeline.session_export();
        assert!(export.sensor.timestamps.is_empty());
        assert!(export.sensor_channels.is_empty());
    }
}
