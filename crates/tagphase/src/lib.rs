//! # tagphase: RFID Differential Phase Sensing
//!
//! This crate turns a stream of RFID tag reads into a stable,
//! drift-corrected *differential phase* between two tags: a
//! **sensor** tag, whose backscatter phase responds to some
//! physical quantity, and a nearby **reference** tag, which
//! shares its multipath and reader drift but not the quantity.
//! Soil moisture, light level, and applied force have all been
//! sensed this way.
//!
//! ## Example
//!
//! You will first need tag reports from a UHF RFID reader which
//! reports per-read phase, such as an Impinj reader with
//! `ImpinjRFPhaseAngle` enabled. Connecting to the reader is
//! beyond the scope of this crate. Each report batch is a list
//! of [`TagReport`], which may be deserialized with serde.
//!
//! ```
//! use tagphase::{Epc, PhasePipelineBuilder, SignalSource, TagReport};
//!
//! # let some_batch_source = || Vec::<Vec<TagReport>>::new();
//! #
//! // create a pipeline for your sensor and reference tags
//! let mut pipeline = PhasePipelineBuilder::new(
//!     Epc::new("DEEDDEEDAC1F3841EC880467").unwrap(),
//!     Epc::new("BABABABAAC1F3841EC880467").unwrap(),
//! )
//! .with_stability_window(20)            // values averaged per output
//! .with_dispersion_threshold(3.0)       // multipath rejection, degrees σ
//! .with_signal_source(SignalSource::Dtw)
//! .build();
//!
//! // let batches be an iterator over reader reports
//! let batches = some_batch_source();
//! for cycle in pipeline.iter(batches) {
//!     if let Some(phase) = cycle.accepted() {
//!         println!("differential phase: {:.2}°", phase);
//!     }
//! }
//! ```
//!
//! The pipeline is created via a
//! [builder](PhasePipelineBuilder). Known deployments are
//! available as [presets](preset()).
//!
//! ## Processing
//!
//! Each batch of reports passes through:
//!
//! 1. The [`TagDatabase`], which keeps per-tag aggregates and
//!    an append-only [`PhaseHistory`] of every read.
//! 2. The [`PhaseUnwrapper`], which anchors each RF channel to
//!    its first phase and removes full-turn wraps and the
//!    half-turn ambiguity of the reader.
//! 3. The cross-tag differencer, [`CrossTagDiff`].
//! 4. The channel-wise aligner, [`align_channels()`], which
//!    time-warps both tags' recent phases on each channel with
//!    [`fastdtw()`].
//! 5. The [`StabilityFilter`], which withholds output while
//!    recent values disagree.
//!
//! The database may be shared with readers on other threads.
//! See [`TagDatabase`] for its consistency guarantees.
//!
//! ## Crate features
//!
//! * `parallel`: Align RF channels concurrently with rayon.
//!   Results are identical to sequential alignment.
//!

mod aligner;
mod builder;
mod database;
mod differential;
mod dtw;
mod event;
mod history;
mod output;
mod pipeline;
mod presets;
mod rate;
mod stability;
mod unwrap;

pub use aligner::{align_channels, AlignedPair, ChannelAlignments, ChannelOutcome, SkipReason};
pub use builder::{PhasePipelineBuilder, SignalSource};
pub use database::{
    read_history, BatchSummary, IngestedRead, SharedHistory, TagDatabase, TagRecord,
};
pub use differential::{
    clean_aligned_difference, clean_cross_tag, CrossTagDiff, TagRole, CROSS_TAG_RANGE,
};
pub use dtw::{dtw, fastdtw, AlignError, Warp};
pub use event::{
    Channel, Epc, EventError, TagKey, TagReadEvent, TagReport, DEFAULT_RSSI, NUM_CHANNELS,
};
pub use history::{
    window_samples, ChannelBuckets, HistoryExport, PhaseHistory, PhaseSample, READS_PER_SECOND,
};
pub use output::{CycleReport, SessionExport};
pub use pipeline::{PhasePipeline, PipelineIter};
pub use presets::{preset, preset_names, SensorPreset, DEFAULT_PRESET};
pub use rate::{ReadRateCounter, RATE_HISTORY};
pub use stability::{
    StabilityFilter, StabilityOutput, DEFAULT_DISPERSION_THRESHOLD, DEFAULT_STABILITY_WINDOW,
};
pub use unwrap::{
    fold_ambiguity, raw_to_radians, FoldLimits, PhaseUnwrapper, UnwrappedPhase, ANCHOR_LIMITS,
    PHASE_UNITS_PER_TURN, STEP_LIMITS, UNSET_SELF_DIFF,
};
