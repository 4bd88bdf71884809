//! Replay loop
//!
//! Input is read one line at a time. Each line is one of:
//!
//! 1. A report batch: a JSON array of tag reports, which is
//!    run through the pipeline as one reporting cycle.
//!
//! 2. A reader event: a JSON object. The first
//!    `Start_of_ROSpec` event fixes the session clock.
//!
//! Blank lines are ignored. Lines which are not valid JSON,
//! or not either of the above, are logged and skipped.

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local, TimeZone};
use log::{debug, error, info, warn};
use serde::Deserialize;

use tagphase::{PhasePipeline, ReadRateCounter, TagDatabase, TagReport};

use crate::cli::Args;

/// Reader event which starts an inventory
const START_OF_ROSPEC: &str = "Start_of_ROSpec";

/// Prefix of exported session files
const EXPORT_PREFIX: &str = "tagphase";

/// Totals for one run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Batches processed
    pub cycles: u64,

    /// Values emitted
    pub accepted: u64,

    /// Candidates withheld as multipath
    pub multipath: u64,
}

/// Run the application
///
/// Replays every line of `input` through the `pipeline`,
/// printing accepted values unless `args` asks for quiet.
/// Returns once the input is exhausted. Read errors end the
/// run early but are not fatal.
pub fn run<R>(args: &Args, pipeline: &mut PhasePipeline, input: R) -> RunSummary
where
    R: BufRead,
{
    let database = pipeline.database();
    let mut rate = ReadRateCounter::new(database.total_tags_seen());
    let mut summary = RunSummary::default();

    let batches = input
        .lines()
        .map_while(|line| match line {
            Ok(line) => Some(line),
            Err(err) => {
                error!("unable to read input: {}", err);
                None
            }
        })
        .enumerate()
        .filter_map(|(lineno, line)| match parse_line(&line) {
            Ok(Some(InputLine::Batch(batch))) => Some(batch),
            Ok(Some(InputLine::ReaderEvent(event))) => {
                handle_event(&database, &event);
                None
            }
            Ok(None) => None,
            Err(err) => {
                warn!("line {}: skipping: {}", lineno + 1, err);
                None
            }
        });

    for report in pipeline.iter(batches) {
        summary.cycles += 1;
        if report.is_multipath() {
            summary.multipath += 1;
        }

        if let Some(rate) = rate.update(database.total_tags_seen()) {
            debug!("read rate: {:.1} reads/s", rate);
        }

        if let Some(value) = report.accepted() {
            summary.accepted += 1;
            if !args.quiet {
                println!("{}\t{:.3}", report.cycle, value);
            }
        }
    }

    info!(
        "processed {} cycle(s): {} accepted, {} multipath",
        summary.cycles, summary.accepted, summary.multipath
    );
    summary
}

/// Write the session history of `pipeline` into `dir`
///
/// The file is named for the current local time. Returns the
/// path of the file written.
pub fn export_session(pipeline: &PhasePipeline, dir: &Path) -> Result<PathBuf, anyhow::Error> {
    let path = export_path(dir, &Local::now());
    let file = File::create(&path)
        .with_context(|| format!("Unable to create export file \"{}\"", path.display()))?;

    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, &pipeline.session_export())
        .with_context(|| format!("Unable to write session to \"{}\"", path.display()))?;
    out.flush()
        .with_context(|| format!("Unable to write session to \"{}\"", path.display()))?;

    info!("session exported to \"{}\"", path.display());
    Ok(path)
}

/// One line of input
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
enum InputLine {
    Batch(Vec<TagReport>),
    ReaderEvent(ReaderEvent),
}

/// Reader event notification
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
struct ReaderEvent {
    #[serde(rename = "UTCTimestamp", default)]
    timestamp: Option<UtcTimestamp>,

    #[serde(rename = "ROSpecEvent", default)]
    rospec_event: Option<RoSpecEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
struct UtcTimestamp {
    #[serde(rename = "Microseconds", default)]
    microseconds: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
struct RoSpecEvent {
    #[serde(rename = "EventType", default)]
    event_type: String,
}

impl ReaderEvent {
    // Session start time (µs) if this event starts an inventory
    fn start_time(&self) -> Option<u64> {
        match &self.rospec_event {
            Some(ev) if ev.event_type == START_OF_ROSPEC => {
                Some(self.timestamp.as_ref().map_or(0, |ts| ts.microseconds))
            }
            _ => None,
        }
    }
}

// Parse one line; blank lines are None
fn parse_line(line: &str) -> Result<Option<InputLine>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

fn handle_event(database: &TagDatabase, event: &ReaderEvent) {
    match event.start_time() {
        Some(start_us) => database.set_start_time(start_us),
        None => debug!("ignoring reader event: {:?}", event),
    }
}

// Export filename for the given time
fn export_path<Tz>(dir: &Path, at: &DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    dir.join(format!(
        "{}_{}.json",
        EXPORT_PREFIX,
        at.format("%d%m%Y_%H%M%S")
    ))
}
