use std::fmt::Display;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{error::ErrorKind, value_parser, CommandFactory, Parser};

use tagphase::{Epc, PhasePipelineBuilder, SignalSource, DEFAULT_PRESET};

/// Standard input filename
const STDIN_FILE: &str = "-";

const USAGE_SHORT: &str = r#"
This program replays recorded RFID tag reports through a differential phase pipeline and prints each accepted phase value, in degrees.

See --help for more details.
"#;

const USAGE_LONG: &str = r#"
This program replays recorded RFID tag reports through a differential phase pipeline and prints each accepted phase value, in degrees.

The input is JSON lines. Each line is either one report batch, which is an array of tag reports:

    [{"EPC": "ECECFB63AC1F3841EC880467", "AntennaID": 1,
      "ChannelIndex": 12, "PeakRSSI": -51, "TagSeenCount": 1,
      "FirstSeenTimestampUTC": 1700000000000000,
      "LastSeenTimestampUTC": 1700000000000000,
      "ImpinjRFPhaseAngle": 1024}]

or a reader event. A start-of-inventory event sets the session clock:

    {"UTCTimestamp": {"Microseconds": 1700000000000000},
     "ROSpecEvent": {"EventType": "Start_of_ROSpec"}}

Each accepted value is printed as

    <cycle> <degrees>

The sensor and reference tags come from a --preset unless they are given with --sensor and --reference. Use --list-presets to see them.

With --export-dir, the complete phase history of both tags is written to a date-stamped JSON file when the input ends.
"#;

const ADVANCED: &str = "Advanced Pipeline Options";

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(version)]
#[command(about, long_about = None)]
#[command(after_help = USAGE_SHORT, after_long_help = USAGE_LONG)]
#[command(max_term_width = 100)]
pub struct Args {
    /// Verbosity level (-vvv for more)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print NOTHING, not even phase values
    #[arg(short, long)]
    pub quiet: bool,

    /// Sensor deployment preset
    #[arg(short, long, default_value_t = DEFAULT_PRESET.to_string())]
    pub preset: String,

    /// List sensor presets and exit
    #[arg(long)]
    pub list_presets: bool,

    /// Sensor tag EPC (overrides --preset)
    #[arg(long)]
    pub sensor: Option<Epc>,

    /// Reference tag EPC (overrides --preset)
    #[arg(long)]
    pub reference: Option<Epc>,

    /// Antenna which reads both tags
    #[arg(short, long, default_value_t = 1)]
    pub antenna: u16,

    /// Signal to stabilize and print
    ///
    /// "dtw" averages the time-warped channel-wise difference of
    /// both tags. "cross-tag" subtracts the reference tag's latest
    /// phase change from the sensor tag's. "sensor" uses the sensor
    /// tag's phase change alone.
    #[arg(short, long, default_value_t = SignalSource::Dtw)]
    #[arg(value_parser = value_parser!(SignalSource))]
    pub source: SignalSource,

    /// Input file (or "-" for stdin)
    ///
    /// JSON lines of report batches and reader events.
    #[arg(long, default_value_t = STDIN_FILE.to_string())]
    pub file: String,

    /// Write the session history to this directory at exit
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Values averaged per output
    #[arg(long, default_value_t = 20)]
    #[arg(value_parser = value_parser!(u32).range(1..))]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub window: u32,

    /// Multipath rejection threshold (degrees, std. dev.)
    ///
    /// Output is withheld while the standard deviation of the last
    /// --window values is at least this large.
    #[arg(long, default_value_t = 3.0)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub max_dispersion: f64,

    /// Seconds of recent history to align (default: from preset)
    #[arg(long)]
    #[arg(value_parser = value_parser!(u32).range(1..))]
    #[arg(conflicts_with = "full_history")]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub history_secs: Option<u32>,

    /// Align the complete history of each tag
    #[arg(long)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub full_history: bool,

    /// FastDTW search radius
    #[arg(long, default_value_t = 1)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub dtw_radius: u32,
}

impl Args {
    /// Return true if the user requests input from stdin
    pub fn input_is_stdin(&self) -> bool {
        self.file == STDIN_FILE
    }

    /// Configure a pipeline from these arguments
    pub fn pipeline_builder(&self) -> Result<PhasePipelineBuilder, anyhow::Error> {
        let preset = tagphase::preset(&self.preset).ok_or_else(|| {
            anyhow!(
                "unknown --preset \"{}\"; choose one of: {}",
                self.preset,
                tagphase::preset_names().join(", ")
            )
        })?;

        let mut builder = PhasePipelineBuilder::from_preset(preset)
            .with_context(|| format!("preset \"{}\" is invalid", preset.name))?;
        if let Some(sensor) = &self.sensor {
            builder.with_sensor_epc(sensor.clone());
        }
        if let Some(reference) = &self.reference {
            builder.with_reference_epc(reference.clone());
        }
        if builder.sensor_epc() == builder.reference_epc() {
            return Err(anyhow!(
                "the sensor and reference tags must differ (both are {})",
                builder.sensor_epc()
            ));
        }

        builder
            .with_antenna(self.antenna)
            .with_signal_source(self.source)
            .with_stability_window(self.window as usize)
            .with_dispersion_threshold(self.max_dispersion)
            .with_dtw_radius(self.dtw_radius as usize);

        if self.full_history {
            builder.without_history_window();
        } else if let Some(secs) = self.history_secs {
            builder.with_history_window_secs(secs as usize);
        }

        Ok(builder)
    }
}

/// A program-level error with exit code
///
/// Help and version requests are clap "errors" which exit
/// zero. Everything else exits one.
#[derive(Debug)]
pub struct CliError {
    error: anyhow::Error,
    exit_code: i32,
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Print this error to the terminal and exit
    ///
    /// clap errors, including help text, are printed as clap
    /// renders them. Other errors go through clap's formatter
    /// with their context chain on one line.
    pub fn exit(&self) -> ! {
        let printed = match self.error.downcast_ref::<clap::Error>() {
            Some(e) => e.print(),
            None => Args::command()
                .error(ErrorKind::Format, self.to_string())
                .print(),
        };
        drop(printed);
        std::process::exit(self.exit_code());
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> CliError {
        CliError {
            error,
            exit_code: 1,
        }
    }
}

impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> CliError {
        CliError {
            exit_code: if err.use_stderr() { 1 } else { 0 },
            error: err.into(),
        }
    }
}
