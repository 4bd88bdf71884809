use std::io;

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{info, LevelFilter};

mod app;
mod cli;

use cli::{Args, CliError};

fn main() {
    match tagphased() {
        Ok(()) => {}
        Err(cli_error) => cli_error.exit(),
    }
}

fn tagphased() -> Result<(), CliError> {
    // Parse options and start logging
    let args = Args::try_parse()?;
    log_setup(&args);

    if args.list_presets {
        for name in tagphase::preset_names() {
            if let Some(preset) = tagphase::preset(name) {
                println!("{}", preset);
            }
        }
        return Ok(());
    }

    // create the pipeline
    let builder = args.pipeline_builder()?;
    info!(
        "sensor {} against reference {} on antenna {}, {}",
        builder.sensor_epc(),
        builder.reference_epc(),
        builder.antenna(),
        builder.signal_source().describe()
    );
    let mut pipeline = builder.build();

    // the export directory must exist before we spend a session on it
    if let Some(dir) = &args.export_dir {
        if !dir.is_dir() {
            return Err(anyhow!("--export-dir \"{}\" is not a directory", dir.display()).into());
        }
    }

    // file setup: locks stdin in case we need it
    let stdin = io::stdin();
    let stdin_handle = stdin.lock();
    let input = file_setup(&args, stdin_handle)?;

    // processing: one reporting cycle per batch
    app::run(&args, &mut pipeline, input);

    if let Some(dir) = &args.export_dir {
        app::export_session(&pipeline, dir)?;
    }

    Ok(())
}

fn log_setup(args: &Args) {
    if args.quiet {
        // no logging
        return;
    } else if std::env::var_os("RUST_LOG").is_none() {
        // parameter controls
        let log_filter = match args.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        pretty_env_logger::formatted_builder()
            .filter_module("tagphase", log_filter)
            .filter_module("tagphased", log_filter)
            .init();
    } else {
        // environment controls
        pretty_env_logger::init();
    }
}

fn file_setup<'stdin>(
    args: &Args,
    stdin: std::io::StdinLock<'stdin>,
) -> Result<Box<dyn io::BufRead + 'stdin>, anyhow::Error> {
    if args.input_is_stdin() {
        info!("reading tag reports from standard input");
        if !is_terminal(&std::io::stdin()) {
            Ok(Box::new(io::BufReader::new(stdin)))
        } else {
            Err(anyhow!(
                "cowardly refusing to read tag reports from a terminal.

Pipe JSON lines of report batches from a reader client or a
recorded session into this program, or use --file."
            ))
        }
    } else {
        info!("reading tag reports from file: \"{}\"", &args.file);
        Ok(Box::new(io::BufReader::new(
            std::fs::File::open(&args.file)
                .with_context(|| format!("Unable to open --file \"{}\"", args.file))?,
        )))
    }
}

#[cfg(not(target_os = "windows"))]
fn is_terminal<S>(stream: &S) -> bool
where
    S: std::os::fd::AsRawFd,
{
    terminal_size::terminal_size_using_fd(stream.as_raw_fd()).is_some()
}

#[cfg(target_os = "windows")]
fn is_terminal<S>(stream: &S) -> bool
where
    S: std::os::windows::io::AsRawHandle,
{
    terminal_size::terminal_size_using_handle(stream.as_raw_handle()).is_some()
}
