//! CLI Entry Point for lpm01a-daq
//!
//! Provides command-line interface for:
//! - Capturing current consumption from an LPM01A into a CSV file
//! - Analysing a capture (average current over the whole file or a time window)
//!
//! # Usage
//!
//! Capture until Ctrl+C:
//! ```bash
//! lpm01a-daq capture --port /dev/ttyACM0 --frequency-hz 5000
//! ```
//!
//! Analyse part of a capture:
//! ```bash
//! lpm01a-daq analyze capture.csv -s 3000000 -e 3700000
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use lpm01a_daq::adapters::SerialTransport;
use lpm01a_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use lpm01a_daq::core::TimeWindow;
use lpm01a_daq::data::analysis::{analyze_file, Progress, ReportSource};
use lpm01a_daq::data::storage::CsvSampleWriter;
use lpm01a_daq::hardware::{CaptureSummary, LoopExit, Lpm01a};
use lpm01a_daq::logging;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "lpm01a-daq")]
#[command(about = "Current consumption capture and analysis for the STM32 LPM01A", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream samples from the power monitor into a CSV file
    Capture {
        /// Serial port
        #[arg(long)]
        port: Option<String>,

        /// Baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// Supply voltage in mV
        #[arg(long)]
        voltage_mv: Option<u32>,

        /// Sampling frequency in Hz
        #[arg(long)]
        frequency_hz: Option<u32>,

        /// Acquisition time in seconds (0 = until Ctrl+C)
        #[arg(long)]
        duration_s: Option<u32>,

        /// Output CSV file (default: timestamped file in the configured output_dir)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Calculate the average current consumption of a capture
    Analyze {
        /// Capture file
        csv_file: PathBuf,

        /// Start timestamp in us
        #[arg(short = 's', long = "start")]
        start_us: Option<u64>,

        /// End timestamp in us
        #[arg(short = 'e', long = "end")]
        end_us: Option<u64>,

        /// Neither read nor write the cached whole-file result
        #[arg(long)]
        no_cache: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)?;
    if let Some(level) = cli.log_level {
        settings.application.log_level = level;
    }
    logging::init_from_settings(&settings)?;

    match cli.command {
        Commands::Capture {
            port,
            baud,
            voltage_mv,
            frequency_hz,
            duration_s,
            output,
        } => {
            if let Some(port) = port {
                settings.serial.port = port;
            }
            if let Some(baud) = baud {
                settings.serial.baud_rate = baud;
            }
            if let Some(voltage_mv) = voltage_mv {
                settings.capture.voltage_mv = voltage_mv;
            }
            if let Some(frequency_hz) = frequency_hz {
                settings.capture.frequency_hz = frequency_hz;
            }
            if let Some(duration_s) = duration_s {
                settings.capture.duration_s = duration_s;
            }
            settings.validate()?;
            run_capture(settings, output).await
        }
        Commands::Analyze {
            csv_file,
            start_us,
            end_us,
            no_cache,
            json,
        } => run_analysis(csv_file, start_us, end_us, no_cache, json),
    }
}

async fn run_capture(settings: Settings, output: Option<PathBuf>) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let session_cancel = Arc::clone(&cancel);
    let mut session =
        tokio::task::spawn_blocking(move || capture_session(&settings, output, &session_cancel));

    let (path, summary) = tokio::select! {
        joined = &mut session => joined??,
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("Interrupt received, stopping acquisition");
            cancel.store(true, Ordering::SeqCst);
            session.await??
        }
    };

    let reason = match summary.exit {
        LoopExit::Cancelled => "stopped by user",
        LoopExit::AcquisitionCompleted => "acquisition time elapsed",
    };
    println!(
        "Captured {} samples to '{}' ({}, {} malformed lines skipped)",
        summary.samples,
        path.display(),
        reason,
        summary.malformed
    );
    Ok(())
}

/// Blocking capture session on the configured serial port.
fn capture_session(
    settings: &Settings,
    output: Option<PathBuf>,
    cancel: &AtomicBool,
) -> Result<(PathBuf, CaptureSummary)> {
    let mut transport = SerialTransport::from_config(&settings.serial);
    transport.open()?;

    let sink = match output {
        Some(path) => CsvSampleWriter::create(path)?,
        None => CsvSampleWriter::in_dir(&settings.capture.output_dir)?,
    };
    let path = sink.path().to_path_buf();

    let mut meter = Lpm01a::new(transport, sink).with_ack_timeout(settings.serial.ack_timeout());
    let summary = meter.run_session(settings.capture.capture_config(), cancel)?;
    Ok((path, summary))
}

fn run_analysis(
    csv_file: PathBuf,
    start_us: Option<u64>,
    end_us: Option<u64>,
    no_cache: bool,
    json: bool,
) -> Result<()> {
    let window = TimeWindow::from_bounds(start_us, end_us)?;

    let mut show_progress = |p: Progress| {
        eprint!(
            "\rProgress: {:.2}%, ETA: {:.2}s",
            p.percent,
            p.eta.as_secs_f64()
        );
        if p.percent >= 100.0 {
            eprintln!();
        }
    };
    let progress: Option<&mut dyn FnMut(Progress)> = if json {
        None
    } else {
        Some(&mut show_progress)
    };

    let report = analyze_file(&csv_file, window, !no_cache, progress)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let ReportSource::Cache { generated } = &report.source {
        println!("Using cached result generated on {generated}");
    }
    println!(
        "Selected time window: {} s ({} ms)",
        report.window_s,
        report.window_ms()
    );
    println!(
        "Number of values in selected time window: {}",
        report.num_values
    );
    println!(
        "Average current consumption {} Ah ({} mAh)",
        report.charge_ah,
        report.charge_mah()
    );
    println!("Mean current: {:.3} uA", report.mean_current_ua());
    Ok(())
}
