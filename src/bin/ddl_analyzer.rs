//! DDL track signal analyzer.
//!
//! Reads a pulse capture (one `start_ms duration_us` record per line, `#`
//! starts a comment) and prints one line per decoded Motorola, DCC or MFX
//! frame.
//!
//! ```bash
//! ddl-analyzer capture.txt
//! ddl-analyzer --json capture.txt | jq .
//! cat capture.txt | RUST_LOG=debug ddl-analyzer
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rs_ddl::config::BusConfig;
use rs_ddl::decoder::{DecodeEvent, Pulse};
use rs_ddl::services::{DecodeRunner, SharedBus};
use rs_ddl::traits::PulseSource;

/// Decode a model railway track signal capture
#[derive(Parser, Debug)]
#[command(name = "ddl-analyzer")]
#[command(about = "Decode Motorola/DCC/MFX pulse captures", long_about = None)]
#[command(version)]
struct Args {
    /// Pulse capture file (default: stdin)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Hide repeated Motorola frames
    #[arg(long)]
    hide_repeats: bool,

    /// Offset added to decoded DCC accessory addresses
    #[arg(long, value_name = "N", default_value_t = 1)]
    accessory_offset: u16,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output except errors
    #[arg(short, long)]
    quiet: bool,
}

/// Pulse records read line by line from a capture.
struct CaptureReader<R> {
    reader: R,
    line: String,
    line_no: usize,
}

impl<R: BufRead> CaptureReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> PulseSource for CaptureReader<R> {
    type Error = io::Error;

    fn next_pulse(&mut self) -> Result<Option<Pulse>, io::Error> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            match parse_record(&self.line) {
                Ok(Some(pulse)) => return Ok(Some(pulse)),
                Ok(None) => {}
                Err(err) => log::warn!("line {}: {:#}", self.line_no, err),
            }
        }
    }
}

/// Parses one capture line; blank lines and comments yield `None`.
fn parse_record(line: &str) -> Result<Option<Pulse>> {
    let content = line.split('#').next().unwrap_or("").trim();
    if content.is_empty() {
        return Ok(None);
    }
    let mut fields = content.split_whitespace();
    let mut next = |name: &str| -> Result<i64> {
        let field = fields
            .next()
            .with_context(|| format!("missing {}", name))?;
        field
            .parse()
            .with_context(|| format!("invalid {} {:?}", name, field))
    };
    let start_ms = next("start time")?;
    let duration_us = next("duration")?;
    Ok(Some(Pulse::new(start_ms, duration_us)?))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    log::info!("ddl-analyzer v{}", env!("CARGO_PKG_VERSION"));

    let input: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {:?}", path))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let config = BusConfig::default().with_nmra_ga_offset(args.accessory_offset);
    let bus = Arc::new(SharedBus::new(0, config));
    let mut runner =
        DecodeRunner::new(Arc::clone(&bus), CaptureReader::new(input)).with_store_packets(false);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut result = Ok(());
    let stats = runner
        .run(|event| {
            if result.is_err() || (args.hide_repeats && is_repeat(event)) {
                return;
            }
            result = print_event(&mut out, event, args.json);
        })
        .context("reading capture")?;
    result?;

    log::info!(
        "{} pulses, {} events",
        stats.pulses,
        stats.events
    );
    Ok(())
}

fn is_repeat(event: &DecodeEvent) -> bool {
    matches!(event, DecodeEvent::Motorola(frame) if frame.repeat)
}

fn print_event(out: &mut impl Write, event: &DecodeEvent, json: bool) -> Result<()> {
    if json {
        serde_json::to_writer(&mut *out, event)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", event)?;
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args()))
        .init();
}
