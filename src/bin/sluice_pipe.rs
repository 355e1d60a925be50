//! sluice-pipe: copy lines through both bridges.
//!
//! Lines are read by a blocking producer on the blocking pool, delivered
//! asynchronously, and written to stdout by a blocking iterator.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};

use sluice::{
    BlockingProducer, BlockingSource, BridgeContext, Config, Deadline, to_blocking,
};

/// Copy lines from a file (or stdin) to stdout through sluice bridges.
#[derive(Parser)]
#[command(name = "sluice-pipe")]
#[command(version)]
#[command(about = "Copy lines through an async/blocking bridge round trip")]
struct Args {
    /// Input file (default: stdin).
    input: Option<PathBuf>,

    /// Path to configuration file.
    #[arg(short, long, env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    /// Buffer capacity, overriding the configuration.
    #[arg(long)]
    capacity: Option<usize>,

    /// Stop copying after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

/// Blocking producer yielding one line per pull.
struct LineProducer {
    reader: Box<dyn BufRead + Send>,
}

impl BlockingProducer<String> for LineProducer {
    fn pull(&mut self) -> sluice::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn close(&mut self) -> sluice::Result<()> {
        debug!("input closed");
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::load_or_default(args.config.as_deref())?;
    if let Some(capacity) = args.capacity {
        config.buffer.capacity = capacity;
    }
    let bridge = BridgeContext::from_config(&config)?;

    let reader: Box<dyn BufRead + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let source = BlockingSource::new(LineProducer { reader }, &bridge);
    let lines = to_blocking(&source, bridge.capacity())?;

    let _deadline = args.timeout_ms.map(|ms| {
        Deadline::cancel_after(
            lines.cancel_handle(),
            Duration::from_millis(ms),
            bridge.executor(),
        )
    });

    info!(capacity = bridge.capacity(), "copying");
    let mut out = io::stdout().lock();
    let mut copied = 0usize;
    for line in lines {
        out.write_all(line?.as_bytes())?;
        copied += 1;
    }
    out.flush()?;
    info!(copied, "done");
    Ok(())
}
