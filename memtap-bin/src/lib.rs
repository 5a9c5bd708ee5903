//! # memtap
//!
//! Command line front end of memtap. It attaches to a process, searches its
//! address space for the recorder's write buffer and streams every snapshot of
//! that buffer as JSON lines.
//!
//! ## Quickstart guide
//!
//! ```sh
//! # Build the crate
//! cargo build --release
//! # Dry run against a generated process image
//! target/release/memtap --synthetic
//! # Attach to a running recorder and write frames to a file
//! target/release/memtap --name recorder --output frames.jsonl --report report.json
//!```
//!
//! Press Enter to end a session early. Use `target/release/memtap --help` to see
//! available options.
//!
//! ## External Crates
//!
//! - `log`: Used for logging throughout the crate.
//! - `indicatif`: Progress bars for the discovery and session deadlines.

#[macro_use]
extern crate log;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use memtap_core::MemtapConfig;
use memtap_jsonl::JsonlSink;
use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::sync::mpsc;
use std::thread;

/// Sink type used by the binary, writing either to a file or to stdout.
pub type OutputSink = JsonlSink<Box<dyn Write + Send>>;

pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

/// Opens the frame sink: the file at `output`, or stdout if `None`.
pub fn open_sink(output: Option<&str>) -> anyhow::Result<OutputSink> {
    let writer: Box<dyn Write + Send> = match output {
        Some(path) => {
            info!("Writing frames to {}", path);
            Box::new(BufWriter::new(File::create(path)?))
        }
        None => Box::new(io::stdout()),
    };
    Ok(JsonlSink::new(writer))
}

/// A session config as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// The parsed configuration, defaults filled in
    pub config: MemtapConfig,
    /// Whether the file chose its own `free_region_threshold`
    pub sets_free_region_threshold: bool,
}

impl CliConfig {
    /// Parses a JSON config file's contents.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config = MemtapConfig::from_json(json)?;
        let raw: serde_json::Value = serde_json::from_str(json)?;
        Ok(CliConfig {
            config,
            sets_free_region_threshold: raw.get("free_region_threshold").is_some(),
        })
    }
}

/// Loads the config file at `path`, or the defaults if `None`.
pub fn load_config(path: Option<&str>) -> anyhow::Result<CliConfig> {
    match path {
        Some(path) => {
            info!("Loading config from {}", path);
            CliConfig::from_json(&fs::read_to_string(path)?)
        }
        None => Ok(CliConfig {
            config: MemtapConfig::default(),
            sets_free_region_threshold: false,
        }),
    }
}

/// Watches `input` for a line on a background thread.
///
/// The returned channel receives one message once a line was read. At end of
/// input nothing is sent and the channel disconnects.
pub fn watch_for_enter<R: BufRead + Send + 'static>(mut input: R) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        if matches!(input.read_line(&mut line), Ok(n) if n > 0) {
            let _ = tx.send(());
        }
    });
    rx
}
