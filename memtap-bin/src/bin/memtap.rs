use std::{
    fs::File,
    io::{self, BufWriter, Write},
    thread,
    time::Duration,
};

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::MultiProgress;
use log::{info, warn};
use memtap_bin::{
    CliConfig, OutputSink, init_logging_with_progress, load_config, open_sink, watch_for_enter,
};
use memtap_core::util::spawn_cancelable;
use memtap_core::{AcquisitionOutcome, ForeignProcess, Memtap, MemtapConfig, SessionReport};
use serde::Serialize;

/// CLI arguments for the `memtap` binary.
///
/// Exactly one target must be given: `--pid`, `--name` or `--synthetic`.
#[derive(Debug, Parser, Serialize, Clone)]
struct CliArgs {
    /// Attach to the process with this pid.
    #[clap(long = "pid")]
    pid: Option<u32>,
    /// Attach to the first process with this executable name.
    #[clap(long = "name")]
    name: Option<String>,
    /// Run against a generated in-memory process image instead of a live process.
    #[clap(long = "synthetic")]
    synthetic: bool,
    /// Seed of the generated image (with `--synthetic`).
    #[clap(long = "seed", default_value = "0")]
    seed: u64,
    /// The memtap config file (JSON). Defaults apply if omitted.
    #[clap(long = "config")]
    config: Option<String>,
    /// Output file for sample frames (JSON lines). Frames go to stdout if omitted.
    #[clap(long = "output")]
    output: Option<String>,
    /// Output file for the session report (JSON format).
    #[clap(long = "report")]
    report: Option<String>,
}

fn run_session<P>(
    process: P,
    sink: OutputSink,
    config: MemtapConfig,
    progress: MultiProgress,
) -> Result<SessionReport>
where
    P: ForeignProcess + Send + 'static,
    P::Error: Send + Sync + 'static,
{
    let mut memtap = Memtap::builder()
        .process(process)
        .sink(sink)
        .config(config)
        .progress(progress)
        .build()?;
    let session = spawn_cancelable("memtap-session", move |running| memtap.run(&running))?;

    let rx = watch_for_enter(io::BufReader::new(io::stdin()));
    info!("Press Enter to stop the session");

    while !session.is_finished() {
        if session.is_running() && rx.try_recv().is_ok() {
            info!("Stopping session");
            session.cancel();
        }
        thread::sleep(Duration::from_millis(50));
    }
    match session.join() {
        Ok(result) => Ok(result?),
        Err(_) => bail!("Session thread panicked"),
    }
}

#[cfg(target_os = "linux")]
fn attach(
    args: &CliArgs,
    sink: OutputSink,
    config: CliConfig,
    progress: MultiProgress,
) -> Result<SessionReport> {
    use memtap_procfs::ProcfsProcess;
    let process = match (args.pid, &args.name) {
        (Some(pid), _) => ProcfsProcess::attach(pid as i32)?,
        (None, Some(name)) => ProcfsProcess::attach_by_name(name)?,
        (None, None) => bail!("One of --pid, --name or --synthetic is required"),
    };
    let config = if config.sets_free_region_threshold {
        config.config
    } else {
        ProcfsProcess::adapt_config(config.config)
    };
    run_session(process, sink, config, progress)
}

#[cfg(windows)]
fn attach(
    args: &CliArgs,
    sink: OutputSink,
    config: CliConfig,
    progress: MultiProgress,
) -> Result<SessionReport> {
    use memtap_win32::Win32Process;
    let process = match (args.pid, &args.name) {
        (Some(pid), _) => Win32Process::attach(pid)?,
        (None, Some(name)) => Win32Process::attach_by_name(name)?,
        (None, None) => bail!("One of --pid, --name or --synthetic is required"),
    };
    run_session(process, sink, config.config, progress)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn attach(
    _args: &CliArgs,
    _sink: OutputSink,
    _config: CliConfig,
    _progress: MultiProgress,
) -> Result<SessionReport> {
    bail!("Attaching to live processes is not supported on this platform, use --synthetic")
}

fn save_report(report: &SessionReport, filename: &str) -> Result<()> {
    let file = File::create(filename)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush()?;
    info!("Report saved to {}", filename);
    Ok(())
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;

    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);

    let config = load_config(args.config.as_deref())?;
    let sink = open_sink(args.output.as_deref())?;

    let report = if args.synthetic {
        if args.pid.is_some() || args.name.is_some() {
            warn!("--synthetic given, ignoring --pid/--name");
        }
        let process = memtap_synthetic::demo_process(args.seed)?;
        run_session(process, sink, config.config, progress)?
    } else {
        attach(&args, sink, config, progress)?
    };

    if let Some(report_file) = &args.report {
        save_report(&report, report_file)?;
    }

    info!("=== SESSION SUMMARY ===");
    info!("Buffer: {:?}", report.location);
    info!(
        "Discovery: {} sweep(s), {} region(s) scanned in {}ms",
        report.discovery.sweeps, report.discovery.regions_scanned, report.discovery.elapsed_ms
    );
    info!(
        "Acquisition: {} frame(s), {} failed read(s), {} sink failure(s) in {}ms",
        report.acquisition.frames_sent,
        report.acquisition.failed_reads,
        report.acquisition.sink_failures,
        report.acquisition.elapsed_ms
    );
    match report.acquisition.outcome {
        AcquisitionOutcome::SessionTimeout => info!("Session ended at its time limit"),
        AcquisitionOutcome::Cancelled => info!("Session cancelled"),
    }
    Ok(())
}
