use anyhow::{bail, Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use petacq::session::Acquisition;
use petacq::CliArgs;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use pettools::{bit, cfg, NMODULES};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

fn main() -> Result<()> {
    // Parse command line arguments
    let args: CliArgs = argh::from_env();

    if args.version {
        println!(
            concat!(
                env!("CARGO_BIN_NAME"),
                " ",
                "{}",
            ),
            GIT_VERSION,
        );
        return Ok(())
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load the run file
    let (cfg_path, mut config) = match &args.config {
        Some(c) => {
            let cfg_path = PathBuf::from(c);
            let f = File::open(&cfg_path).with_context(|| format!("cannot open {}", c))?;
            (cfg_path, cfg::Run::from_reader(BufReader::new(f))?)
        }
        None => (PathBuf::from("data"), cfg::Run::default()),
    };
    args.apply(&mut config)?;
    if config.sources.is_empty() {
        bail!("no sources given");
    }

    // Get tick rate
    let tick_rate = Duration::from_millis(args.tick_rate);

    let stop = Arc::new(AtomicBool::new(false));
    let acq = Acquisition::start(&config, stop.clone())?;
    let timestamp = acq.start;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {elapsed_precise} {msg}"));

    let first_tick = Instant::now();
    let mut last_tick = first_tick;
    loop {
        let singles = acq.singles();
        let total: u64 = singles.iter().sum();
        let bytes: u64 = acq.counts().iter().map(|c| c.bytes).sum();
        pb.set_message(format!("{} singles, {} bytes", total, bytes));
        pb.tick();

        // Check if limit condition met and break
        match config.limit {
            Some(cfg::RunLimit::Duration(d)) => {
                if first_tick.elapsed() >= d {
                    break
                }
            },
            Some(cfg::RunLimit::SinglesLimit(m, limit)) => {
                if singles[m as usize] >= limit {
                    break
                }
            },
            None => {},
        }
        if acq.is_finished() {
            info!("every session has ended");
            break
        }

        // Sleep for the rest of tick rate
        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        std::thread::sleep(timeout);
        last_tick = Instant::now();
    }

    stop.store(true, Ordering::Relaxed);
    let duration = first_tick.elapsed();
    let reports = acq.join();
    pb.finish_and_clear();

    // Now record the run record to disk
    let mut totals = [0u64; NMODULES];
    for r in &reports {
        if let Some(s) = &r.summary {
            for (t, n) in totals.iter_mut().zip(s.counts.singles.iter()) {
                *t += n;
            }
        }
    }
    // With no modules declared, record every module that was seen
    let mask = match config.modules_mask() {
        u16::MAX => totals
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .fold(0u16, |m, (i, _)| m | 1 << i),
        m => m,
    };
    let record = cfg::Run {
        // name:            from declaration
        // limit:           from declaration
        timestamp:          Some(timestamp),
        duration:           Some(duration.as_millis() as u64),
        singles:            bit::mask_to_modules(mask)
            .into_iter()
            .map(|m| cfg::Singles::ModuleCounts((m, totals[m as usize])))
            .collect(),
        sessions:           reports.iter().map(|r| r.record()).collect(),
        ..config
    };
    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        warn!("{} of {} sessions ended with an error", failed, reports.len());
    }

    let ts = Local::now();
    let mut rcd_stem = cfg_path
        .as_path()
        .file_stem()
        .unwrap_or_else(|| std::ffi::OsStr::new("data"))
        .to_string_lossy()
        .to_string();
    rcd_stem.push('_');
    let rcd_path = cfg_path.with_file_name(
        format!("{}{}.json", rcd_stem, ts.format("%F_%H-%M-%S"))
    );
    let rcd_path2 = cfg_path.with_file_name(
        format!("{}{}.json", rcd_stem, ts.format("%F_%H-%M-%S%.3f"))
    );
    let (f, rcd_path) = match OpenOptions::new().write(true).create_new(true).open(&rcd_path) {
        Ok(f) => (f, rcd_path),
        Err(_) => {
            let f = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&rcd_path2)
                .context("saving more than one record per millisecond")?;
            (f, rcd_path2)
        }
    };
    let mut wtr = BufWriter::new(f);
    record.to_writer(&mut wtr)?;
    wtr.flush()?;
    info!("run record written to {}", rcd_path.display());

    Ok(())
}
