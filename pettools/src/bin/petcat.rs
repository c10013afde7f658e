use argh::FromArgs;
use anyhow::{bail, Result};
use either::{Left, Right};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{stdin, stdout, BufReader, Read, Write};
use std::path::Path;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pettools::{bit, de, ser, Event, Record, Single, CLKS_PER_TT, CLKS_PER_TT_LEGACY};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

/// Singles written per batch
const BATCH: usize = 1 << 16;

#[derive(Debug, FromArgs, Clone)]
/// Decode PET/MRI front-end data in raw (or .zst compressed) binary format
/// and print tab-separated singles to standard output, one per line as
/// block, absolute time and energies A through H. petcat is named in
/// analogy to programs like zcat(1) that output the decoded content of
/// file(s).
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// skip data before the first reset (zero) time tag
    #[argh(switch, short = 'r')]
    pub seek_reset: bool,
    /// print events (e1, e2, x, y, block, absolute time) instead of singles
    #[argh(switch, short = 'e')]
    pub events: bool,
    /// clock periods per time tag
    #[argh(option)]
    pub clks_per_tt: Option<u64>,
    /// use the clock periods per time tag of older firmware
    #[argh(switch)]
    pub legacy_clock: bool,
    /// only print singles from this module (may be repeated)
    #[argh(option, short = 'm')]
    pub module: Vec<u8>,
    /// with no input or when input is '-', read from standard input
    #[argh(positional)]
    pub input: Vec<String>,
}

fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();
    if args.version {
        let stdout = stdout();
        let mut stdout = stdout.lock();
        writeln!(
            stdout,
            concat!(
                env!("CARGO_BIN_NAME"),
                " ",
                "{}",
            ),
            GIT_VERSION,
        )?;
        return Ok(())
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(&m) = args.module.iter().find(|&&m| m as usize >= pettools::NMODULES) {
        bail!("no module {}", m);
    }
    let opts = de::Options {
        seek: if args.seek_reset { Some(0) } else { None },
        clks_per_tt: match (args.clks_per_tt, args.legacy_clock) {
            (Some(0), _) => bail!("clks-per-tt must be positive"),
            (Some(n), _) => n,
            (None, true) => CLKS_PER_TT_LEGACY,
            (None, false) => CLKS_PER_TT,
        },
        modules: match args.module.is_empty() {
            true => u16::MAX,
            false => bit::modules_to_mask(&args.module),
        },
    };

    // Collect inputs
    let mut inputs = Vec::new();
    if args.input.is_empty() {
        inputs.push(Left(()));
    } else {
        let mut contains_stdin = false;
        for i in args.input {
            if i == "-" {
                if contains_stdin {
                    bail!("cannot specify '-' for stdin twice");
                }
                contains_stdin = true;
                inputs.push(Left(()));
            } else {
                match fs::metadata(&i) {
                    Ok(m) if m.is_file() => inputs.push(Right(i)),
                    Ok(_) => bail!("{} is not a file", &i),
                    Err(e) => bail!("{}: {}", &i, e),
                }
            }
        }
    }

    let stdout = stdout();
    let stdout = stdout.lock();
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_writer(stdout);

    for i in inputs {
        match i {
            Left(()) => {
                let rdr = BufReader::new(stdin());
                cat(rdr, &opts, args.events, &mut wtr)?;
            },
            Right(path) => {
                let path = Path::new(&path);
                let f = File::open(path)?;
                let len = f.metadata()?.len();
                if path.extension().map_or(true, |e| e != "zst") {
                    de::check_length(len);
                }
                let pb = ProgressBar::new(len);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{bar:40} {bytes}/{total_bytes} {msg}")
                );
                let rdr = de::wrap(path, pb.wrap_read(f))?;
                cat(rdr, &opts, args.events, &mut wtr)?;
                pb.finish_and_clear();
            },
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Decode one input and write it out in batches
fn cat(
    src: impl Read,
    opts: &de::Options,
    events: bool,
    wtr: &mut csv::Writer<impl Write>,
) -> Result<()> {
    let mut rdr = opts.reader(src)?;
    let mut batch: Vec<Single> = Vec::with_capacity(BATCH);
    for rec in &mut rdr {
        if let Record::Single(s) = rec? {
            batch.push(s);
        }
        if batch.len() == BATCH {
            write_batch(wtr, &batch, events)?;
            batch.clear();
        }
    }
    write_batch(wtr, &batch, events)?;

    let scanner = rdr.scanner();
    if scanner.resyncs() > 0 {
        warn!(
            resyncs = scanner.resyncs(),
            dropped = scanner.dropped(),
            "stream lost alignment"
        );
    }
    if !scanner.pending().is_empty() {
        warn!("{} trailing bytes do not form a record", scanner.pending().len());
    }
    Ok(())
}

fn write_batch(wtr: &mut csv::Writer<impl Write>, singles: &[Single], events: bool) -> Result<()> {
    if events {
        let evs = singles.iter().map(Event::from).collect::<Vec<_>>();
        ser::events_tsv(wtr, &evs)
    } else {
        ser::singles_tsv(wtr, singles)
    }
}
