use pettools::{de, pat, ser, CLKS_PER_TT, CLKS_PER_TT_LEGACY};

use anyhow::{bail, Result};
use std::io::{stdout, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

#[derive(Debug, argh::FromArgs, Clone)]
/// Find coincidences between modules in a PET/MRI data file and print
/// them as tab-separated values: x, y, e1, e2 and block of the event with
/// the lower block id, the same for the other event, then the time
/// difference in clock periods.
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// data file path
    #[argh(positional)]
    pub data: Option<String>,
    /// coincidence window in clock periods
    #[argh(option, short = 'w', default = "100")]
    pub window: u64,
    /// skip data before the first reset (zero) time tag
    #[argh(switch, short = 'r')]
    pub seek_reset: bool,
    /// clock periods per time tag
    #[argh(option)]
    pub clks_per_tt: Option<u64>,
    /// use the clock periods per time tag of older firmware
    #[argh(switch)]
    pub legacy_clock: bool,
}

fn main() -> Result<()> {
    let config: CliArgs = argh::from_env();
    if config.version {
        let stdout = stdout();
        let mut stdout = stdout.lock();
        writeln!(stdout, concat!(env!("CARGO_BIN_NAME"), " {}"), GIT_VERSION)?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let file = match config.data {
        Some(f) => f,
        None => bail!("no data file given"),
    };
    let opts = de::Options {
        seek: if config.seek_reset { Some(0) } else { None },
        clks_per_tt: match (config.clks_per_tt, config.legacy_clock) {
            (Some(0), _) => bail!("clks-per-tt must be positive"),
            (Some(n), _) => n,
            (None, true) => CLKS_PER_TT_LEGACY,
            (None, false) => CLKS_PER_TT,
        },
        ..Default::default()
    };

    let mut events = de::events(de::open(&file)?, &opts)?;
    let coins = pat::sorted_coincidences(&mut events, config.window);
    info!(
        events = events.len(),
        window = config.window,
        "found {} coincidences",
        coins.len()
    );

    let stdout = stdout();
    let stdout = stdout.lock();
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_writer(stdout);
    ser::coincidences_tsv(&mut wtr, &coins)?;
    wtr.flush()?;
    Ok(())
}
