use anyhow::{bail, Result};
use argh::FromArgs;
use std::path::PathBuf;

use pettools::cfg::{Run, RunLimit, SaveRaw};

#[derive(Debug, FromArgs, Clone)]
/// Acquire singles from PET/MRI front-end boards over TCP, then write a
/// JSON record of the run next to the run declaration.
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// tick period in ms
    #[argh(option, default = "250")]
    pub tick_rate: u64,
    /// run declaration file path
    #[argh(option)]
    pub config: Option<String>,
    /// data port for sources that do not name one
    #[argh(option)]
    pub port: Option<u16>,
    /// run length, e.g. "10s" or "2min 30s"
    #[argh(option)]
    pub duration: Option<String>,
    /// skip data before the first reset (zero) time tag
    #[argh(switch, short = 'r')]
    pub seek_reset: bool,
    /// save the raw stream of every source to the working directory
    #[argh(switch)]
    pub save: bool,
    /// save the raw stream of every source to this directory
    #[argh(option)]
    pub save_dir: Option<String>,
    /// compress saved streams with zstd
    #[argh(switch)]
    pub compress: bool,
    /// front-end addresses, as host, host:port, ip or ip:port
    #[argh(positional)]
    pub sources: Vec<String>,
}

impl CliArgs {
    /// Override the run declaration with whatever was given on the
    /// command line
    pub fn apply(&self, run: &mut Run) -> Result<()> {
        if !self.sources.is_empty() {
            run.sources = self.sources.clone();
        }
        if let Some(port) = self.port {
            run.port = port;
        }
        if let Some(d) = &self.duration {
            run.limit = Some(RunLimit::Duration(humantime::parse_duration(d)?));
        }
        if self.seek_reset {
            run.seek_reset = Some(0);
        }
        run.save_raw = match (&self.save_dir, self.save, self.compress) {
            (Some(dir), _, false) => Some(SaveRaw::RawDir(PathBuf::from(dir))),
            (Some(dir), _, true) => Some(SaveRaw::CompressedDir(PathBuf::from(dir))),
            (None, true, false) => Some(SaveRaw::Save(true)),
            (None, true, true) => Some(SaveRaw::CompressedDir(std::env::current_dir()?)),
            (None, false, true) => bail!("--compress needs --save or --save-dir"),
            (None, false, false) => run.save_raw.take(),
        };
        Ok(())
    }
}

pub mod client;
pub mod processor;
pub mod queue;
pub mod save;
pub mod session;
