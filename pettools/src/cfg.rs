//! Configuration tools: formats for declaring and recording acquisition runs

use chrono::{offset::Local, DateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::bit;
use crate::de;
use crate::error::{Error, Result};
use crate::{CLKS_PER_TT, DATA_PORT, NMODULES};

/// Acquisition run specification for both declaring and recording runs in
/// text files. We use JSON as the text file format.
///
/// ## Declaring a run
///
/// Every field has a default, so specify only what makes sense. A minimal
/// declaration names the front-end boards to read from in `sources` and
/// sets a `limit`, either a duration parsed as in
/// [humantime](https://docs.rs/humantime/) (`"10s"`, `"2min 30s"`) or a
/// number of singles in one module. Listing modules in `singles` restricts
/// decoding to those modules; leaving it empty decodes all of them.
///
/// ## Recording a run
///
/// A run is recorded in the same format as the declaration. `singles` is
/// mapped from `Singles::Module(m)` to `Singles::ModuleCounts((m, counts))`
/// for every module that was seen, the run start goes in `timestamp`, the
/// run length in milliseconds in `duration`, and one entry per source is
/// added to `sessions`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Run {
    #[serde(default)]
    pub name:           String,
    pub timestamp:      Option<DateTime<Local>>,
    pub limit:          Option<RunLimit>,
    /// Front-end boards, as `host`, `host:port`, `ip` or `ip:port`
    #[serde(default = "emptyvec", skip_serializing_if = "Vec::is_empty")]
    pub sources:        Vec<String>,
    /// Port for sources that do not name one
    #[serde(default = "default_port")]
    pub port:           u16,
    /// Clock periods per time tag, see [`crate::CLKS_PER_TT`]
    pub clks_per_tt:    Option<u64>,
    /// Skip data before the first time tag with this value (usually 0)
    pub seek_reset:     Option<u64>,
    #[serde(default)]
    pub stream:         StreamSettings,
    pub save_raw:       Option<SaveRaw>,
    pub duration:       Option<u64>,
    #[serde(default = "emptyvec", skip_serializing_if = "Vec::is_empty")]
    pub singles:        Vec<Singles>,
    #[serde(default = "emptyvec", skip_serializing_if = "Vec::is_empty")]
    pub sessions:       Vec<SessionRecord>,
}

/// Either a fixed time duration or a limit on the singles in one module.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub enum RunLimit {
    #[serde(with = "humantime_serde")]
    Duration(Duration),
    SinglesLimit(u8, u64),
}

/// Save the raw byte stream of every source, either to the working
/// directory or to a given directory.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub enum SaveRaw {
    Save(bool),
    RawDir(PathBuf),
    /// As `RawDir`, but zstd-compressed
    CompressedDir(PathBuf),
}

/// Specify a module, or specify a module with some number of counts
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub enum Singles {
    Module(u8),
    ModuleCounts((u8, u64)),
}

/// Socket and queue sizing for live acquisition
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
#[serde(default)]
pub struct StreamSettings {
    /// Bytes handed from the network thread to the decoder at a time
    pub chunk_size:         usize,
    /// Chunks that may wait in the queue before the network thread blocks
    pub queue_depth:        usize,
    /// How long a receive may wait; also bounds how quickly a session
    /// notices it has been stopped
    #[serde(with = "humantime_serde")]
    pub recv_timeout:       Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout:    Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            chunk_size:         4096,
            queue_depth:        64,
            recv_timeout:       Duration::from_secs(1),
            connect_timeout:    Duration::from_secs(5),
        }
    }
}

/// What happened to one source during a run
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SessionRecord {
    pub source:     String,
    pub bytes:      u64,
    pub records:    u64,
    pub time_tags:  u64,
    pub resyncs:    u64,
    pub dropped:    u64,
    pub reset_found: Option<bool>,
    /// Raw data file, if the stream was saved
    pub saved:      Option<PathBuf>,
    pub error:      Option<String>,
}

/// A validated network source
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Source {
    pub host: String,
    pub port: u16,
}

impl Source {
    /// Parse `host`, `host:port`, an IP address, or an IP socket address.
    /// Nothing is resolved here, only the syntax is checked.
    pub fn parse(s: &str, default_port: u16) -> Result<Source> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<SocketAddr>() {
            if addr.port() == 0 {
                return Err(Error::Address(s.to_string()));
            }
            return Ok(Source { host: addr.ip().to_string(), port: addr.port() });
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Source { host: ip.to_string(), port: default_port });
        }
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| Error::Address(s.to_string()))?;
                (host, port)
            }
            None => (s, default_port),
        };
        let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '.';
        if host.is_empty() || !host.chars().all(valid) || port == 0 {
            return Err(Error::Address(s.to_string()));
        }
        Ok(Source { host: host.to_string(), port })
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn emptyvec<T>() -> Vec<T> {
    Vec::new()
}

fn default_port() -> u16 {
    DATA_PORT
}

/// Creates an empty Run. Specific defaults should be implementation-dependent.
impl Default for Run {
    fn default() -> Self {
        Run {
            name:           String::new(),
            timestamp:      None,
            limit:          None,
            sources:        Vec::new(),
            port:           DATA_PORT,
            clks_per_tt:    None,
            seek_reset:     None,
            stream:         StreamSettings::default(),
            save_raw:       None,
            duration:       None,
            singles:        Vec::new(),
            sessions:       Vec::new(),
        }
    }
}

impl Run {
    pub fn from_reader(rdr: impl Read) -> Result<Run> {
        Ok(serde_json::from_reader(rdr)?)
    }

    pub fn to_writer(&self, wtr: impl Write) -> Result<()> {
        Ok(serde_json::to_writer_pretty(wtr, self)?)
    }

    /// Check everything that can be checked without touching the network,
    /// returning the parsed sources
    pub fn validate(&self) -> Result<Vec<Source>> {
        if self.stream.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.stream.queue_depth == 0 {
            return Err(Error::Config("queue_depth must be positive".into()));
        }
        if self.stream.recv_timeout.is_zero() || self.stream.connect_timeout.is_zero() {
            return Err(Error::Config("socket timeouts must be positive".into()));
        }
        if self.clks_per_tt == Some(0) {
            return Err(Error::Config("clks_per_tt must be positive".into()));
        }
        for s in &self.singles {
            let m = match s {
                Singles::Module(m) | Singles::ModuleCounts((m, _)) => *m,
            };
            if m as usize >= NMODULES {
                return Err(Error::Config(format!("no module {}", m)));
            }
        }
        if let Some(RunLimit::SinglesLimit(m, _)) = self.limit {
            if m as usize >= NMODULES {
                return Err(Error::Config(format!("no module {}", m)));
            }
        }
        self.sources
            .iter()
            .map(|s| Source::parse(s, self.port))
            .collect()
    }

    pub fn clks_per_tt(&self) -> u64 {
        self.clks_per_tt.unwrap_or(CLKS_PER_TT)
    }

    /// Bitmask of the modules to decode; all of them if none are listed
    pub fn modules_mask(&self) -> u16 {
        let mods = self
            .singles
            .iter()
            .map(|s| match s {
                Singles::Module(m) | Singles::ModuleCounts((m, _)) => *m,
            })
            .collect::<Vec<_>>();
        match mods.is_empty() {
            true => u16::MAX,
            false => bit::modules_to_mask(&mods),
        }
    }

    pub fn decode_options(&self) -> de::Options {
        de::Options {
            seek: self.seek_reset,
            clks_per_tt: self.clks_per_tt(),
            modules: self.modules_mask(),
        }
    }
}
