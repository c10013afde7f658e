//! Decoding record streams: a lazy record reader, and batch helpers that
//! collect a whole stream into singles, events or columns

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::{info, warn};
use zstd::stream;

use crate::bit::BitOps;
use crate::error::Result;
use crate::frame::Scanner;
use crate::record::{Record, Single};
use crate::time::TimeState;
use crate::{Event, CLKS_PER_TT, NCH, RECORD_SIZE};

/// How to decode a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// Skip everything before the first time tag with this value
    pub seek: Option<u64>,
    pub clks_per_tt: u64,
    /// Modules whose records are passed on, as a bitmask
    pub modules: u16,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            seek: None,
            clks_per_tt: CLKS_PER_TT,
            modules: u16::MAX,
        }
    }
}

impl Options {
    /// Build a reader over `src`, seeking first if requested. If the seek
    /// target never shows up the reader is simply exhausted.
    pub fn reader<R: Read>(&self, src: R) -> io::Result<Reader<R>> {
        let times = TimeState::with_clks_per_tt(self.clks_per_tt);
        let mut rdr = Reader::with_time_state(src, times).modules(self.modules);
        if let Some(value) = self.seek {
            rdr.seek_time_tag(value)?;
        }
        Ok(rdr)
    }
}

/// Lazily decodes records from a byte stream, with singles timestamped
pub struct Reader<R> {
    src: R,
    scanner: Scanner,
    times: TimeState,
    modules: u16,
    records: u64,
}

impl<R: Read> Reader<R> {
    pub fn new(src: R) -> Self {
        Reader::with_time_state(src, TimeState::default())
    }

    pub fn with_time_state(src: R, times: TimeState) -> Self {
        Reader {
            src,
            scanner: Scanner::new(),
            times,
            modules: u16::MAX,
            records: 0,
        }
    }

    /// Only yield records from modules in `mask`. Time tags from other
    /// modules still update the time state.
    pub fn modules(mut self, mask: u16) -> Self {
        self.modules = mask;
        self
    }

    pub fn time_state(&self) -> &TimeState {
        &self.times
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Records framed so far, including skipped ones
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn get_ref(&self) -> &R {
        &self.src
    }

    fn next_raw(&mut self) -> io::Result<Option<Record>> {
        Ok(self.scanner.next_record(&mut self.src)?.map(|raw| {
            self.records += 1;
            Record::from_raw(&raw)
        }))
    }

    /// Skip forward to the first time tag with exactly `value`, which is
    /// applied to the time state. Used to line up streams on a common reset
    /// marker (a time tag of zero). Returns false if the stream ran out.
    pub fn seek_time_tag(&mut self, value: u64) -> io::Result<bool> {
        let start = self.records;
        while let Some(rec) = self.next_raw()? {
            if let Record::TimeTag(tt) = rec {
                if tt.value == value {
                    self.times.update(&tt);
                    info!(
                        module = tt.module,
                        skipped = self.records - start - 1,
                        "found time tag {}",
                        value
                    );
                    return Ok(true);
                }
            }
        }
        warn!(skipped = self.records - start, "time tag {} not found", value);
        Ok(false)
    }
}

impl<R: Read> Iterator for Reader<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_raw() {
                Ok(Some(mut rec)) => {
                    self.times.apply(&mut rec);
                    if self.modules.check(rec.module() as usize) {
                        return Some(Ok(rec));
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Open a record file, decompressing it on the fly if it ends in `.zst`
pub fn open(path: impl AsRef<Path>) -> Result<Box<dyn Read>> {
    let path = path.as_ref();
    let f = File::open(path)?;
    let len = f.metadata()?.len();
    if !is_zst(path) {
        check_length(len);
    }
    wrap(path, f)
}

/// Buffer (and if needed decompress) an already opened record stream
pub fn wrap<R: Read + 'static>(path: &Path, rdr: R) -> Result<Box<dyn Read>> {
    if is_zst(path) {
        Ok(Box::new(stream::read::Decoder::new(rdr)?))
    } else {
        Ok(Box::new(BufReader::new(rdr)))
    }
}

/// Report the number of records a raw file of `len` bytes should hold
pub fn check_length(len: u64) -> u64 {
    let n = len / RECORD_SIZE as u64;
    info!("found {} entries", n);
    if len % RECORD_SIZE as u64 != 0 {
        warn!("file length {} is not a multiple of the record size", len);
    }
    n
}

fn is_zst(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "zst")
}

/// Decode every single in a stream
pub fn singles(src: impl Read, opts: &Options) -> Result<Vec<Single>> {
    let rdr = opts.reader(src)?;
    let singles: Vec<Single> = itertools::process_results(rdr, |recs| {
        recs.filter_map(|r| match r {
            Record::Single(s) => Some(s),
            Record::TimeTag(_) => None,
        })
        .collect()
    })?;
    Ok(singles)
}

/// Decode every single in a stream into a position-reconstructed event
pub fn events(src: impl Read, opts: &Options) -> Result<Vec<Event>> {
    Ok(singles(src, opts)?.iter().map(Event::from).collect())
}

/// Singles as parallel columns
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SinglesColumns {
    pub block: Vec<u8>,
    pub abs_time: Vec<u64>,
    /// One column per energy channel, A through H
    pub energies: [Vec<u16>; NCH],
}

impl SinglesColumns {
    /// Reserve room for `n` rows up front, failing cleanly if that much
    /// memory is not available
    pub fn with_capacity(n: usize) -> Result<Self> {
        let mut cols = SinglesColumns::default();
        cols.block.try_reserve(n)?;
        cols.abs_time.try_reserve(n)?;
        for e in cols.energies.iter_mut() {
            e.try_reserve(n)?;
        }
        Ok(cols)
    }

    pub fn push(&mut self, s: &Single) {
        self.block.push(s.block);
        self.abs_time.push(s.abs_time);
        for (col, &e) in self.energies.iter_mut().zip(s.energies.iter()) {
            col.push(e);
        }
    }

    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }
}

/// Events as parallel columns
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventColumns {
    pub e1: Vec<u16>,
    pub e2: Vec<u16>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub block: Vec<u8>,
    pub abs_time: Vec<u64>,
}

impl EventColumns {
    pub fn with_capacity(n: usize) -> Result<Self> {
        let mut cols = EventColumns::default();
        cols.e1.try_reserve(n)?;
        cols.e2.try_reserve(n)?;
        cols.x.try_reserve(n)?;
        cols.y.try_reserve(n)?;
        cols.block.try_reserve(n)?;
        cols.abs_time.try_reserve(n)?;
        Ok(cols)
    }

    pub fn push(&mut self, ev: &Event) {
        self.e1.push(ev.e1);
        self.e2.push(ev.e2);
        self.x.push(ev.x);
        self.y.push(ev.y);
        self.block.push(ev.block);
        self.abs_time.push(ev.abs_time);
    }

    pub fn len(&self) -> usize {
        self.block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }
}

/// Decode a stream straight into singles columns. `hint` is the expected
/// number of records, e.g. from [`check_length`]; capacity for all of them
/// is claimed before decoding starts.
pub fn singles_columns(src: impl Read, opts: &Options, hint: usize) -> Result<SinglesColumns> {
    let mut cols = SinglesColumns::with_capacity(hint)?;
    for rec in opts.reader(src)? {
        if let Record::Single(s) = rec? {
            cols.push(&s);
        }
    }
    Ok(cols)
}

/// Decode a stream straight into event columns
pub fn event_columns(src: impl Read, opts: &Options, hint: usize) -> Result<EventColumns> {
    let mut cols = EventColumns::with_capacity(hint)?;
    for rec in opts.reader(src)? {
        if let Record::Single(s) = rec? {
            cols.push(&Event::from(&s));
        }
    }
    Ok(cols)
}
