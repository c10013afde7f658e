use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info};
use zstd::stream;

use pettools::cfg::{SaveRaw, Source};

#[derive(Debug, PartialEq, Eq)]
pub enum SaveMessage {
    Save(Vec<u8>),
    Flush,
}

/// Writes the raw byte stream of one source to disk on its own thread
pub struct SaveHandle {
    pub sender: flume::Sender<SaveMessage>,
    pub path: PathBuf,
    /// Resolves to the number of bytes written
    pub join_handle: thread::JoinHandle<Result<u64>>,
}

enum Sink {
    Raw(BufWriter<File>),
    Compressed(stream::write::Encoder<'static, BufWriter<File>>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Raw(w) => w as &mut dyn Write,
            Sink::Compressed(w) => w as &mut dyn Write,
        }
    }

    fn finish(self) -> Result<()> {
        match self {
            Sink::Raw(mut w) => w.flush()?,
            Sink::Compressed(w) => w.finish()?.flush()?,
        }
        Ok(())
    }
}

impl SaveHandle {
    /// Create the file up front, so a bad path fails before the run
    /// starts. An existing file is never overwritten.
    pub fn new(path: PathBuf, compress: bool) -> Result<Self> {
        let f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        let wtr = BufWriter::new(f);
        let mut sink = match compress {
            true => Sink::Compressed(stream::write::Encoder::new(wtr, 0)?),
            false => Sink::Raw(wtr),
        };
        info!("saving raw data to {}", path.display());

        let (sender, receiver) = flume::unbounded();
        let join_handle = thread::Builder::new()
            .name("save".into())
            .spawn(move || {
                let mut written = 0;
                while let Ok(msg) = receiver.recv() {
                    match msg {
                        SaveMessage::Save(data) => {
                            sink.writer().write_all(&data).context("file io error")?;
                            written += data.len() as u64;
                        }
                        SaveMessage::Flush => {
                            sink.writer().flush().context("file io error")?;
                            debug!(written, "flushed");
                        }
                    }
                }
                sink.finish().context("file io error")?;
                Ok(written)
            })?;
        Ok(SaveHandle { sender, path, join_handle })
    }

    /// Start saving the stream of `source` where `how` says, with a file
    /// name made of the run start time and the source
    pub fn for_source(
        how: &SaveRaw,
        source: &Source,
        start: &DateTime<Local>,
    ) -> Result<Option<Self>> {
        let (dir, compress) = match how {
            SaveRaw::Save(false) => return Ok(None),
            SaveRaw::Save(true) => (std::env::current_dir()?, false),
            SaveRaw::RawDir(d) => (d.clone(), false),
            SaveRaw::CompressedDir(d) => (d.clone(), true),
        };
        let path = file_path(&dir, source, start, compress);
        Ok(Some(SaveHandle::new(path, compress)?))
    }
}

/// `<dir>/<start time>_<host>-<port>.raw`, with `.zst` appended when compressed
pub fn file_path(dir: &Path, source: &Source, start: &DateTime<Local>, compress: bool) -> PathBuf {
    let host = source
        .host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>();
    let mut name = format!("{}_{}-{}.raw", start.format("%F_%H-%M-%S"), host, source.port);
    if compress {
        name.push_str(".zst");
    }
    dir.join(name)
}
