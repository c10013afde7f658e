//! Running a set of acquisition sessions, one per front-end

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

use pettools::cfg::{Run, SessionRecord, Source};
use pettools::{Single, NMODULES};

use crate::client::{ClientHandle, Streamed};
use crate::processor::{Counts, ProcessorHandle, Summary};
use crate::queue::QueueReader;
use crate::save::SaveHandle;

/// How one session ended
#[derive(Debug)]
pub struct SessionReport {
    pub source: Source,
    pub streamed: Option<Streamed>,
    pub summary: Option<Summary>,
    /// Raw data file and the bytes written to it
    pub saved: Option<(PathBuf, u64)>,
    /// Every error the session's threads ended with
    pub errors: Vec<String>,
}

impl SessionReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn record(&self) -> SessionRecord {
        let counts = self.summary.as_ref().map(|s| s.counts.clone()).unwrap_or_default();
        SessionRecord {
            source: self.source.to_string(),
            bytes: counts.bytes,
            records: counts.records,
            time_tags: counts.time_tags,
            resyncs: counts.resyncs,
            dropped: counts.dropped,
            reset_found: self.summary.as_ref().and_then(|s| s.reset_found),
            saved: self.saved.as_ref().map(|(p, _)| p.clone()),
            error: match self.errors.is_empty() {
                true => None,
                false => Some(self.errors.join("; ")),
            },
        }
    }
}

struct Session {
    source: Source,
    client: ClientHandle,
    processor: ProcessorHandle,
    save: Option<(PathBuf, thread::JoinHandle<Result<u64>>)>,
}

/// A running acquisition
pub struct Acquisition {
    pub start: DateTime<Local>,
    sessions: Vec<Session>,
}

impl Acquisition {
    /// Validate `run` and start one session per source. Nothing touches the
    /// network unless every source is well formed.
    pub fn start(run: &Run, stop: Arc<AtomicBool>) -> Result<Self> {
        Acquisition::with_output(run, stop, None)
    }

    /// As [`Acquisition::start`], also sending every decoded single on
    /// `output`
    pub fn with_output(
        run: &Run,
        stop: Arc<AtomicBool>,
        output: Option<flume::Sender<Single>>,
    ) -> Result<Self> {
        let sources = run.validate()?;
        let start = Local::now();
        let opts = run.decode_options();

        // Open every save file before connecting anywhere
        let mut saves = Vec::with_capacity(sources.len());
        for source in &sources {
            saves.push(match &run.save_raw {
                Some(how) => SaveHandle::for_source(how, source, &start)?,
                None => None,
            });
        }

        let sessions = start_sessions(sources.into_iter().zip(saves), &stop, |source, save| {
            spawn(source, run, &stop, opts, save, output.clone())
        })?;
        info!("started {} sessions", sessions.len());
        Ok(Acquisition { start, sessions })
    }

    pub fn sources(&self) -> Vec<Source> {
        self.sessions.iter().map(|s| s.source.clone()).collect()
    }

    /// Latest published counts of every session
    pub fn counts(&self) -> Vec<Counts> {
        self.sessions.iter().map(|s| s.processor.counts.lock().clone()).collect()
    }

    /// Singles per module, summed over sessions
    pub fn singles(&self) -> [u64; NMODULES] {
        let mut total = [0; NMODULES];
        for c in self.counts() {
            for (t, n) in total.iter_mut().zip(c.singles.iter()) {
                *t += n;
            }
        }
        total
    }

    /// True once every session has stopped decoding
    pub fn is_finished(&self) -> bool {
        self.sessions.iter().all(|s| s.processor.join_handle.is_finished())
    }

    /// Wait for every session. Call after setting the stop flag, or once
    /// [`Acquisition::is_finished`].
    pub fn join(self) -> Vec<SessionReport> {
        self.sessions.into_iter().map(join_session).collect()
    }
}

/// Spawn a session per item. If one cannot be started, stop and join the
/// ones already running before giving up.
fn start_sessions<I, F>(items: I, stop: &AtomicBool, mut spawn: F) -> Result<Vec<Session>>
where
    I: IntoIterator<Item = (Source, Option<SaveHandle>)>,
    F: FnMut(&Source, Option<SaveHandle>) -> Result<Session>,
{
    let mut sessions = Vec::new();
    for (source, save) in items {
        match spawn(&source, save) {
            Ok(session) => sessions.push(session),
            Err(e) => {
                stop.store(true, Ordering::Relaxed);
                let started = sessions.len();
                sessions.into_iter().for_each(|s| drop(join_session(s)));
                info!("joined {} sessions started before the failure", started);
                return Err(e.context(format!("cannot start session for {}", source)));
            }
        }
    }
    Ok(sessions)
}

fn spawn(
    source: &Source,
    run: &Run,
    stop: &Arc<AtomicBool>,
    opts: pettools::de::Options,
    save: Option<SaveHandle>,
    output: Option<flume::Sender<Single>>,
) -> Result<Session> {
    let (sender, receiver) = flume::bounded(run.stream.queue_depth);
    let rdr = QueueReader::new(receiver);
    let (rdr, save) = match save {
        Some(SaveHandle { sender, path, join_handle }) => {
            (rdr.tee(sender), Some((path, join_handle)))
        }
        None => (rdr, None),
    };
    let processor = ProcessorHandle::new(source.to_string(), rdr, opts, output, stop.clone())?;
    let client = ClientHandle::new(source.clone(), run.stream, sender, stop.clone())?;
    Ok(Session { source: source.clone(), client, processor, save })
}

fn joined<T>(res: thread::Result<Result<T>>, what: &str) -> Result<T> {
    res.map_err(|_| anyhow!("{} thread panicked", what))?
}

fn join_session(s: Session) -> SessionReport {
    let mut errors = Vec::new();
    let streamed = match joined(s.client.join_handle.join(), "network") {
        Ok(v) => Some(v),
        Err(e) => {
            errors.push(format!("{:#}", e));
            None
        }
    };
    let summary = match joined(s.processor.join_handle.join(), "decoder") {
        Ok(v) => Some(v),
        Err(e) => {
            errors.push(format!("{:#}", e));
            None
        }
    };
    let saved = match s.save {
        Some((path, handle)) => match joined(handle.join(), "save") {
            Ok(n) => Some((path, n)),
            Err(e) => {
                errors.push(format!("{:#}", e));
                Some((path, 0))
            }
        },
        None => None,
    };
    for e in &errors {
        error!(source = %s.source, "{}", e);
    }
    SessionReport { source: s.source, streamed, summary, saved, errors }
}
