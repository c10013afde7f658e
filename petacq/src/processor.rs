use anyhow::Result;
use parking_lot::Mutex;
use flume::SendTimeoutError;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span};

use pettools::de::{Options, Reader};
use pettools::time::TimeState;
use pettools::{Record, Single, NMODULES};

/// Records decoded between checks of the publish timer
const CHECK_EVERY: u64 = 1024;
const PUBLISH_PERIOD: Duration = Duration::from_millis(100);
/// Longest wait on a full output channel before the stop flag is checked
const OUTPUT_WAIT: Duration = Duration::from_millis(50);

/// Running totals for one session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub bytes: u64,
    /// Records framed, including those of filtered out modules
    pub records: u64,
    pub time_tags: u64,
    pub singles: [u64; NMODULES],
    pub resyncs: u64,
    pub dropped: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub counts: Counts,
    /// Whether the reset time tag showed up, if one was sought
    pub reset_found: Option<bool>,
}

/// A source of bytes that can say how many it has handed out
pub trait CountingRead: Read {
    fn bytes(&self) -> u64;
}

impl CountingRead for crate::queue::QueueReader {
    fn bytes(&self) -> u64 {
        crate::queue::QueueReader::bytes(self)
    }
}

/// Decodes one session's byte stream on its own thread, publishing counts
/// as it goes
pub struct ProcessorHandle {
    pub counts: Arc<Mutex<Counts>>,
    pub join_handle: thread::JoinHandle<Result<Summary>>,
}

impl ProcessorHandle {
    /// Decoded singles are sent on `output` if given; decoding carries on
    /// without it if the receiving side goes away, or once `stop` is set.
    pub fn new<R>(
        name: String,
        src: R,
        opts: Options,
        output: Option<flume::Sender<Single>>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self>
    where
        R: CountingRead + Send + 'static,
    {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let shared = counts.clone();
        let join_handle = thread::Builder::new()
            .name(format!("decode {}", name))
            .spawn(move || {
                let span = info_span!("decode", source = %name);
                let _enter = span.enter();
                process(src, opts, output, &stop, &shared)
            })?;
        Ok(ProcessorHandle { counts, join_handle })
    }
}

fn publish<R: CountingRead>(rdr: &Reader<R>, local: &mut Counts, shared: &Mutex<Counts>) {
    local.bytes = rdr.get_ref().bytes();
    local.records = rdr.records();
    local.resyncs = rdr.scanner().resyncs();
    local.dropped = rdr.scanner().dropped();
    *shared.lock() = local.clone();
}

/// Send `s` on `tx`, waiting for room only while `stop` is clear. Returns
/// false once the single could not be delivered and never will be.
fn forward(tx: &flume::Sender<Single>, mut s: Single, stop: &AtomicBool) -> bool {
    loop {
        match tx.send_timeout(s, OUTPUT_WAIT) {
            Ok(()) => return true,
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!("output receiver gone");
                return false;
            }
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.load(Ordering::Relaxed) {
                    return false;
                }
                s = back;
            }
        }
    }
}

/// Decode until the source is exhausted.
///
/// Once `stop` is set, singles are no longer forwarded, so a stalled output
/// can never keep the queue from draining. Decoding itself goes on until
/// the producer ends the queue.
pub fn process<R: CountingRead>(
    src: R,
    opts: Options,
    mut output: Option<flume::Sender<Single>>,
    stop: &AtomicBool,
    shared: &Mutex<Counts>,
) -> Result<Summary> {
    let times = TimeState::with_clks_per_tt(opts.clks_per_tt);
    let mut rdr = Reader::with_time_state(src, times).modules(opts.modules);
    let reset_found = match opts.seek {
        Some(value) => Some(rdr.seek_time_tag(value)?),
        None => None,
    };

    let mut local = Counts::default();
    let mut n = 0u64;
    let mut last = Instant::now();
    while let Some(rec) = rdr.next() {
        if output.is_some() && stop.load(Ordering::Relaxed) {
            info!("stop requested, no longer forwarding singles");
            output = None;
        }
        match rec? {
            Record::TimeTag(_) => local.time_tags += 1,
            Record::Single(s) => {
                local.singles[s.module as usize] += 1;
                if let Some(tx) = &output {
                    if !forward(tx, s, stop) {
                        output = None;
                    }
                }
            }
        }
        n += 1;
        if n % CHECK_EVERY == 0 && last.elapsed() >= PUBLISH_PERIOD {
            publish(&rdr, &mut local, shared);
            last = Instant::now();
        }
    }
    publish(&rdr, &mut local, shared);
    info!(
        bytes = local.bytes,
        records = local.records,
        resyncs = local.resyncs,
        dropped = local.dropped,
        "decoding finished"
    );
    if !rdr.scanner().pending().is_empty() {
        debug!("{} bytes left over after the last record", rdr.scanner().pending().len());
    }
    Ok(Summary { counts: local, reset_found })
}
