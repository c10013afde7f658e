use petacq::session::Acquisition;
use pettools::cfg::{Run, SaveRaw, StreamSettings};
use pettools::{ser, Single, TimeTag, CLKS_PER_TT};
use std::io::{ErrorKind, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn run_for(sources: Vec<String>) -> Run {
    Run {
        sources,
        stream: StreamSettings {
            chunk_size: 64,
            queue_depth: 4,
            recv_timeout: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(2),
        },
        ..Default::default()
    }
}

fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn wait_until_finished(acq: &Acquisition) {
    let t0 = Instant::now();
    while !acq.is_finished() {
        assert!(t0.elapsed() < Duration::from_secs(10), "sessions did not finish");
        thread::sleep(Duration::from_millis(5));
    }
}

fn single(block: u8, time: u32) -> [u8; 16] {
    ser::single(&Single { block, energies: [block as u16; 8], time, ..Default::default() })
}

fn stream() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&ser::time_tag(&TimeTag { module: 1, value: 7 }));
    for k in 0..20u32 {
        bytes.extend_from_slice(&single(4 + (k % 4) as u8, 100 * k));
    }
    bytes.extend_from_slice(&ser::time_tag(&TimeTag { module: 1, value: 0 }));
    bytes.extend_from_slice(&single(5, 42));
    bytes
}

#[test]
fn decodes_live_stream() {
    let (listener, addr) = listen();
    let (tx, rx) = flume::unbounded();
    let stop = Arc::new(AtomicBool::new(false));
    let acq = Acquisition::with_output(&run_for(vec![addr]), stop, Some(tx)).unwrap();

    let (mut peer, _) = listener.accept().unwrap();
    let bytes = stream();
    // dribble the stream out so records straddle chunk boundaries
    for piece in bytes.chunks(23) {
        peer.write_all(piece).unwrap();
    }
    drop(peer);

    wait_until_finished(&acq);
    let reports = acq.join();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.is_ok(), "{:?}", report.errors);
    assert_eq!(report.streamed.unwrap().bytes, bytes.len() as u64);

    let singles = rx.drain().collect::<Vec<_>>();
    assert_eq!(singles.len(), 21);
    assert_eq!(singles[3].block, 7);
    assert_eq!(singles[3].abs_time, 7 * CLKS_PER_TT + 300);
    assert_eq!(singles[20].abs_time, 42);

    let counts = &report.summary.as_ref().unwrap().counts;
    assert_eq!(counts.bytes, bytes.len() as u64);
    assert_eq!(counts.records, 23);
    assert_eq!(counts.time_tags, 2);
    assert_eq!(counts.singles[1], 21);
    assert_eq!(counts.resyncs, 0);

    let record = report.record();
    assert_eq!(record.records, 23);
    assert_eq!(record.error, None);
}

#[test]
fn seeks_reset_time_tag() {
    let (listener, addr) = listen();
    let (tx, rx) = flume::unbounded();
    let stop = Arc::new(AtomicBool::new(false));
    let run = Run { seek_reset: Some(0), ..run_for(vec![addr]) };
    let acq = Acquisition::with_output(&run, stop, Some(tx)).unwrap();

    let (mut peer, _) = listener.accept().unwrap();
    peer.write_all(&stream()).unwrap();
    drop(peer);

    wait_until_finished(&acq);
    let reports = acq.join();
    assert_eq!(reports[0].summary.as_ref().unwrap().reset_found, Some(true));
    let singles = rx.drain().collect::<Vec<_>>();
    assert_eq!(singles.len(), 1);
    assert_eq!(singles[0].abs_time, 42);
}

#[test]
fn stop_flag_ends_consumer() {
    let (listener, addr) = listen();
    let stop = Arc::new(AtomicBool::new(false));
    let acq = Acquisition::start(&run_for(vec![addr]), stop.clone()).unwrap();

    // the peer stays connected and silent
    let (mut peer, _) = listener.accept().unwrap();
    peer.write_all(&single(0, 1)).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!acq.is_finished());

    let t0 = Instant::now();
    stop.store(true, Ordering::Relaxed);
    let reports = acq.join();
    assert!(t0.elapsed() < Duration::from_secs(5));
    assert!(reports[0].is_ok(), "{:?}", reports[0].errors);
    assert_eq!(reports[0].summary.as_ref().unwrap().counts.singles[0], 1);
    drop(peer);
}

#[test]
fn stop_with_stalled_output() {
    let (listener, addr) = listen();
    // room for one single, and nobody reads it
    let (tx, rx) = flume::bounded(1);
    let stop = Arc::new(AtomicBool::new(false));
    let acq = Acquisition::with_output(&run_for(vec![addr]), stop.clone(), Some(tx)).unwrap();

    let (mut peer, _) = listener.accept().unwrap();
    let bytes = (0..2000u32).flat_map(|k| single(0, k).to_vec()).collect::<Vec<_>>();
    let writer = thread::spawn(move || {
        let _ = peer.write_all(&bytes);
        peer
    });

    thread::sleep(Duration::from_millis(300));
    assert!(!acq.is_finished());
    stop.store(true, Ordering::Relaxed);

    let (done_tx, done_rx) = flume::bounded(1);
    thread::spawn(move || {
        let _ = done_tx.send(acq.join());
    });
    let reports = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("join did not return after stop");
    assert!(reports[0].is_ok(), "{:?}", reports[0].errors);
    assert!(reports[0].summary.as_ref().unwrap().counts.singles[0] >= 2);
    assert_eq!(rx.len(), 1);
    let _ = writer.join();
}

#[test]
fn connection_failure_ends_consumer() {
    // bind then drop to find a port nobody listens on
    let (listener, dead) = listen();
    drop(listener);
    let (listener, live) = listen();
    let stop = Arc::new(AtomicBool::new(false));
    let acq = Acquisition::start(&run_for(vec![dead, live]), stop).unwrap();

    let (mut peer, _) = listener.accept().unwrap();
    peer.write_all(&single(8, 5)).unwrap();
    drop(peer);

    wait_until_finished(&acq);
    let reports = acq.join();
    assert_eq!(reports.len(), 2);

    assert_eq!(reports[0].errors.len(), 1);
    assert!(reports[0].streamed.is_none());
    let summary = reports[0].summary.as_ref().unwrap();
    assert_eq!(summary.counts.bytes, 0);
    assert!(reports[0].record().error.is_some());

    assert!(reports[1].is_ok(), "{:?}", reports[1].errors);
    assert_eq!(reports[1].summary.as_ref().unwrap().counts.singles[2], 1);
}

#[test]
fn bad_address_rejected_before_io() {
    let (listener, addr) = listen();
    listener.set_nonblocking(true).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let run = run_for(vec![addr, "no such host!".into()]);

    let err = Acquisition::start(&run, stop).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<pettools::Error>(),
        Some(pettools::Error::Address(_))
    ));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(listener.accept().unwrap_err().kind(), ErrorKind::WouldBlock);
}

#[test]
fn saves_raw_stream() {
    let dir = std::env::temp_dir().join(format!("petacq-pipeline-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let (listener, addr) = listen();
    let stop = Arc::new(AtomicBool::new(false));
    let run = Run {
        save_raw: Some(SaveRaw::RawDir(dir.clone())),
        ..run_for(vec![addr])
    };
    let acq = Acquisition::start(&run, stop).unwrap();

    let (mut peer, _) = listener.accept().unwrap();
    let mut bytes = stream();
    bytes.extend_from_slice(&[0x01, 0x02, 0x03]);
    peer.write_all(&bytes).unwrap();
    drop(peer);

    wait_until_finished(&acq);
    let reports = acq.join();
    assert!(reports[0].is_ok(), "{:?}", reports[0].errors);
    let (path, written) = reports[0].saved.clone().unwrap();
    assert_eq!(written, bytes.len() as u64);
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
    std::fs::remove_dir_all(&dir).unwrap();
}
