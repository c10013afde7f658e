use anyhow::{bail, Context, Result};
use flume::SendTimeoutError;
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

use pettools::cfg::{Source, StreamSettings};

use crate::queue::Chunk;

/// What a network thread moved onto its queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Streamed {
    pub bytes: u64,
    pub chunks: u64,
}

/// Reads one front-end's data socket on its own thread, passing the bytes
/// on in chunks. The thread stops when the peer closes the connection, on
/// a socket error, or once `stop` is set; in every case the queue is ended
/// with `Chunk::End`.
pub struct ClientHandle {
    pub source: Source,
    pub join_handle: thread::JoinHandle<Result<Streamed>>,
}

/// Sends `Chunk::End` when dropped
struct EndOfStream(flume::Sender<Chunk>);

impl Drop for EndOfStream {
    fn drop(&mut self) {
        let _ = self.0.send(Chunk::End);
    }
}

impl ClientHandle {
    pub fn new(
        source: Source,
        settings: StreamSettings,
        sender: flume::Sender<Chunk>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let src = source.clone();
        let join_handle = thread::Builder::new()
            .name(format!("client {}", source))
            .spawn(move || {
                let end = EndOfStream(sender);
                let span = info_span!("client", source = %src);
                let _enter = span.enter();
                let res = stream(&src, &settings, &end.0, &stop);
                match &res {
                    Ok(s) => info!(bytes = s.bytes, chunks = s.chunks, "session ended"),
                    Err(e) => warn!("session failed: {:#}", e),
                }
                res
            })?;
        Ok(ClientHandle { source, join_handle })
    }
}

fn connect(source: &Source, settings: &StreamSettings) -> Result<TcpStream> {
    let addrs = (source.host.as_str(), source.port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {}", source))?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, settings.connect_timeout) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                debug!(%addr, "connect failed: {}", e);
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) => Err(e).with_context(|| format!("cannot connect to {}", source)),
        None => bail!("{} has no addresses", source),
    }
}

/// Whether a chunk made it onto the queue
#[derive(Debug, PartialEq, Eq)]
enum HandOff {
    Sent,
    /// Stop was requested while the queue stayed full
    Dropped,
    /// The decoder is gone
    HungUp,
}

/// Queue `chunk`, waiting for room only while `stop` is clear
fn hand_off(
    sender: &flume::Sender<Chunk>,
    mut chunk: Chunk,
    stop: &AtomicBool,
    wait: Duration,
) -> HandOff {
    loop {
        match sender.send_timeout(chunk, wait) {
            Ok(()) => return HandOff::Sent,
            Err(SendTimeoutError::Disconnected(_)) => return HandOff::HungUp,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.load(Ordering::Relaxed) {
                    return HandOff::Dropped;
                }
                chunk = back;
            }
        }
    }
}

fn stream(
    source: &Source,
    settings: &StreamSettings,
    sender: &flume::Sender<Chunk>,
    stop: &AtomicBool,
) -> Result<Streamed> {
    let mut conn = connect(source, settings)?;
    conn.set_read_timeout(Some(settings.recv_timeout))?;
    info!("connected");

    let mut streamed = Streamed::default();
    let mut buf = vec![0u8; settings.chunk_size];
    let mut filled = 0;
    let outcome = loop {
        if stop.load(Ordering::Relaxed) {
            info!("stopping");
            break Ok(());
        }
        match conn.read(&mut buf[filled..]) {
            Ok(0) => {
                info!("connection closed by peer");
                break Ok(());
            }
            Ok(n) => {
                filled += n;
                streamed.bytes += n as u64;
                if filled == buf.len() {
                    let full = std::mem::replace(&mut buf, vec![0u8; settings.chunk_size]);
                    filled = 0;
                    match hand_off(sender, Chunk::Data(full), stop, settings.recv_timeout) {
                        HandOff::Sent => streamed.chunks += 1,
                        HandOff::Dropped => {
                            warn!("stopping with a full queue, last chunk dropped");
                            break Ok(());
                        }
                        HandOff::HungUp => bail!("decoder hung up"),
                    }
                }
            }
            Err(e) if matches!(
                e.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ) => continue,
            Err(e) => break Err(e),
        }
    };

    // Whatever arrived before the stream stopped is still data
    if filled > 0 {
        buf.truncate(filled);
        if hand_off(sender, Chunk::Data(buf), stop, settings.recv_timeout) == HandOff::Sent {
            streamed.chunks += 1;
        }
    }
    outcome.with_context(|| format!("receive from {} failed", source))?;
    Ok(streamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn settings(chunk_size: usize) -> StreamSettings {
        StreamSettings {
            chunk_size,
            recv_timeout: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn local(listener: &TcpListener) -> Source {
        let port = listener.local_addr().unwrap().port();
        Source { host: "127.0.0.1".into(), port }
    }

    #[test]
    fn chunks_and_tail_then_end() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (tx, rx) = flume::bounded(16);
        let stop = Arc::new(AtomicBool::new(false));
        let client = ClientHandle::new(local(&listener), settings(4), tx, stop).unwrap();

        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        drop(peer);

        let streamed = client.join_handle.join().unwrap().unwrap();
        assert_eq!(streamed, Streamed { bytes: 10, chunks: 3 });
        let chunks = rx.drain().collect::<Vec<_>>();
        let mut bytes = Vec::new();
        for c in &chunks[..chunks.len() - 1] {
            match c {
                Chunk::Data(d) => bytes.extend_from_slice(d),
                Chunk::End => panic!("end before the last chunk"),
            }
        }
        assert_eq!(bytes, (1..=10).collect::<Vec<u8>>());
        assert_eq!(chunks.last(), Some(&Chunk::End));
    }

    #[test]
    fn stop_flag_ends_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (tx, rx) = flume::bounded(16);
        let stop = Arc::new(AtomicBool::new(false));
        let client = ClientHandle::new(local(&listener), settings(4096), tx, stop.clone()).unwrap();

        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(&[0xFF; 16]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Relaxed);

        let streamed = client.join_handle.join().unwrap().unwrap();
        assert_eq!(streamed.bytes, 16);
        let chunks = rx.drain().collect::<Vec<_>>();
        assert_eq!(chunks, vec![Chunk::Data(vec![0xFF; 16]), Chunk::End]);
        drop(peer);
    }

    #[test]
    fn full_queue_gives_way_to_stop() {
        let (tx, rx) = flume::bounded(1);
        let stop = AtomicBool::new(false);
        let wait = Duration::from_millis(10);
        assert_eq!(hand_off(&tx, Chunk::Data(vec![1]), &stop, wait), HandOff::Sent);

        stop.store(true, Ordering::Relaxed);
        assert_eq!(hand_off(&tx, Chunk::Data(vec![2]), &stop, wait), HandOff::Dropped);
        assert_eq!(rx.recv().unwrap(), Chunk::Data(vec![1]));

        drop(rx);
        assert_eq!(hand_off(&tx, Chunk::Data(vec![3]), &stop, wait), HandOff::HungUp);
    }

    #[test]
    fn refused_connection_still_ends_queue() {
        // bind then drop to find a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let (tx, rx) = flume::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let source = Source { host: "127.0.0.1".into(), port };
        let client = ClientHandle::new(source, settings(16), tx, stop).unwrap();

        assert!(client.join_handle.join().unwrap().is_err());
        assert_eq!(rx.recv().unwrap(), Chunk::End);
    }
}
