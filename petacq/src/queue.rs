//! Hand-off between a network thread and its decoder

use std::io::{self, Read};
use tracing::warn;

use crate::save::SaveMessage;

/// One message on a session queue. The producer always finishes with
/// `End`, whatever the reason it stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    Data(Vec<u8>),
    End,
}

/// Reads the bytes of a chunk queue in order. `Chunk::End`, or every
/// sender being dropped, is end of file.
pub struct QueueReader {
    receiver: flume::Receiver<Chunk>,
    cur: Vec<u8>,
    pos: usize,
    done: bool,
    bytes: u64,
    tee: Option<flume::Sender<SaveMessage>>,
}

impl QueueReader {
    pub fn new(receiver: flume::Receiver<Chunk>) -> Self {
        QueueReader {
            receiver,
            cur: Vec::new(),
            pos: 0,
            done: false,
            bytes: 0,
            tee: None,
        }
    }

    /// Also pass every chunk on to a save thread
    pub fn tee(mut self, sender: flume::Sender<SaveMessage>) -> Self {
        self.tee = Some(sender);
        self
    }

    /// Bytes received so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn next_chunk(&mut self) {
        match self.receiver.recv() {
            Ok(Chunk::Data(data)) => {
                self.bytes += data.len() as u64;
                if let Some(tee) = &self.tee {
                    if tee.send(SaveMessage::Save(data.clone())).is_err() {
                        warn!("save thread is gone, no longer saving");
                        self.tee = None;
                    }
                }
                self.cur = data;
                self.pos = 0;
            }
            Ok(Chunk::End) | Err(_) => {
                if let Some(tee) = self.tee.take() {
                    let _ = tee.send(SaveMessage::Flush);
                }
                self.done = true;
            }
        }
    }
}

impl Read for QueueReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.cur.len() {
            if self.done {
                return Ok(0);
            }
            self.next_chunk();
        }
        let n = buf.len().min(self.cur.len() - self.pos);
        buf[..n].copy_from_slice(&self.cur[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
