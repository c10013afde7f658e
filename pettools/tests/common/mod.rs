#![allow(dead_code)]

use pettools::{ser, Record, Single, TimeTag, NCH};
use rand::Rng;

/// Builds a wire-format stream record by record
#[derive(Default)]
pub struct Stream {
    pub bytes: Vec<u8>,
}

impl Stream {
    pub fn new() -> Self {
        Stream::default()
    }

    pub fn records(mut self, recs: &[Record]) -> Self {
        ser::records(&mut self.bytes, recs).unwrap();
        self
    }

    pub fn time_tag(self, module: u8, value: u64) -> Self {
        self.records(&[Record::TimeTag(TimeTag { module, value })])
    }

    pub fn single(self, block: u8, energies: [u16; NCH], time: u32) -> Self {
        self.records(&[Record::Single(Single {
            block,
            module: block >> 2,
            energies,
            time,
            abs_time: 0,
        })])
    }

    pub fn junk(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn random_single<R: Rng>(rng: &mut R) -> Single {
    let block = rng.gen_range(0..64u8);
    let mut energies = [0u16; NCH];
    for e in energies.iter_mut() {
        *e = rng.gen_range(0..4096);
    }
    Single {
        block,
        module: block >> 2,
        energies,
        time: rng.gen_range(0..1 << 20),
        abs_time: 0,
    }
}

pub fn singles_only(recs: Vec<Record>) -> Vec<Single> {
    recs.into_iter()
        .filter_map(|r| match r {
            Record::Single(s) => Some(s),
            Record::TimeTag(_) => None,
        })
        .collect()
}
