//! Decoding of aligned 16-byte records into singles and time tags

use crate::bit::layout;
use crate::error::{Error, Result};
use crate::{NCH, RECORD_SIZE};

/// A coarse, module-scoped time counter
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
pub struct TimeTag {
    pub module: u8,
    /// 48 bits on the wire, of which the hardware uses the low 44
    pub value: u64,
}

/// A detected event in one block of one module
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct Single {
    /// Block id, 0..64
    pub block: u8,
    /// Module id, the top four bits of the block id
    pub module: u8,
    /// 12-bit channel energies, front lane A-D then rear lane E-H
    pub energies: [u16; NCH],
    /// 20-bit fine time since the module's last time tag
    pub time: u32,
    /// Absolute time in clock periods. Decoding leaves this at zero; it is
    /// filled in from the module's last time tag by [`crate::time::TimeState`].
    pub abs_time: u64,
}

impl Single {
    pub fn front(&self) -> &[u16] {
        &self.energies[..NCH / 2]
    }

    pub fn rear(&self) -> &[u16] {
        &self.energies[NCH / 2..]
    }
}

/// One decoded record
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Record {
    Single(Single),
    TimeTag(TimeTag),
}

impl Record {
    /// Decode a record from a slice that must be exactly one record long.
    ///
    /// The sync word is not checked; that is the frame scanner's job.
    pub fn decode(data: &[u8]) -> Result<Record> {
        let rec = <&[u8; RECORD_SIZE]>::try_from(data)
            .map_err(|_| Error::RecordLength(data.len()))?;
        Ok(Record::from_raw(rec))
    }

    /// Decode an aligned record
    pub fn from_raw(rec: &[u8; RECORD_SIZE]) -> Record {
        let module = layout::MODULE.read(rec);
        if layout::FLAG.get(rec) == 1 {
            let mut energies = [0u16; NCH];
            for (e, field) in energies.iter_mut().zip(layout::ENERGY.iter()) {
                *e = field.read(rec);
            }
            Record::Single(Single {
                block: layout::BLOCK.read(rec),
                module,
                energies,
                time: layout::FINE_TIME.read(rec),
                abs_time: 0,
            })
        } else {
            let value = layout::TT_HIGH.get(rec) << 24 | layout::TT_LOW.get(rec);
            Record::TimeTag(TimeTag { module, value })
        }
    }

    pub fn module(&self) -> u8 {
        match self {
            Record::Single(s) => s.module,
            Record::TimeTag(t) => t.module,
        }
    }
}
