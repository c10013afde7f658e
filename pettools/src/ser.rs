//! Serialization: encoding records back into wire format, and writing
//! decoded data as tab-separated values

use anyhow::Result;
use std::io::Write;

use crate::bit::{layout, SYNC_WORD};
use crate::record::{Record, Single, TimeTag};
use crate::{Coincidence, Event, RECORD_SIZE};

/// Encode a record in wire format. Values wider than their field are
/// truncated, and a single's block id determines its module.
pub fn record(rec: &Record) -> [u8; RECORD_SIZE] {
    match rec {
        Record::Single(s) => single(s),
        Record::TimeTag(tt) => time_tag(tt),
    }
}

pub fn single(s: &Single) -> [u8; RECORD_SIZE] {
    let mut rec = [0u8; RECORD_SIZE];
    layout::SYNC.set(&mut rec, SYNC_WORD as u64);
    layout::FLAG.set(&mut rec, 1);
    layout::BLOCK.set(&mut rec, s.block as u64);
    for (field, &e) in layout::ENERGY.iter().zip(s.energies.iter()) {
        field.set(&mut rec, e as u64);
    }
    layout::FINE_TIME.set(&mut rec, s.time as u64);
    rec
}

pub fn time_tag(tt: &TimeTag) -> [u8; RECORD_SIZE] {
    let mut rec = [0u8; RECORD_SIZE];
    layout::SYNC.set(&mut rec, SYNC_WORD as u64);
    layout::MODULE.set(&mut rec, tt.module as u64);
    layout::TT_HIGH.set(&mut rec, tt.value >> 24);
    layout::TT_LOW.set(&mut rec, tt.value);
    rec
}

/// Write records in wire format
pub fn records(wtr: &mut impl Write, recs: &[Record]) -> Result<()> {
    for rec in recs {
        wtr.write_all(&record(rec))?;
    }
    Ok(())
}

/// Serialize singles to tab-separated values (block, abs_time, A..H).
pub fn singles_tsv(wtr: &mut csv::Writer<impl Write>, singles: &[Single]) -> Result<()> {
    for s in singles {
        let mut row = Vec::with_capacity(2 + s.energies.len());
        row.push(s.block.to_string());
        row.push(s.abs_time.to_string());
        row.extend(s.energies.iter().map(|e| e.to_string()));
        wtr.write_record(&row)?;
    }
    Ok(())
}

/// Serialize events to tab-separated values (e1, e2, x, y, block, abs_time).
pub fn events_tsv(wtr: &mut csv::Writer<impl Write>, events: &[Event]) -> Result<()> {
    for ev in events {
        wtr.write_record(&[
            ev.e1.to_string(),
            ev.e2.to_string(),
            ev.x.to_string(),
            ev.y.to_string(),
            ev.block.to_string(),
            ev.abs_time.to_string(),
        ])?;
    }
    Ok(())
}

/// Serialize coincidences to tab-separated values: x, y, e1, e2 and block
/// of the "a" event, the same for the "b" event, then the time difference.
pub fn coincidences_tsv(wtr: &mut csv::Writer<impl Write>, coins: &[Coincidence]) -> Result<()> {
    for c in coins {
        wtr.write_record(&[
            c.a.x.to_string(),
            c.a.y.to_string(),
            c.a.e1.to_string(),
            c.a.e2.to_string(),
            c.a.block.to_string(),
            c.b.x.to_string(),
            c.b.y.to_string(),
            c.b.e1.to_string(),
            c.b.e2.to_string(),
            c.b.block.to_string(),
            c.tdiff.to_string(),
        ])?;
    }
    Ok(())
}
