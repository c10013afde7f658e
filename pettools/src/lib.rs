pub mod bit;
pub mod cfg;
pub mod de;
pub mod error;
pub mod frame;
pub mod pat;
pub mod record;
pub mod ser;
pub mod time;

pub use error::{Error, Result};
pub use record::{Record, Single, TimeTag};

/// Size of one record on the wire, in bytes
pub const RECORD_SIZE: usize = 16;
/// Number of detector modules, each with its own time tag counter
pub const NMODULES: usize = 16;
/// Number of distinct 6-bit block ids
pub const NBLOCKS: usize = 64;
/// Energy channels per single: front lane A-D, then rear lane E-H
pub const NCH: usize = 8;

/// Clock periods per time tag interval.
///
/// This is the value used by the current decoder and is the default.
/// An older decoder for the same front-end used [`CLKS_PER_TT_LEGACY`]
/// instead, and nothing in the data stream says which one applies, so
/// treat this as a choice rather than a fact: override it with
/// [`time::TimeState::with_clks_per_tt`] or the `clks_per_tt` field of
/// [`cfg::Run`] when decoding data from older hardware.
pub const CLKS_PER_TT: u64 = 800_000;
/// Clock periods per time tag interval used by the legacy decoder
pub const CLKS_PER_TT_LEGACY: u64 = 0xF_FFFF;

/// TCP port the front-end streams records on
pub const DATA_PORT: u16 = 5555;

/// Module id of a block id
#[inline]
pub fn block_to_module(block: u8) -> u8 {
    block >> 2
}

/// A single with lane-summed energies and a position estimate from
/// charge sharing in the front lane
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug)]
pub struct Event {
    /// Front lane energy, A + B + C + D
    pub e1: u16,
    /// Rear lane energy, E + F + G + H
    pub e2: u16,
    pub x: f64,
    pub y: f64,
    pub block: u8,
    pub abs_time: u64,
}

impl Event {
    pub fn module(&self) -> u8 {
        block_to_module(self.block)
    }
}

impl From<&Single> for Event {
    fn from(s: &Single) -> Self {
        let [a, b, c, d, e, f, g, h] = s.energies;
        let e1 = a + b + c + d;
        let e2 = e + f + g + h;

        // Position falls back to the (1, 1) corner when there is no charge
        let (x, y) = if e1 > 0 {
            ((a + b) as f64 / e1 as f64, (a + d) as f64 / e1 as f64)
        } else {
            (1.0, 1.0)
        };

        Event {
            e1,
            e2,
            x,
            y,
            block: s.block,
            abs_time: s.abs_time,
        }
    }
}

/// Two events from different modules within a coincidence window
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Coincidence {
    /// The event with the lower block id
    pub a: Event,
    /// The event with the higher block id
    pub b: Event,
    /// `a.abs_time - b.abs_time`
    pub tdiff: i64,
}

impl Coincidence {
    pub fn new(ev1: &Event, ev2: &Event) -> Self {
        let (a, b) = if ev1.block < ev2.block {
            (*ev1, *ev2)
        } else {
            (*ev2, *ev1)
        };
        Coincidence {
            a,
            b,
            tdiff: a.abs_time.wrapping_sub(b.abs_time) as i64,
        }
    }
}
