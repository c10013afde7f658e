//! Absolute time reconstruction from per-module time tags

use crate::record::{Record, Single, TimeTag};
use crate::{CLKS_PER_TT, NMODULES};

/// The last time tag seen for every module in one decode session.
///
/// Time tags for a module precede the singles they timestamp, so this is
/// strictly forward-only: a late or missing time tag is never corrected
/// after the fact. Singles from different modules interleave freely on
/// the wire; sort by `abs_time` to get global time order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeState {
    last: [u64; NMODULES],
    clks_per_tt: u64,
}

impl Default for TimeState {
    fn default() -> Self {
        TimeState::with_clks_per_tt(CLKS_PER_TT)
    }
}

impl TimeState {
    pub fn new() -> Self {
        TimeState::default()
    }

    pub fn with_clks_per_tt(clks_per_tt: u64) -> Self {
        TimeState {
            last: [0; NMODULES],
            clks_per_tt,
        }
    }

    pub fn clks_per_tt(&self) -> u64 {
        self.clks_per_tt
    }

    /// Last time tag value seen for `module`
    pub fn last(&self, module: u8) -> u64 {
        self.last[module as usize % NMODULES]
    }

    /// Forget every time tag
    pub fn reset(&mut self) {
        self.last = [0; NMODULES];
    }

    pub fn update(&mut self, tt: &TimeTag) {
        self.last[tt.module as usize % NMODULES] = tt.value;
    }

    /// Absolute time of a fine time reading on `module`.
    ///
    /// Wraps instead of overflowing for time tags beyond what the hardware
    /// produces.
    #[inline]
    pub fn absolute(&self, module: u8, time: u32) -> u64 {
        self.last(module)
            .wrapping_mul(self.clks_per_tt)
            .wrapping_add(time as u64)
    }

    pub fn stamp(&self, s: &mut Single) {
        s.abs_time = self.absolute(s.module, s.time);
    }

    /// Feed one record through: time tags update the table, singles get
    /// their absolute time
    pub fn apply(&mut self, rec: &mut Record) {
        match rec {
            Record::TimeTag(tt) => self.update(tt),
            Record::Single(s) => self.stamp(s),
        }
    }
}
