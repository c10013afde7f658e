//! Tools for analyzing patterns in decoded singles: per-module counts and
//! coincidences between modules

use rayon::prelude::*;

use crate::error::Result;
use crate::record::Single;
use crate::{Coincidence, Event, NMODULES};

/// Count singles in each module
pub fn singles_per_module(singles: &[Single]) -> [u64; NMODULES] {
    let mut counts = [0; NMODULES];
    for s in singles {
        counts[s.module as usize % NMODULES] += 1;
    }
    counts
}

/// Sort events by absolute time. Ties keep no particular order.
pub fn sort_by_time(events: &mut [Event]) {
    events.par_sort_unstable_by_key(|ev| ev.abs_time);
}

/// Find all pairs of events from different modules closer than `win` clock
/// periods. `events` must already be sorted by time.
///
/// Each event is paired with every later event inside the window, so an
/// event can take part in several coincidences. Work is proportional to
/// the number of events times the number inside a window, which for dense
/// data degrades to quadratic.
pub fn coincidences(events: &[Event], win: u64) -> Vec<Coincidence> {
    let mut coins = Vec::new();
    for (i, ev1) in events.iter().enumerate() {
        let m = ev1.module();
        for ev2 in events[i + 1..]
            .iter()
            .take_while(|ev2| ev2.abs_time.saturating_sub(ev1.abs_time) < win)
        {
            if ev2.module() != m {
                coins.push(Coincidence::new(ev1, ev2));
            }
        }
    }
    coins
}

/// Sort `events` in place and find their coincidences
pub fn sorted_coincidences(events: &mut [Event], win: u64) -> Vec<Coincidence> {
    sort_by_time(events);
    coincidences(events, win)
}

/// Coincidences as parallel columns
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoincidenceColumns {
    pub x_a: Vec<f64>,
    pub y_a: Vec<f64>,
    pub e_a1: Vec<u16>,
    pub e_a2: Vec<u16>,
    pub block_a: Vec<u8>,
    pub x_b: Vec<f64>,
    pub y_b: Vec<f64>,
    pub e_b1: Vec<u16>,
    pub e_b2: Vec<u16>,
    pub block_b: Vec<u8>,
    pub tdiff: Vec<i64>,
}

impl CoincidenceColumns {
    pub fn from_coincidences(coins: &[Coincidence]) -> Result<Self> {
        let n = coins.len();
        let mut cols = CoincidenceColumns::default();
        cols.x_a.try_reserve_exact(n)?;
        cols.y_a.try_reserve_exact(n)?;
        cols.e_a1.try_reserve_exact(n)?;
        cols.e_a2.try_reserve_exact(n)?;
        cols.block_a.try_reserve_exact(n)?;
        cols.x_b.try_reserve_exact(n)?;
        cols.y_b.try_reserve_exact(n)?;
        cols.e_b1.try_reserve_exact(n)?;
        cols.e_b2.try_reserve_exact(n)?;
        cols.block_b.try_reserve_exact(n)?;
        cols.tdiff.try_reserve_exact(n)?;

        for c in coins {
            cols.x_a.push(c.a.x);
            cols.y_a.push(c.a.y);
            cols.e_a1.push(c.a.e1);
            cols.e_a2.push(c.a.e2);
            cols.block_a.push(c.a.block);
            cols.x_b.push(c.b.x);
            cols.y_b.push(c.b.y);
            cols.e_b1.push(c.b.e1);
            cols.e_b2.push(c.b.e2);
            cols.block_b.push(c.b.block);
            cols.tdiff.push(c.tdiff);
        }
        Ok(cols)
    }

    pub fn len(&self) -> usize {
        self.tdiff.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tdiff.is_empty()
    }
}
