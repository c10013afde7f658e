//! Bit-level tools: the record field layout, and bitmasks of modules

use bit_iter::BitIter;
use num_traits::{AsPrimitive, PrimInt, Unsigned};
use std::ops::{BitAndAssign, BitOrAssign};

use crate::{NMODULES, RECORD_SIZE};

/// Value of the top five bits of the first byte of every record
pub const SYNC_WORD: u8 = 0x1F;

/// True if `b` can start a record
#[inline]
pub fn is_header(b: u8) -> bool {
    b >> 3 == SYNC_WORD
}

/// A bit field inside a record.
///
/// Bits are numbered big-endian: `bit` counts from the most significant
/// bit of byte `byte`, and the field runs `width` bits towards the end of
/// the record, crossing byte boundaries as needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Field {
    pub byte: usize,
    pub bit: usize,
    pub width: usize,
}

impl Field {
    pub const fn new(byte: usize, bit: usize, width: usize) -> Self {
        Field { byte, bit, width }
    }

    /// First bit of the field, counted from the start of the record
    pub const fn start(&self) -> usize {
        self.byte * 8 + self.bit
    }

    /// One past the last bit of the field
    pub const fn end(&self) -> usize {
        self.start() + self.width
    }

    pub const fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// Extract the field from a record
    #[inline]
    pub fn get(&self, rec: &[u8; RECORD_SIZE]) -> u64 {
        let last = (self.end() - 1) / 8;
        let acc = rec[self.byte..=last]
            .iter()
            .fold(0u64, |acc, &b| acc << 8 | b as u64);
        let tail = (last + 1) * 8 - self.end();
        acc >> tail & self.mask()
    }

    /// Extract the field into a narrower integer. The layout guarantees
    /// the target is wide enough, so the cast never loses bits.
    #[inline]
    pub fn read<T>(&self, rec: &[u8; RECORD_SIZE]) -> T
    where
        T: Copy + 'static,
        u64: AsPrimitive<T>,
    {
        self.get(rec).as_()
    }

    /// Write `value` into the field, ignoring bits above its width
    pub fn set(&self, rec: &mut [u8; RECORD_SIZE], value: u64) {
        let value = value & self.mask();
        for i in 0..self.width {
            let pos = self.start() + i;
            let x = value.check(self.width - 1 - i);
            rec[pos / 8].change(7 - pos % 8, x);
        }
    }
}

/// Record layout.
///
/// ```text
/// Single
/// CRC | f |    b   |   E1   |    E2   |   E3    |   E4   |   E5    |   E6   |   E7    |   E8   |       T
/// { 5 , 1 , 2 }{ 4 , 4 }{ 8 }{ 8 }{ 4 , 4 }{ 8 }{ 8 }{ 4 , 4 }{ 8 }{ 8 }{ 4 , 4 }{ 8 }{ 8 }{ 4 , 4 }{ 8 }{ 8 }
///       0          1      2    3      4      5    6      7      8    9     10     11   12     13     14   15
///
/// Time tag
/// CRC | f |    b   |                     0's                    |             TT
/// { 5 , 1 , 2 }{ 4 , 4 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }{ 8 }
///       0          1      2    3    4    5    6    7    8    9   10   11   12   13   14   15
/// ```
pub mod layout {
    use super::Field;
    use crate::NCH;

    pub const SYNC: Field = Field::new(0, 0, 5);
    /// 1 for a single, 0 for a time tag
    pub const FLAG: Field = Field::new(0, 5, 1);
    pub const BLOCK: Field = Field::new(0, 6, 6);
    /// Top four bits of the block id
    pub const MODULE: Field = Field::new(0, 6, 4);

    pub const ENERGY: [Field; NCH] = [
        Field::new(1, 4, 12),  // A
        Field::new(3, 0, 12),  // B
        Field::new(4, 4, 12),  // C
        Field::new(6, 0, 12),  // D
        Field::new(7, 4, 12),  // E
        Field::new(9, 0, 12),  // F
        Field::new(10, 4, 12), // G
        Field::new(12, 0, 12), // H
    ];
    /// Shares byte 13 with energy H: H takes the high nibble, time the low
    pub const FINE_TIME: Field = Field::new(13, 4, 20);

    pub const TT_RESERVED: Field = Field::new(2, 0, 64);
    pub const TT_HIGH: Field = Field::new(10, 0, 24);
    pub const TT_LOW: Field = Field::new(13, 0, 24);
}

/// Convert modules into a bitmask
pub fn modules_to_mask(mods: &[u8]) -> u16 {
    let mut m = 0u16;
    for &md in mods {
        m.set(md as usize % NMODULES);
    }
    m
}

/// Returns all modules in mask
pub fn mask_to_modules(m: u16) -> Vec<u8> {
    BitIter::from(m).map(|b| b as u8).collect()
}

/// Bitwise set/change/check operations on unsigned integers
pub trait BitOps: PrimInt + BitAndAssign + BitOrAssign + Unsigned {
    fn set(&mut self, b: usize);
    fn change(&mut self, b: usize, x: bool);
    fn check(self, b: usize) -> bool;
}

macro_rules! impl_bitops {
    ($($t:ty),*) => {$(
        impl BitOps for $t {
            #[inline]
            fn set(&mut self, b: usize) {
                *self |= 1 << b;
            }

            #[inline]
            fn change(&mut self, b: usize, x: bool) {
                *self = (*self & !(1 << b)) | ((x as $t) << b);
            }

            #[inline]
            fn check(self, b: usize) -> bool {
                self >> b & 1 == 1
            }
        }
    )*};
}

impl_bitops!(u8, u16, u32, u64);

#[cfg(test)]
mod tests {
    use super::layout::*;
    use super::*;

    #[test]
    fn header_predicate() {
        for b in 0..=u8::MAX {
            assert_eq!(is_header(b), b >= 0xF8);
        }
    }

    #[test]
    fn single_fields_tile_the_record() {
        let mut fields = vec![SYNC, FLAG, BLOCK];
        fields.extend_from_slice(&ENERGY);
        fields.push(FINE_TIME);
        let mut pos = 0;
        for f in fields {
            assert_eq!(f.start(), pos, "{:?}", f);
            pos = f.end();
        }
        assert_eq!(pos, RECORD_SIZE * 8);
    }

    #[test]
    fn time_tag_fields_tile_the_record() {
        let mut pos = BLOCK.end() + 4;
        for f in [TT_RESERVED, TT_HIGH, TT_LOW] {
            assert_eq!(f.start(), pos, "{:?}", f);
            pos = f.end();
        }
        assert_eq!(pos, RECORD_SIZE * 8);
    }

    #[test]
    fn energy_h_and_time_share_a_byte() {
        let h = ENERGY[7];
        assert_eq!((h.end() - 1) / 8, FINE_TIME.byte);
        assert_eq!(h.end(), FINE_TIME.start());
    }

    #[test]
    fn module_is_top_of_block() {
        let mut rec = [0u8; RECORD_SIZE];
        for block in 0..64u64 {
            BLOCK.set(&mut rec, block);
            assert_eq!(BLOCK.get(&rec), block);
            assert_eq!(MODULE.get(&rec), block >> 2);
        }
    }

    #[test]
    fn field_extraction_matches_shifts() {
        let rec: [u8; RECORD_SIZE] = [
            0xFD, 0x5A, 0x3C, 0x81, 0x7E, 0x42, 0x99, 0x18, 0xE7, 0x24, 0xDB, 0x66, 0xC3, 0x0F,
            0xF0, 0xA5,
        ];
        let d = rec.map(|b| b as u64);
        assert_eq!(BLOCK.get(&rec), ((d[0] << 4) | (d[1] >> 4)) & 0x3F);
        assert_eq!(MODULE.get(&rec), ((d[0] << 2) | (d[1] >> 6)) & 0xF);
        assert_eq!(FLAG.get(&rec), (d[0] >> 2) & 1);
        assert_eq!(ENERGY[0].get(&rec), ((d[1] << 8) | d[2]) & 0xFFF);
        assert_eq!(ENERGY[1].get(&rec), (d[3] << 4) | (d[4] >> 4));
        assert_eq!(ENERGY[2].get(&rec), ((d[4] << 8) | d[5]) & 0xFFF);
        assert_eq!(ENERGY[3].get(&rec), (d[6] << 4) | (d[7] >> 4));
        assert_eq!(ENERGY[4].get(&rec), ((d[7] << 8) | d[8]) & 0xFFF);
        assert_eq!(ENERGY[5].get(&rec), (d[9] << 4) | (d[10] >> 4));
        assert_eq!(ENERGY[6].get(&rec), ((d[10] << 8) | d[11]) & 0xFFF);
        assert_eq!(ENERGY[7].get(&rec), (d[12] << 4) | (d[13] >> 4));
        assert_eq!(
            FINE_TIME.get(&rec),
            ((d[13] << 16) | (d[14] << 8) | d[15]) & 0xFFFFF
        );
        assert_eq!(TT_HIGH.get(&rec), (d[10] << 16) | (d[11] << 8) | d[12]);
        assert_eq!(TT_LOW.get(&rec), (d[13] << 16) | (d[14] << 8) | d[15]);
    }

    #[test]
    fn set_leaves_neighbours_alone() {
        let mut rec = [0xFFu8; RECORD_SIZE];
        FINE_TIME.set(&mut rec, 0);
        assert_eq!(ENERGY[7].get(&rec), 0xFFF);
        assert_eq!(FINE_TIME.get(&rec), 0);
        assert_eq!(rec[13], 0xF0);

        ENERGY[7].set(&mut rec, 0x1234);
        assert_eq!(ENERGY[7].get(&rec), 0x234);
        assert_eq!(FINE_TIME.get(&rec), 0);
    }

    #[test]
    fn module_masks() {
        assert_eq!(0b01, modules_to_mask(&[0]));
        assert_eq!(0b10, modules_to_mask(&[1]));
        assert_eq!(0x8001, modules_to_mask(&[0, 15]));
        for m in [0u16, 1, 0x00F0, 0xA5A5, u16::MAX] {
            assert_eq!(m, modules_to_mask(&mask_to_modules(m)));
        }
    }

    #[test]
    fn bit_ops() {
        for i in u8::MIN..=u8::MAX {
            for b in 0..8 {
                let mut x = i;
                assert_eq!(i.check(b), i >> b & 1 == 1);
                x.set(b);
                assert_eq!(x, i | 1 << b);
                x.change(b, false);
                assert_eq!(x, i & !(1 << b));
                x.change(b, true);
                assert_eq!(x, i | 1 << b);
            }
        }
    }
}
