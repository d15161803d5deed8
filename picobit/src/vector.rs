//! Byte vector space.
//!
//! The space is an array of cell sized units. Every region starts with a
//! one unit header followed by the payload:
//!
//! ```text
//! +-------------+-------------+------+
//! | owner (u16) | units (u16) | used |   header, 5 bytes
//! +-------------+-------------+------+
//! | payload ...                      |
//! ```
//!
//! Allocation bumps `free`; regions are only reclaimed by
//! [`VectorHeap::compact`].
use log::debug;

use crate::{CELL_SIZE, Ptr, VmError};

const OWNER: usize = 0;
const UNITS: usize = 2;
const FLAGS: usize = 4;
const USED: u8 = 1;

#[derive(Debug)]
pub struct VectorHeap {
    bytes: Vec<u8>,
    units: usize,
    free: usize,
}

impl VectorHeap {
    pub fn new(units: usize) -> Self {
        debug_assert!(units <= u16::MAX as usize, "vector offsets are 16 bit");
        Self {
            bytes: vec![0; units * CELL_SIZE],
            units,
            free: 0,
        }
    }

    /// Units needed for a payload of `length` bytes, header included.
    #[inline]
    pub fn units_for(length: u16) -> usize {
        (length as usize).div_ceil(CELL_SIZE) + 1
    }

    pub fn capacity(&self) -> usize {
        self.units
    }

    /// First unit past the last allocated region.
    pub fn free_ptr(&self) -> usize {
        self.free
    }

    pub fn free_units(&self) -> usize {
        self.units - self.free
    }

    #[inline(always)]
    fn read_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.bytes[at], self.bytes[at + 1]])
    }

    #[inline(always)]
    fn write_u16(&mut self, at: usize, value: u16) {
        self.bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    #[inline(always)]
    fn header(unit: usize) -> usize {
        unit * CELL_SIZE
    }

    pub fn region_units(&self, unit: usize) -> usize {
        self.read_u16(Self::header(unit) + UNITS) as usize
    }

    pub fn region_owner(&self, unit: usize) -> Ptr {
        Ptr::new(self.read_u16(Self::header(unit) + OWNER))
    }

    pub fn is_used(&self, unit: usize) -> bool {
        self.bytes[Self::header(unit) + FLAGS] & USED != 0
    }

    fn set_used(&mut self, unit: usize, used: bool) {
        let at = Self::header(unit) + FLAGS;
        if used {
            self.bytes[at] |= USED;
        } else {
            self.bytes[at] &= !USED;
        }
    }

    /// Bump allocates a region for `length` bytes owned by `owner`. Returns
    /// the offset of the first payload unit, or `None` if the tail is too
    /// short.
    pub fn try_alloc(&mut self, length: u16, owner: Ptr) -> Option<u16> {
        let units = Self::units_for(length);
        if self.free_units() < units {
            return None;
        }

        let header = self.free;
        self.free += units;

        let at = Self::header(header);
        self.write_u16(at + OWNER, owner.raw());
        self.write_u16(at + UNITS, units as u16);
        self.set_used(header, true);

        Some(header as u16 + 1)
    }

    /// Marks the region whose payload starts at `start` as free.
    pub fn release(&mut self, start: u16) -> Result<(), VmError> {
        let header = start as usize;
        if header == 0 || header > self.free {
            return Err(VmError::HeapCorruption {
                reason: "vector start outside the allocated space",
            });
        }
        self.set_used(header - 1, false);
        Ok(())
    }

    #[inline]
    pub fn byte(&self, start: u16, index: usize) -> u8 {
        self.bytes[Self::header(start as usize) + index]
    }

    #[inline]
    pub fn set_byte(&mut self, start: u16, index: usize, value: u8) {
        self.bytes[Self::header(start as usize) + index] = value;
    }

    /// Slides every live region down over the free regions before it, so
    /// the free space ends up contiguous at the end. `relocate` is called
    /// with the owner cell and the new payload offset of each moved region.
    pub fn compact(
        &mut self,
        mut relocate: impl FnMut(Ptr, u16),
    ) -> Result<(), VmError> {
        let before = self.free;
        let mut cur = 0;
        let mut dst = 0;

        while cur < self.free {
            let units = self.region_units(cur);
            if units == 0 {
                return Err(VmError::HeapCorruption {
                    reason: "zero length region in vector space",
                });
            }

            if self.is_used(cur) {
                if dst != cur {
                    let from = Self::header(cur);
                    let len = units * CELL_SIZE;
                    self.bytes.copy_within(from..from + len, Self::header(dst));
                    relocate(self.region_owner(dst), dst as u16 + 1);
                }
                dst += units;
            }
            cur += units;
        }

        self.free = dst;
        debug!("vector space compacted: {} -> {} units in use", before, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_rounds_up_and_reserves_a_header() {
        let mut heap = VectorHeap::new(100);
        let start = heap.try_alloc(77, Ptr::new(13)).expect("room");

        assert_eq!(start, 1, "payload starts after the header");
        assert_eq!(heap.free_ptr(), 17);
        assert_eq!(heap.region_units(0), 17);
        assert_eq!(heap.region_owner(0), Ptr::new(13));
        assert!(heap.is_used(0));

        heap.set_byte(start, 35, 3);
        assert_eq!(heap.byte(start, 35), 3);

        assert_eq!(VectorHeap::units_for(0), 1);
        assert_eq!(VectorHeap::units_for(5), 2);
        assert_eq!(VectorHeap::units_for(6), 3);
    }

    #[test]
    fn allocation_fails_when_tail_is_short() {
        let mut heap = VectorHeap::new(4);
        assert!(heap.try_alloc(10, Ptr::new(1)).is_some());
        assert!(heap.try_alloc(1, Ptr::new(2)).is_none());
    }

    #[test]
    fn compaction_slides_live_regions_over_freed_ones() {
        let mut heap = VectorHeap::new(200);
        let v1 = heap.try_alloc(77, Ptr::new(10)).expect("room");
        let v2 = heap.try_alloc(30, Ptr::new(11)).expect("room");
        let v3 = heap.try_alloc(140, Ptr::new(12)).expect("room");
        heap.set_byte(v3, 3, 7);
        heap.set_byte(v3, 131, 13);

        heap.release(v2).expect("valid");
        let mut moved = Vec::new();
        heap.compact(|owner, start| moved.push((owner, start)))
            .expect("consistent heap");

        assert_eq!(moved, vec![(Ptr::new(12), v2)]);
        assert_eq!(heap.byte(v2, 3), 7);
        assert_eq!(heap.byte(v2, 131), 13);
        assert_eq!(heap.free_ptr(), 17 + 29);

        heap.release(v1).expect("valid");
        moved.clear();
        heap.compact(|owner, start| moved.push((owner, start)))
            .expect("consistent heap");
        assert_eq!(moved, vec![(Ptr::new(12), 1)]);
        assert_eq!(heap.byte(1, 131), 13);

        heap.release(1).expect("valid");
        heap.compact(|_, _| panic!("nothing is live"))
            .expect("consistent heap");
        assert_eq!(heap.free_ptr(), 0);
    }

    #[test]
    fn releasing_outside_the_space_is_corruption() {
        let mut heap = VectorHeap::new(10);
        assert!(matches!(
            heap.release(0),
            Err(VmError::HeapCorruption { .. })
        ));
        assert!(matches!(
            heap.release(5),
            Err(VmError::HeapCorruption { .. })
        ));
    }
}
