//! Mark & sweep collector for the RAM cell heap.
//!
//! Marking uses Deutsch-Schorr-Waite pointer reversal: the path back to the
//! root is threaded through the slots of the cells being visited, so the
//! collector needs no stack at all. The `flip` bit tells whether a cell on
//! that path is currently descending its left or its right slot.
//!
//! Sweeping walks the heap top-down and threads every unmarked cell onto the
//! free list, so the next allocations come out in ascending order.
use std::time::{Duration, Instant};

use log::debug;

use crate::{Cell, CellFlags, CellType, Heap, Ptr, VmError};

/// Consumers implement this to provide GC roots.
///
/// The globals are always roots and are not part of this.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(Ptr));
}

/// Root provider for a heap nobody points into yet.
pub struct NoRoots;

impl RootProvider for NoRoots {
    fn visit_roots(&mut self, _visitor: &mut dyn FnMut(Ptr)) {}
}

#[derive(Debug, Default, Clone)]
pub struct GcStats {
    pub collections: u64,
    /// Live cells found by the last cycle, globals excluded.
    pub last_marked: usize,
    pub last_freed: usize,
    pub total_pause: Duration,
    pub max_pause: Duration,
}

impl GcStats {
    fn record(&mut self, marked: usize, freed: usize, pause: Duration) {
        self.collections += 1;
        self.last_marked = marked;
        self.last_freed = freed;
        self.total_pause += pause;
        self.max_pause = self.max_pause.max(pause);
    }
}

const NONE: usize = Ptr::NIL.index();

impl Heap {
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Runs a full collection. Every cell not reachable from the globals or
    /// from `roots` ends up on the free list.
    pub fn collect(
        &mut self,
        roots: &mut dyn RootProvider,
    ) -> Result<(), VmError> {
        let start = Instant::now();

        let mut marked = 0;
        for i in 0..self.reserved() {
            marked += self.mark(Ptr::new(i));
        }
        roots.visit_roots(&mut |p| marked += self.mark(p));

        let freed = self.sweep()?;

        if self.debug {
            self.check_free_list(marked, freed)?;
        }

        let pause = start.elapsed();
        self.stats.record(marked, freed, pause);
        debug!(
            "gc #{}: {} live, {} freed, {:?}",
            self.stats.collections, marked, freed, pause
        );
        Ok(())
    }

    fn check_free_list(
        &self,
        marked: usize,
        freed: usize,
    ) -> Result<(), VmError> {
        if marked + freed != self.capacity() {
            return Err(VmError::HeapCorruption {
                reason: "live and free cells do not add up to the heap size",
            });
        }
        if self.free_count() != freed {
            return Err(VmError::HeapCorruption {
                reason: "free list length differs from the swept count",
            });
        }
        Ok(())
    }

    /// Marks everything reachable from `root`. Returns the number of newly
    /// marked cells outside the global area.
    pub(crate) fn mark(&mut self, root: Ptr) -> usize {
        let end = self.end();
        let reserved = self.reserved() as usize;
        let ram = &mut self.ram;

        let mut count = 0;
        let mut current = root.index();
        let mut prev = NONE;

        loop {
            // descend left links as far as they go
            while current < end && !ram[current].is_marked() {
                let cell = &mut ram[current];
                cell.flags.insert(CellFlags::MARK);
                if current >= reserved {
                    count += 1;
                }
                if cell.tag.has_left_link() {
                    let next = cell.left as usize;
                    cell.left = prev as u16;
                    prev = current;
                    current = next;
                }
            }

            // climb out of cells whose right side is done
            while prev < end && ram[prev].is_flipped() {
                let cell = &mut ram[prev];
                cell.flags.remove(CellFlags::FLIP);
                let next = cell.right as usize;
                cell.right = current as u16;
                current = prev;
                prev = next;
            }

            if prev >= end {
                break;
            }

            let cell = &mut ram[prev];
            if cell.tag.has_right_link() {
                // left side done, switch over to the right one
                let next = cell.left as usize;
                cell.left = current as u16;
                cell.flags.insert(CellFlags::FLIP);
                current = cell.right as usize;
                cell.right = next as u16;
            } else {
                while prev < end && !ram[prev].tag.has_right_link() {
                    let cell = &mut ram[prev];
                    let next = cell.left as usize;
                    cell.left = current as u16;
                    current = prev;
                    prev = next;
                }
            }
        }

        count
    }

    /// Rebuilds the free list from every unmarked cell and clears the marks.
    /// Returns the number of free cells.
    pub(crate) fn sweep(&mut self) -> Result<usize, VmError> {
        let reserved = self.reserved() as usize;
        let mut free = Ptr::NIL;
        let mut freed = 0;

        for i in (reserved..self.end()).rev() {
            let cell = self.ram[i];
            if cell.is_marked() {
                self.ram[i].flags.remove(CellFlags::MARK);
                continue;
            }
            if cell.is(CellType::Vector) {
                self.vectors.release(cell.right)?;
            }
            self.ram[i] = Cell::pair(Ptr::NIL, free);
            free = Ptr::new(i as u16);
            freed += 1;
        }

        for cell in &mut self.ram[..reserved] {
            cell.flags.remove(CellFlags::MARK);
        }

        self.free = free;
        Ok(freed)
    }
}
