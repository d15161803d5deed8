//! RAM / ROM cell heap.
//!
//! RAM cells are handed out from a free list threaded through the `cdr` slot.
//! The first `reserved` cells are never allocated: they hold the globals,
//! two per cell. ROM cells come from the program image and are read-only.
use log::debug;

use crate::{
    Cell, CellKind, CellType, Class, Constant, Ptr, RootProvider, Space,
    VectorHeap, VmError, cell::ROM_START,
};

// ── Heap settings ─────────────────────────────────────────────────────

/// Sizes of the two managed spaces.
#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Number of RAM cells, globals included. Must stay below the ROM zone.
    pub ram_cells: usize,
    /// Number of cell sized units in the vector space.
    pub vector_units: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            ram_cells: 40_000,
            vector_units: 30_000,
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.ram_cells == 0 || self.vector_units == 0 {
            return Err("Sizes must be > 0");
        }
        if self.ram_cells >= ROM_START as usize {
            return Err("ram_cells must stay below the ROM zone (0xE000)");
        }
        if self.vector_units > u16::MAX as usize {
            return Err("vector_units must fit in 16 bits");
        }
        Ok(())
    }
}

// ── Heap ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Heap {
    pub(crate) ram: Vec<Cell>,
    rom: Vec<Cell>,
    pub(crate) vectors: VectorHeap,
    pub(crate) free: Ptr,
    reserved: u16,
    global_count: u8,
    pub(crate) debug: bool,
    pub(crate) stats: crate::GcStats,
}

impl Heap {
    pub fn new(
        settings: &HeapSettings,
        rom: Vec<Cell>,
        global_count: u8,
        debug: bool,
    ) -> Result<Self, VmError> {
        debug_assert!(settings.validate().is_ok(), "unchecked heap settings");

        let reserved = (global_count as u16).div_ceil(2);
        if reserved as usize >= settings.ram_cells {
            return Err(VmError::bad_image(format!(
                "{global_count} globals do not fit in {} cells",
                settings.ram_cells
            )));
        }

        let mut heap = Self {
            ram: vec![Cell::FREE; settings.ram_cells],
            rom,
            vectors: VectorHeap::new(settings.vector_units),
            free: Ptr::NIL,
            reserved,
            global_count,
            debug,
            stats: Default::default(),
        };
        heap.sweep()?;

        if heap.debug && heap.free_count() != heap.capacity() {
            return Err(VmError::HeapCorruption {
                reason: "initial free list does not cover the heap",
            });
        }
        debug!(
            "heap: {} cells ({} reserved), {} rom cells, {} vector units",
            heap.ram.len(),
            reserved,
            heap.rom.len(),
            heap.vectors.capacity()
        );
        Ok(heap)
    }

    /// One past the last RAM index.
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.ram.len()
    }

    #[inline(always)]
    pub fn reserved(&self) -> u16 {
        self.reserved
    }

    pub fn global_count(&self) -> u8 {
        self.global_count
    }

    /// Cells available to the allocator.
    pub fn capacity(&self) -> usize {
        self.ram.len() - self.reserved as usize
    }

    pub fn rom_len(&self) -> usize {
        self.rom.len()
    }

    #[inline(always)]
    pub fn in_ram(&self, p: Ptr) -> bool {
        p.index() < self.ram.len()
    }

    #[inline(always)]
    fn in_rom(&self, p: Ptr) -> bool {
        p.is_rom() && p.rom_index() < self.rom.len()
    }

    /// The RAM or ROM cell behind `p`.
    #[inline]
    pub fn cell(&self, p: Ptr) -> Option<&Cell> {
        if self.in_ram(p) {
            Some(&self.ram[p.index()])
        } else if self.in_rom(p) {
            Some(&self.rom[p.rom_index()])
        } else {
            None
        }
    }

    /// A RAM cell. Panics if `p` is not a RAM index.
    #[inline(always)]
    pub fn ram(&self, p: Ptr) -> &Cell {
        &self.ram[p.index()]
    }

    #[inline(always)]
    pub fn ram_mut(&mut self, p: Ptr) -> &mut Cell {
        &mut self.ram[p.index()]
    }

    #[inline]
    pub fn tag(&self, p: Ptr) -> Option<CellType> {
        self.cell(p).map(|cell| cell.tag)
    }

    #[inline]
    pub fn is(&self, p: Ptr, tag: CellType) -> bool {
        self.tag(p) == Some(tag)
    }

    pub fn classify(&self, p: Ptr) -> Class {
        match p {
            Ptr::FALSE => Class::Const(Constant::False),
            Ptr::TRUE => Class::Const(Constant::True),
            Ptr::NIL => Class::Const(Constant::Nil),
            p if p.is_small_int() => {
                Class::SmallInt(p.as_small_int().unwrap_or_default() as i16)
            }
            p if self.in_ram(p) => Class::Ram(self.ram(p).tag),
            p if self.in_rom(p) => Class::Rom(self.rom[p.rom_index()].tag),
            _ => Class::Unmapped,
        }
    }

    /// Typed view of the RAM or ROM cell behind `p`, if it has tag `tag`.
    pub fn expect(
        &self,
        p: Ptr,
        tag: CellType,
    ) -> Result<CellKind, VmError> {
        match self.cell(p) {
            Some(cell) if cell.is(tag) => Ok(cell.kind()),
            _ => Err(VmError::type_fault(tag.name(), p)),
        }
    }

    /// Like [`Heap::expect`] but rejects ROM, for mutation.
    pub fn expect_ram(
        &mut self,
        p: Ptr,
        tag: CellType,
    ) -> Result<&mut Cell, VmError> {
        if self.in_ram(p) && p.raw() >= self.reserved {
            let cell = &mut self.ram[p.index()];
            if cell.is(tag) {
                return Ok(cell);
            }
        }
        Err(VmError::type_fault(tag.name(), p))
    }

    #[inline(always)]
    pub fn car(&self, p: Ptr) -> Ptr {
        self.ram(p).car()
    }

    #[inline(always)]
    pub fn cdr(&self, p: Ptr) -> Ptr {
        self.ram(p).cdr()
    }

    #[inline(always)]
    pub fn set_car(&mut self, p: Ptr, value: Ptr) {
        self.ram_mut(p).left = value.raw();
    }

    #[inline(always)]
    pub fn set_cdr(&mut self, p: Ptr, value: Ptr) {
        self.ram_mut(p).right = value.raw();
    }

    // ── Globals ───────────────────────────────────────────────────────

    /// Odd globals live in the car of cell `i >> 1`, even ones in the cdr.
    #[inline]
    pub fn global(&self, index: u8) -> Ptr {
        let cell = Ptr::new(index as u16 >> 1);
        if index & 1 == 1 {
            self.car(cell)
        } else {
            self.cdr(cell)
        }
    }

    #[inline]
    pub fn set_global(&mut self, index: u8, value: Ptr) {
        let cell = Ptr::new(index as u16 >> 1);
        if index & 1 == 1 {
            self.set_car(cell, value);
        } else {
            self.set_cdr(cell, value);
        }
    }

    fn check_global(&self, index: u8) -> Result<(), VmError> {
        if (index as u16 >> 1) < self.reserved {
            Ok(())
        } else {
            Err(VmError::bad_image(format!(
                "global {index} outside the {} declared",
                self.global_count
            )))
        }
    }

    pub fn load_global(&self, index: u8) -> Result<Ptr, VmError> {
        self.check_global(index)?;
        Ok(self.global(index))
    }

    pub fn store_global(
        &mut self,
        index: u8,
        value: Ptr,
    ) -> Result<(), VmError> {
        self.check_global(index)?;
        self.set_global(index, value);
        Ok(())
    }

    // ── Cell allocation ───────────────────────────────────────────────

    /// Pops the free list, collecting once if it is empty.
    ///
    /// The returned cell still holds stale contents; the caller overwrites it
    /// before the next allocation.
    pub fn alloc_cell(
        &mut self,
        roots: &mut dyn RootProvider,
    ) -> Result<Ptr, VmError> {
        if self.free == Ptr::NIL {
            self.allocate_slow(roots)?;
        }
        let p = self.free;
        self.free = self.cdr(p);
        Ok(p)
    }

    #[cold]
    #[inline(never)]
    fn allocate_slow(
        &mut self,
        roots: &mut dyn RootProvider,
    ) -> Result<(), VmError> {
        self.collect(roots)?;
        if self.free == Ptr::NIL {
            return Err(VmError::MemoryExhausted { space: Space::Cells });
        }
        Ok(())
    }

    /// Returns `p` to the free list right away.
    ///
    /// `p` must be unreachable from every root; nothing checks this outside
    /// of debug mode.
    pub fn free_cell(&mut self, p: Ptr) -> Result<(), VmError> {
        if self.debug && (!self.in_ram(p) || p.raw() < self.reserved) {
            return Err(VmError::HeapCorruption {
                reason: "freeing a cell outside the allocatable heap",
            });
        }
        let free = self.free;
        let cell = self.ram_mut(p);
        *cell = Cell::pair(Ptr::NIL, free);
        self.free = p;
        Ok(())
    }

    /// Walks the free list.
    pub fn free_count(&self) -> usize {
        let mut count = 0;
        let mut p = self.free;
        while p != Ptr::NIL {
            count += 1;
            p = self.cdr(p);
        }
        count
    }

    // ── Vector allocation ─────────────────────────────────────────────

    /// Reserves vector space for `length` bytes owned by `owner` and returns
    /// the payload offset. `owner` must be rooted.
    pub fn alloc_vector(
        &mut self,
        length: u16,
        owner: Ptr,
        roots: &mut dyn RootProvider,
    ) -> Result<u16, VmError> {
        if let Some(start) = self.vectors.try_alloc(length, owner) {
            return Ok(start);
        }

        debug!("vector space full, collecting before compaction");
        self.collect(roots)?;
        self.compact_vector_space()?;

        self.vectors
            .try_alloc(length, owner)
            .ok_or(VmError::MemoryExhausted {
                space: Space::Vectors,
            })
    }

    pub fn free_vector(&mut self, start: u16) -> Result<(), VmError> {
        self.vectors.release(start)
    }

    pub fn compact_vector_space(&mut self) -> Result<(), VmError> {
        let ram = &mut self.ram;
        self.vectors.compact(|owner, start| {
            ram[owner.index()].right = start;
        })
    }

    pub fn vectors(&self) -> &VectorHeap {
        &self.vectors
    }

    #[inline]
    pub fn vector_byte(&self, start: u16, index: usize) -> u8 {
        self.vectors.byte(start, index)
    }

    #[inline]
    pub fn set_vector_byte(&mut self, start: u16, index: usize, value: u8) {
        self.vectors.set_byte(start, index, value);
    }
}
