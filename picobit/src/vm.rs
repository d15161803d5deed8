//! Machine state: registers, the operand stack and the object constructors.
//!
//! The operand stack and the lexical frame are the same list, `env`. Pushing
//! conses onto it and popping takes cells back off it.
use log::info;

use crate::{
    Cell, CellType, Heap, HeapSettings, Host, Image, Ptr, RootProvider,
    VmError,
};

/// Settings fixed for the lifetime of a [`VM`].
#[derive(Debug, Clone, Default)]
pub struct VmSettings {
    pub heap: HeapSettings,
    /// Check heap invariants after every collection.
    pub debug: bool,
    /// Log every instruction at `trace` level.
    pub trace: bool,
}

/// The registers the collector treats as roots.
#[derive(Debug)]
pub struct VmState {
    pub env: Ptr,
    pub cont: Ptr,
    pub reg1: Ptr,
    pub reg2: Ptr,
    pub reg3: Ptr,
    pub reg4: Ptr,
    /// Slots of the live [`crate::RootScope`]s, innermost last.
    pub temps: Vec<Ptr>,
}

impl Default for VmState {
    fn default() -> Self {
        Self {
            env: Ptr::NIL,
            cont: Ptr::NIL,
            reg1: Ptr::NIL,
            reg2: Ptr::NIL,
            reg3: Ptr::NIL,
            reg4: Ptr::NIL,
            temps: Vec::new(),
        }
    }
}

impl RootProvider for VmState {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(Ptr)) {
        visitor(self.reg1);
        visitor(self.reg2);
        visitor(self.reg3);
        visitor(self.reg4);
        visitor(self.cont);
        visitor(self.env);
        for &temp in &self.temps {
            visitor(temp);
        }
    }
}

pub struct VM {
    pub heap: Heap,
    pub state: VmState,
    pub image: Image,
    /// Offset of the next instruction in `image`.
    pub pc: usize,
    /// Entry point of the closure being called.
    pub entry: usize,
    pub host: Box<dyn Host>,
    pub settings: VmSettings,
}

impl VM {
    pub fn new(
        image: Image,
        settings: VmSettings,
        host: Box<dyn Host>,
    ) -> Result<Self, VmError> {
        let heap = Heap::new(
            &settings.heap,
            image.rom_cells()?,
            image.global_count(),
            settings.debug,
        )?;
        let pc = image.code_start();
        info!(
            "vm: {} rom cells, {} globals, {} bytes of code",
            image.rom_count(),
            image.global_count(),
            image.len() - pc
        );
        Ok(Self {
            heap,
            state: VmState::default(),
            image,
            pc,
            entry: 0,
            host,
            settings,
        })
    }

    /// Forces a full collection.
    pub fn gc(&mut self) -> Result<(), VmError> {
        self.heap.collect(&mut self.state)
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// A fresh RAM cell. Any `Ptr` held outside the registers, the stack or
    /// a root scope may be stale afterwards.
    #[inline]
    pub fn alloc_cell(&mut self) -> Result<Ptr, VmError> {
        self.heap.alloc_cell(&mut self.state)
    }

    #[inline]
    pub fn new_cell(&mut self, cell: Cell) -> Result<Ptr, VmError> {
        let p = self.alloc_cell()?;
        *self.heap.ram_mut(p) = cell;
        Ok(p)
    }

    pub fn new_pair(&mut self, car: Ptr, cdr: Ptr) -> Result<Ptr, VmError> {
        self.new_cell(Cell::pair(car, cdr))
    }

    pub fn new_closure(
        &mut self,
        env: Ptr,
        entry: u16,
    ) -> Result<Ptr, VmError> {
        self.new_cell(Cell::closure(env, entry))
    }

    pub fn new_continuation(
        &mut self,
        parent: Ptr,
        closure: Ptr,
    ) -> Result<Ptr, VmError> {
        self.new_cell(Cell::continuation(parent, closure))
    }

    pub fn new_bignum(
        &mut self,
        digit: u16,
        next: Ptr,
    ) -> Result<Ptr, VmError> {
        self.new_cell(Cell::bignum(digit, next))
    }

    pub fn new_string(&mut self, chars: Ptr) -> Result<Ptr, VmError> {
        self.new_cell(Cell::string(chars))
    }

    /// A zero filled byte vector.
    pub fn new_vector(&mut self, length: u16) -> Result<Ptr, VmError> {
        let owner = self.new_pair(Ptr::NIL, Ptr::NIL)?;

        // the owner has to survive the collection a full vector space triggers
        let mut scope = self.scope(1);
        scope.set(0, owner);
        let vm = &mut *scope;
        let start = vm.heap.alloc_vector(length, owner, &mut vm.state)?;

        *vm.heap.ram_mut(owner) = Cell::vector(length, start);
        for i in 0..length as usize {
            vm.heap.set_vector_byte(start, i, 0);
        }
        Ok(owner)
    }

    // ── Operand stack ─────────────────────────────────────────────────

    pub fn push(&mut self, value: Ptr) -> Result<(), VmError> {
        let mut scope = self.scope(1);
        scope.set(0, value);
        let env = scope.state.env;
        let top = scope.new_pair(value, env)?;
        scope.state.env = top;
        Ok(())
    }

    /// Unlinks the top stack cell itself.
    pub fn tos(&mut self) -> Result<Ptr, VmError> {
        let top = self.state.env;
        if !self.heap.in_ram(top) {
            return Err(VmError::EnvironmentExhausted);
        }
        self.state.env = self.heap.cdr(top);
        Ok(top)
    }

    /// The top value; `()` if the stack is empty.
    pub fn pop(&mut self) -> Result<Ptr, VmError> {
        if self.state.env == Ptr::NIL {
            return Ok(Ptr::NIL);
        }
        let top = self.tos()?;
        Ok(self.heap.car(top))
    }

    /// Walks `depth` cells down the stack.
    pub fn peek(&self, depth: usize) -> Ptr {
        let mut p = self.state.env;
        for _ in 0..depth {
            if !self.heap.in_ram(p) {
                return Ptr::NIL;
            }
            p = self.heap.cdr(p);
        }
        if self.heap.in_ram(p) {
            self.heap.car(p)
        } else {
            Ptr::NIL
        }
    }

    pub fn stack_depth(&self) -> usize {
        let mut depth = 0;
        let mut p = self.state.env;
        while self.heap.in_ram(p) {
            depth += 1;
            p = self.heap.cdr(p);
        }
        depth
    }

    // ── Typed access ──────────────────────────────────────────────────

    #[inline]
    pub fn is(&self, p: Ptr, tag: CellType) -> bool {
        self.heap.is(p, tag)
    }

    /// `(entry, env)` of a RAM or ROM closure.
    pub fn closure_parts(&self, p: Ptr) -> Result<(usize, Ptr), VmError> {
        match self.heap.cell(p) {
            Some(cell) if cell.is(CellType::Closure) => {
                Ok((cell.right as usize, cell.car()))
            }
            _ => Err(VmError::type_fault("closure", p)),
        }
    }

    /// `(parent, closure)` of a continuation.
    pub fn continuation_parts(&self, p: Ptr) -> Result<(Ptr, Ptr), VmError> {
        match self.heap.cell(p) {
            Some(cell) if cell.is(CellType::Continuation) => {
                Ok((cell.car(), cell.cdr()))
            }
            _ => Err(VmError::type_fault("continuation", p)),
        }
    }
}
