use crate::{
    CELL_SIZE, Cell, Image, Ptr,
    bytecode::{Op, constant_index},
    image::{HEADER_SIZE, MARKERS},
    primitives::primitive,
};

/// A code position, possibly not yet known.
///
/// Created by [`ImageBuilder::new_label`] and placed with
/// [`ImageBuilder::bind`] or [`ImageBuilder::entry`]. Labels may be used
/// before and after they are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum Patch {
    /// `u16` absolute address.
    Absolute,
    /// `u8` offset from the following instruction, biased by 128.
    Relative,
    /// 4 bit forward distance in the low nibble of the opcode.
    Short,
}

#[derive(Debug)]
struct Fixup {
    /// Where the operand goes, relative to the code start.
    at: usize,
    label: Label,
    patch: Patch,
}

/// Assembles an [`Image`]: a constant pool of ROM cells followed by code.
///
/// Addresses in the image are absolute, and the code start moves with every
/// ROM cell, so label references are resolved in [`ImageBuilder::finish`].
/// Misuse, such as an unbound label or an operand out of range, panics.
pub struct ImageBuilder {
    global_count: u8,
    rom: Vec<Cell>,
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl ImageBuilder {
    pub fn new(global_count: u8) -> Self {
        Self {
            global_count,
            rom: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Current offset in the code area.
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Adds a ROM cell. Links in `cell` that point into ROM must name cells
    /// already added or added later at the expected index.
    pub fn rom(&mut self, cell: Cell) -> Ptr {
        assert!(self.rom.len() < u8::MAX as usize, "rom is full");
        self.rom.push(cell);
        Ptr::rom(self.rom.len() as u16 - 1)
    }

    /// A ROM integer: a small integer if it fits, else a digit chain.
    pub fn rom_integer(&mut self, value: i64) -> Ptr {
        if let Some(p) = i32::try_from(value).ok().and_then(Ptr::small_int) {
            return p;
        }
        let mut digits = Vec::new();
        let mut v = value;
        loop {
            digits.push(v as u16);
            v >>= 16;
            if v == 0 || v == -1 {
                break;
            }
        }
        let mut tail = if v == -1 { Ptr::NEG1 } else { Ptr::ZERO };
        for &d in digits.iter().rev() {
            if tail == Ptr::ZERO && d <= 255 {
                tail = Ptr::small_int(d as i32).unwrap_or(Ptr::ZERO);
            } else if tail == Ptr::NEG1 && d == u16::MAX {
                continue;
            } else {
                tail = self.rom(Cell::bignum(d, tail));
            }
        }
        tail
    }

    /// A ROM byte vector, stored as a list of small integers.
    pub fn rom_u8vector(&mut self, bytes: &[u8]) -> Ptr {
        let mut list = Ptr::NIL;
        for &b in bytes.iter().rev() {
            let byte = Ptr::small_int(b as i32).unwrap_or(Ptr::ZERO);
            list = self.rom(Cell::pair(byte, list));
        }
        let start = if list == Ptr::NIL { 0 } else { list.raw() };
        self.rom(Cell::vector(bytes.len() as u16, start))
    }

    // ── labels ─────────────────────────────────────────────────────

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Places `label` at the current offset.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0];
        assert!(slot.is_none(), "label {} bound twice", label.0);
        *slot = Some(self.code.len());
    }

    /// Binds `label` to a procedure taking exactly `params` arguments.
    pub fn entry(&mut self, label: Label, params: u8) {
        assert!(params < 0x80, "too many parameters");
        self.bind(label);
        self.emit_u8(params);
    }

    /// Binds `label` to a procedure taking `fixed` or more arguments, the
    /// surplus arriving as a list.
    pub fn entry_rest(&mut self, label: Label, fixed: u8) {
        assert!(fixed < 0x80, "too many parameters");
        self.bind(label);
        self.emit_u8(!fixed);
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.code.push(v);
    }

    fn emit_op(&mut self, op: Op, operand: u8) {
        self.code.push(op as u8 | operand);
    }

    fn emit_target(&mut self, op: Op, label: Label, patch: Patch) {
        self.emit_op(op, 0);
        let at = match patch {
            Patch::Short => self.code.len() - 1,
            Patch::Absolute | Patch::Relative => self.code.len(),
        };
        self.fixups.push(Fixup { at, label, patch });
        match patch {
            Patch::Absolute => self.code.extend_from_slice(&[0, 0]),
            Patch::Relative => self.code.push(0),
            Patch::Short => {}
        }
    }

    /// Raw byte, for data or deliberately broken code.
    pub fn byte(&mut self, v: u8) {
        self.emit_u8(v);
    }

    /// Pushes a constant, a small integer or a ROM cell, picking the short
    /// form when it fits.
    pub fn constant(&mut self, p: Ptr) {
        let index = constant_index(p)
            .unwrap_or_else(|| panic!("{p:?} has no constant index"));
        if index < 0x20 {
            self.emit_op(Op::LoadConstantShort, index as u8);
        } else {
            self.emit_op(Op::LoadConstant, (index >> 8) as u8);
            self.emit_u8(index as u8);
        }
    }

    /// Pushes an integer, spilling it to ROM when it is not a small one.
    pub fn int(&mut self, value: i64) {
        let p = self.rom_integer(value);
        self.constant(p);
    }

    pub fn load_stack(&mut self, depth: u8) {
        assert!(depth < 0x20, "stack depth {depth} too large");
        self.emit_op(Op::LoadStack, depth);
    }

    pub fn load_global(&mut self, index: u8) {
        if index < 0x10 {
            self.emit_op(Op::LoadGlobalShort, index);
        } else {
            self.emit_op(Op::LoadGlobal, 0);
            self.emit_u8(index);
        }
    }

    pub fn store_global(&mut self, index: u8) {
        if index < 0x10 {
            self.emit_op(Op::StoreGlobalShort, index);
        } else {
            self.emit_op(Op::StoreGlobal, 0);
            self.emit_u8(index);
        }
    }

    /// Calls the closure on top of the stack with the `argc` values below it.
    pub fn call_closure(&mut self, argc: u8) {
        assert!(argc < 0x10, "too many arguments");
        self.emit_op(Op::CallClosure, argc);
    }

    pub fn jump_closure(&mut self, argc: u8) {
        assert!(argc < 0x10, "too many arguments");
        self.emit_op(Op::JumpClosure, argc);
    }

    pub fn call(&mut self, label: Label) {
        self.emit_target(Op::Call, label, Patch::Absolute);
    }

    pub fn jump(&mut self, label: Label) {
        self.emit_target(Op::Jump, label, Patch::Absolute);
    }

    pub fn branch(&mut self, label: Label) {
        self.emit_target(Op::Branch, label, Patch::Absolute);
    }

    pub fn branch_if_false(&mut self, label: Label) {
        self.emit_target(Op::BranchIfFalse, label, Patch::Absolute);
    }

    /// Closes the value on top of the stack over the procedure at `label`.
    pub fn closure(&mut self, label: Label) {
        self.emit_target(Op::MakeClosure, label, Patch::Absolute);
    }

    pub fn call_relative(&mut self, label: Label) {
        self.emit_target(Op::CallRelative, label, Patch::Relative);
    }

    pub fn jump_relative(&mut self, label: Label) {
        self.emit_target(Op::JumpRelative, label, Patch::Relative);
    }

    pub fn branch_relative(&mut self, label: Label) {
        self.emit_target(Op::BranchRelative, label, Patch::Relative);
    }

    pub fn branch_relative_if_false(&mut self, label: Label) {
        self.emit_target(Op::BranchRelativeIfFalse, label, Patch::Relative);
    }

    pub fn closure_relative(&mut self, label: Label) {
        self.emit_target(Op::MakeClosureRelative, label, Patch::Relative);
    }

    /// Tail call to a procedure at most 15 bytes ahead.
    pub fn jump_short(&mut self, label: Label) {
        self.emit_target(Op::JumpShort, label, Patch::Short);
    }

    /// Branch at most 15 bytes ahead.
    pub fn branch_short_if_false(&mut self, label: Label) {
        self.emit_target(Op::BranchShortIfFalse, label, Patch::Short);
    }

    /// Calls a primitive by name.
    pub fn prim(&mut self, name: &str) {
        let prim = primitive(name).unwrap_or_else(|| panic!("no primitive named {name}"));
        self.emit_op(Op::Primitive, prim.index);
    }

    pub fn halt(&mut self) {
        self.prim("#%halt");
    }

    // ── finishing ──────────────────────────────────────────────────

    pub fn finish(mut self) -> Image {
        let code_start = HEADER_SIZE + self.rom.len() * CELL_SIZE;

        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.labels[fixup.label.0]
                .unwrap_or_else(|| panic!("label {} never bound", fixup.label.0));
            match fixup.patch {
                Patch::Absolute => {
                    let address = u16::try_from(code_start + target)
                        .unwrap_or_else(|_| panic!("address past 64 KiB"));
                    self.code[fixup.at..fixup.at + 2]
                        .copy_from_slice(&address.to_le_bytes());
                }
                Patch::Relative => {
                    let offset = target as isize - (fixup.at + 1) as isize + 128;
                    let offset = u8::try_from(offset).unwrap_or_else(|_| {
                        panic!("label {} out of relative range", fixup.label.0)
                    });
                    self.code[fixup.at] = offset;
                }
                Patch::Short => {
                    let distance = target as isize - (fixup.at + 1) as isize;
                    assert!(
                        (0..0x10).contains(&distance),
                        "label {} out of short range",
                        fixup.label.0
                    );
                    self.code[fixup.at] |= distance as u8;
                }
            }
        }

        let mut bytes = Vec::with_capacity(code_start + self.code.len());
        bytes.extend_from_slice(&MARKERS);
        bytes.push(self.rom.len() as u8);
        bytes.push(self.global_count);
        for cell in &self.rom {
            bytes.extend_from_slice(&cell.encode());
        }
        bytes.extend_from_slice(&self.code);
        Image::assembled(bytes)
    }
}
