//! External representation used by `print`.
use std::io::Write as _;

use crate::{CellKind, Ptr, VM, VmError, bignum};

/// Nesting past this depth prints as `...`.
const MAX_DEPTH: usize = 256;

/// Renders `p` the way `print` shows it, without the trailing newline.
///
/// Every heap cell visit spends one unit of a budget as large as the heap,
/// so circular structures end in `...` instead of looping.
pub fn render(vm: &VM, p: Ptr) -> Result<Vec<u8>, VmError> {
    let mut printer = Printer {
        vm,
        out: Vec::new(),
        budget: vm.heap.capacity() + vm.heap.rom_len(),
    };
    printer.show(p, 0)?;
    Ok(printer.out)
}

struct Printer<'a> {
    vm: &'a VM,
    out: Vec<u8>,
    budget: usize,
}

impl Printer<'_> {
    /// Takes one visit from the budget, or writes `...` when none is left.
    fn visit(&mut self, depth: usize) -> bool {
        if self.budget == 0 || depth >= MAX_DEPTH {
            self.out.extend_from_slice(b"...");
            return false;
        }
        self.budget -= 1;
        true
    }

    fn show(&mut self, p: Ptr, depth: usize) -> Result<(), VmError> {
        let vm = self.vm;
        match p {
            Ptr::FALSE => self.out.extend_from_slice(b"#f"),
            Ptr::TRUE => self.out.extend_from_slice(b"#t"),
            Ptr::NIL => self.out.extend_from_slice(b"()"),
            p if p.is_small_int() => {
                // writing into a Vec cannot fail
                write!(self.out, "{}", p.as_small_int().unwrap_or_default()).ok();
            }
            p => {
                let cell = vm
                    .heap
                    .cell(p)
                    .ok_or(VmError::type_fault("printable value", p))?;
                if !self.visit(depth) {
                    return Ok(());
                }
                match cell.kind() {
                    CellKind::Bignum { .. } => self.out.extend(decimal(vm, p)?.bytes()),
                    CellKind::Fixnum(v) => {
                        write!(self.out, "{v}").ok();
                    }
                    CellKind::Pair { car, cdr } => {
                        self.out.push(b'(');
                        self.show_list(car, cdr, depth + 1)?;
                    }
                    CellKind::Continuation { parent, closure } => {
                        self.out.push(b'(');
                        self.show_list(closure, parent, depth + 1)?;
                    }
                    CellKind::Closure { env, entry } => {
                        write!(self.out, "{{{entry:#06x} ").ok();
                        self.show(env, depth + 1)?;
                        self.out.push(b'}');
                    }
                    CellKind::String { chars } => self.show_chars(chars)?,
                    CellKind::CString { .. } => self.out.extend_from_slice(b"#<c_string>"),
                    CellKind::Vector { length, .. } => {
                        write!(self.out, "#<vector {length}>").ok();
                    }
                    CellKind::Symbol => self.out.extend_from_slice(b"#<symbol>"),
                }
            }
        }
        Ok(())
    }

    /// The rest of a list whose opening paren is already out.
    fn show_list(
        &mut self,
        mut car: Ptr,
        mut cdr: Ptr,
        depth: usize,
    ) -> Result<(), VmError> {
        loop {
            self.show(car, depth)?;
            if cdr == Ptr::NIL {
                self.out.push(b')');
                return Ok(());
            }
            match self.vm.heap.cell(cdr).map(|cell| cell.kind()) {
                Some(CellKind::Pair { car: a, cdr: d }) => {
                    self.out.push(b' ');
                    if !self.visit(0) {
                        self.out.push(b')');
                        return Ok(());
                    }
                    car = a;
                    cdr = d;
                }
                _ => {
                    self.out.extend_from_slice(b" . ");
                    self.show(cdr, depth)?;
                    self.out.push(b')');
                    return Ok(());
                }
            }
        }
    }

    fn show_chars(&mut self, mut chars: Ptr) -> Result<(), VmError> {
        while chars != Ptr::NIL {
            match self.vm.heap.cell(chars).map(|cell| cell.kind()) {
                Some(CellKind::Pair { car, cdr }) => {
                    if !self.visit(0) {
                        return Ok(());
                    }
                    self.out.push(self.vm.decode_int(car)? as u8);
                    chars = cdr;
                }
                _ => return Err(VmError::type_fault("character list", chars)),
            }
        }
        Ok(())
    }
}

/// Decimal digits of an integer of any length.
pub fn decimal(vm: &VM, p: Ptr) -> Result<String, VmError> {
    let (mut digits, negative) = bignum::digits(vm, p)?;
    if negative {
        // magnitude of a two's complement digit string
        let mut carry = true;
        for d in &mut digits {
            let (sum, overflow) = (!*d).overflowing_add(carry as u16);
            *d = sum;
            carry = overflow;
        }
        if carry || digits.is_empty() {
            digits.push(1);
        }
    }

    let mut chunks = Vec::new();
    while digits.iter().any(|&d| d != 0) {
        let mut rem = 0u32;
        for d in digits.iter_mut().rev() {
            let acc = (rem << 16) | *d as u32;
            *d = (acc / 10_000) as u16;
            rem = acc % 10_000;
        }
        chunks.push(rem);
    }

    let mut text = String::new();
    if negative {
        text.push('-');
    }
    match chunks.split_last() {
        None => text.push('0'),
        Some((top, rest)) => {
            text.push_str(&top.to_string());
            for chunk in rest.iter().rev() {
                text.push_str(&format!("{chunk:04}"));
            }
        }
    }
    Ok(text)
}
