//! Byte vectors. RAM vectors keep their bytes in vector space, ROM vectors
//! are a list of small integers starting at `start`.
use super::{Step, int_in};
use crate::{CellKind, CellType, Ptr, VM, VmError};

fn vector(vm: &VM, p: Ptr) -> Result<(u16, u16), VmError> {
    match vm.heap.expect(p, CellType::Vector)? {
        CellKind::Vector { length, start } => Ok((length, start)),
        _ => Err(VmError::type_fault("vector", p)),
    }
}

fn index(vm: &VM, p: Ptr, length: u16) -> Result<usize, VmError> {
    let index = vm.decode_int(p)?;
    if index < 0 || index >= length as i32 {
        return Err(VmError::VectorIndexOutOfRange { index, length });
    }
    Ok(index as usize)
}

pub fn u8vector_p(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = Ptr::from_bool(vm.is(vm.state.reg1, CellType::Vector));
    Ok(Step::Continue)
}

pub fn make_u8vector(vm: &mut VM) -> Result<Step, VmError> {
    let length = int_in(vm, vm.state.reg1, 0..=u16::MAX as i32, "#%make-u8vector")?;
    vm.state.reg1 = vm.new_vector(length as u16)?;
    Ok(Step::Continue)
}

pub fn u8vector_ref(vm: &mut VM) -> Result<Step, VmError> {
    let v = vm.state.reg1;
    let (length, start) = vector(vm, v)?;
    let i = index(vm, vm.state.reg2, length)?;

    vm.state.reg1 = if vm.heap.in_ram(v) {
        let byte = vm.heap.vector_byte(start, i);
        Ptr::small_int(byte as i32).unwrap_or(Ptr::ZERO)
    } else {
        let mut p = Ptr::new(start);
        for _ in 0..i {
            p = rom_pair(vm, p)?.1;
        }
        rom_pair(vm, p)?.0
    };
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}

fn rom_pair(vm: &VM, p: Ptr) -> Result<(Ptr, Ptr), VmError> {
    match vm.heap.expect(p, CellType::Pair) {
        Ok(CellKind::Pair { car, cdr }) => Ok((car, cdr)),
        _ => Err(VmError::HeapCorruption {
            reason: "rom vector shorter than its length",
        }),
    }
}

pub fn u8vector_set(vm: &mut VM) -> Result<Step, VmError> {
    let byte = int_in(vm, vm.state.reg3, 0..=255, "u8vector-set!")?;
    let cell = vm.heap.expect_ram(vm.state.reg1, CellType::Vector)?;
    let (length, start) = (cell.left, cell.right);
    let i = index(vm, vm.state.reg2, length)?;

    vm.heap.set_vector_byte(start, i, byte as u8);
    vm.state.reg1 = Ptr::NIL;
    vm.state.reg2 = Ptr::NIL;
    vm.state.reg3 = Ptr::NIL;
    Ok(Step::Continue)
}

pub fn u8vector_length(vm: &mut VM) -> Result<Step, VmError> {
    let (length, _) = vector(vm, vm.state.reg1)?;
    vm.state.reg1 = vm.encode_int(length as i32)?;
    Ok(Step::Continue)
}
