use super::Step;
use crate::{CellKind, CellType, Ptr, VM, VmError};

pub fn eq_p(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = Ptr::from_bool(vm.state.reg1 == vm.state.reg2);
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}

pub fn not(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = Ptr::from_bool(vm.state.reg1 == Ptr::FALSE);
    Ok(Step::Continue)
}

pub fn symbol_p(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = Ptr::from_bool(vm.is(vm.state.reg1, CellType::Symbol));
    Ok(Step::Continue)
}

pub fn boolean_p(vm: &mut VM) -> Result<Step, VmError> {
    let p = vm.state.reg1;
    vm.state.reg1 = Ptr::from_bool(p == Ptr::FALSE || p == Ptr::TRUE);
    Ok(Step::Continue)
}

pub fn string_p(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = Ptr::from_bool(vm.is(vm.state.reg1, CellType::String));
    Ok(Step::Continue)
}

/// The character list of a string, shared with the string.
pub fn string_to_list(vm: &mut VM) -> Result<Step, VmError> {
    let p = vm.state.reg1;
    let CellKind::String { chars } = vm.heap.expect(p, CellType::String)? else {
        return Err(VmError::type_fault("string", p));
    };
    vm.state.reg1 = chars;
    Ok(Step::Continue)
}

pub fn list_to_string(vm: &mut VM) -> Result<Step, VmError> {
    let chars = vm.state.reg1;
    vm.state.reg1 = vm.new_string(chars)?;
    Ok(Step::Continue)
}
