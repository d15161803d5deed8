use super::Step;
use crate::{CellKind, CellType, Ptr, VM, VmError};

pub fn pair_p(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = Ptr::from_bool(vm.is(vm.state.reg1, CellType::Pair));
    Ok(Step::Continue)
}

pub fn cons(vm: &mut VM) -> Result<Step, VmError> {
    let (car, cdr) = (vm.state.reg1, vm.state.reg2);
    vm.state.reg1 = vm.new_pair(car, cdr)?;
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}

fn pair(vm: &VM, p: Ptr) -> Result<(Ptr, Ptr), VmError> {
    match vm.heap.expect(p, CellType::Pair)? {
        CellKind::Pair { car, cdr } => Ok((car, cdr)),
        _ => Err(VmError::type_fault("pair", p)),
    }
}

pub fn car(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = pair(vm, vm.state.reg1)?.0;
    Ok(Step::Continue)
}

pub fn cdr(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = pair(vm, vm.state.reg1)?.1;
    Ok(Step::Continue)
}

pub fn set_car(vm: &mut VM) -> Result<Step, VmError> {
    let value = vm.state.reg2;
    vm.heap.expect_ram(vm.state.reg1, CellType::Pair)?.left = value.raw();
    vm.state.reg1 = Ptr::NIL;
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}

pub fn set_cdr(vm: &mut VM) -> Result<Step, VmError> {
    let value = vm.state.reg2;
    vm.heap.expect_ram(vm.state.reg1, CellType::Pair)?.right = value.raw();
    vm.state.reg1 = Ptr::NIL;
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}

pub fn null_p(vm: &mut VM) -> Result<Step, VmError> {
    vm.state.reg1 = Ptr::from_bool(vm.state.reg1 == Ptr::NIL);
    Ok(Step::Continue)
}
