use super::Step;
use crate::{Ptr, VM, VmError};

pub fn halt(_vm: &mut VM) -> Result<Step, VmError> {
    Ok(Step::Halt)
}

/// Resumes the current continuation with `reg1`.
pub fn return_(vm: &mut VM) -> Result<Step, VmError> {
    resume(vm)?;
    Ok(Step::Continue)
}

pub fn pop(vm: &mut VM) -> Result<Step, VmError> {
    vm.pop()?;
    Ok(Step::Continue)
}

pub fn get_cont(vm: &mut VM) -> Result<Step, VmError> {
    let cont = vm.state.cont;
    vm.continuation_parts(cont)?;
    vm.state.reg1 = cont;
    Ok(Step::Continue)
}

/// Calls the thunk in `reg2` with `reg1` as its continuation.
pub fn graft_to_cont(vm: &mut VM) -> Result<Step, VmError> {
    vm.continuation_parts(vm.state.reg1)?;
    vm.state.cont = vm.state.reg1;

    let thunk = vm.state.reg2;
    vm.state.reg1 = thunk;
    vm.push(thunk)?;
    let argc = vm.prepare_arguments(0)?;
    vm.build_environment(argc)?;

    vm.state.env = vm.state.reg1;
    vm.pc = vm.entry;
    vm.state.reg1 = Ptr::NIL;
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}

/// Resumes the continuation in `reg1` with the value in `reg2`.
pub fn return_to_cont(vm: &mut VM) -> Result<Step, VmError> {
    vm.continuation_parts(vm.state.reg1)?;
    vm.state.cont = vm.state.reg1;
    vm.state.reg1 = vm.state.reg2;
    resume(vm)?;
    Ok(Step::Continue)
}

/// Pops `cont` and jumps into the closure it saved.
fn resume(vm: &mut VM) -> Result<(), VmError> {
    let (parent, closure) = vm.continuation_parts(vm.state.cont)?;
    let (entry, env) = vm.closure_parts(closure)?;
    vm.entry = entry;
    vm.state.env = env;
    vm.state.cont = parent;
    vm.state.reg2 = Ptr::NIL;
    vm.pc = entry;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::{call, mk_vm};
    use super::*;

    #[test]
    fn return_restores_the_saved_frame() {
        let (mut vm, _) = mk_vm(b"");
        let saved_env = vm.new_pair(Ptr::TRUE, Ptr::NIL).expect("room");
        vm.state.env = saved_env;
        let closure = vm.new_closure(saved_env, 0x0123).expect("room");
        vm.state.reg4 = closure;
        let cont = vm.new_continuation(Ptr::NIL, closure).expect("room");
        vm.state.cont = cont;
        vm.state.env = Ptr::NIL;

        let value = call(&mut vm, "return", &[Ptr::POS1]).expect("valid frame");
        assert_eq!(value, Ptr::POS1, "the value stays in reg1 for the push");
        assert_eq!(vm.pc, 0x0123);
        assert_eq!(vm.state.env, saved_env);
        assert_eq!(vm.state.cont, Ptr::NIL);
    }

    #[test]
    fn return_without_a_continuation_is_a_type_fault() {
        let (mut vm, _) = mk_vm(b"");
        let err = call(&mut vm, "return", &[Ptr::ZERO]).unwrap_err();
        assert_eq!(err, VmError::type_fault("continuation", Ptr::NIL));
    }

    #[test]
    fn get_cont_needs_a_continuation() {
        let (mut vm, _) = mk_vm(b"");
        assert!(call(&mut vm, "get-cont", &[]).is_err());
    }
}
