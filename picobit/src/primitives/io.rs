use super::{Step, int_in};
use crate::{Ptr, VM, VmError, printer};

pub fn print(vm: &mut VM) -> Result<Step, VmError> {
    let mut text = printer::render(vm, vm.state.reg1)?;
    text.push(b'\n');
    vm.host.write(&text);
    vm.state.reg1 = Ptr::NIL;
    Ok(Step::Continue)
}

/// Hundredths of a second since start.
pub fn clock(vm: &mut VM) -> Result<Step, VmError> {
    let ticks = vm.host.ticks();
    vm.state.reg1 = vm.encode_int(ticks as i32)?;
    Ok(Step::Continue)
}

/// Waits up to `reg1` ticks for a byte on port `reg2`; 0 if none came.
pub fn getchar_wait(vm: &mut VM) -> Result<Step, VmError> {
    let timeout = vm.decode_int(vm.state.reg1)?;
    int_in(vm, vm.state.reg2, 1..=3, "#%getchar-wait")?;
    vm.state.reg1 = Ptr::NIL;
    vm.state.reg2 = Ptr::NIL;

    let deadline = vm.host.ticks().wrapping_add(timeout.max(0) as u32);
    let byte = loop {
        if let Some(byte) = vm.host.read_byte() {
            break byte;
        }
        if vm.host.ticks() >= deadline {
            break 0;
        }
        std::hint::spin_loop();
    };
    vm.state.reg1 = Ptr::small_int(byte as i32).unwrap_or(Ptr::ZERO);
    Ok(Step::Continue)
}

pub fn putchar(vm: &mut VM) -> Result<Step, VmError> {
    let byte = int_in(vm, vm.state.reg1, i32::MIN..=255, "#%putchar")?;
    int_in(vm, vm.state.reg2, 1..=3, "#%putchar")?;
    vm.host.write(&[byte as u8]);
    vm.state.reg1 = Ptr::NIL;
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}
