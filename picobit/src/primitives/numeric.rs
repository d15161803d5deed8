use std::cmp::Ordering;

use super::{Step, expect_integer};
use crate::{Ptr, VM, VmError, bignum};

type Binary = fn(&mut VM, Ptr, Ptr) -> Result<Ptr, VmError>;

/// Applies `op` to `reg1` and `reg2`, leaving the result in `reg1`.
fn binary(vm: &mut VM, op: Binary) -> Result<Step, VmError> {
    let (x, y) = (vm.state.reg1, vm.state.reg2);
    expect_integer(vm, x)?;
    expect_integer(vm, y)?;
    vm.state.reg1 = op(vm, x, y)?;
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}

fn compare(vm: &mut VM, wanted: Ordering) -> Result<Step, VmError> {
    let (x, y) = (vm.state.reg1, vm.state.reg2);
    expect_integer(vm, x)?;
    expect_integer(vm, y)?;
    vm.state.reg1 = Ptr::from_bool(bignum::cmp(vm, x, y)? == wanted);
    vm.state.reg2 = Ptr::NIL;
    Ok(Step::Continue)
}

pub fn number_p(vm: &mut VM) -> Result<Step, VmError> {
    // the same test arithmetic applies to its operands
    vm.state.reg1 = Ptr::from_bool(bignum::is_integer(vm, vm.state.reg1));
    Ok(Step::Continue)
}

pub fn equal(vm: &mut VM) -> Result<Step, VmError> {
    compare(vm, Ordering::Equal)
}

pub fn lt(vm: &mut VM) -> Result<Step, VmError> {
    compare(vm, Ordering::Less)
}

pub fn gt(vm: &mut VM) -> Result<Step, VmError> {
    compare(vm, Ordering::Greater)
}

pub fn add(vm: &mut VM) -> Result<Step, VmError> {
    binary(vm, bignum::add)
}

pub fn sub(vm: &mut VM) -> Result<Step, VmError> {
    binary(vm, bignum::sub)
}

pub fn mul_non_neg(vm: &mut VM) -> Result<Step, VmError> {
    binary(vm, bignum::mulnonneg)
}

pub fn div_non_neg(vm: &mut VM) -> Result<Step, VmError> {
    binary(vm, bignum::divnonneg)
}

pub fn rem_non_neg(vm: &mut VM) -> Result<Step, VmError> {
    binary(vm, bignum::remnonneg)
}

pub fn bitwise_ior(vm: &mut VM) -> Result<Step, VmError> {
    binary(vm, bignum::bitwise_ior)
}

pub fn bitwise_xor(vm: &mut VM) -> Result<Step, VmError> {
    binary(vm, bignum::bitwise_xor)
}

pub fn bitwise_and(vm: &mut VM) -> Result<Step, VmError> {
    binary(vm, bignum::bitwise_and)
}

pub fn bitwise_not(vm: &mut VM) -> Result<Step, VmError> {
    let x = vm.state.reg1;
    expect_integer(vm, x)?;
    vm.state.reg1 = bignum::bitwise_not(vm, x)?;
    Ok(Step::Continue)
}

#[cfg(test)]
mod tests {
    use super::super::tests::{call, mk_vm};
    use crate::Cell;
    use super::*;

    fn int(vm: &mut VM, v: i32) -> Ptr {
        vm.encode_int(v).expect("room")
    }

    #[test]
    fn arithmetic_crosses_into_bignums() {
        let (mut vm, _) = mk_vm(b"");
        let big = int(&mut vm, 40_000);
        vm.state.reg4 = big;
        let sum = call(&mut vm, "#%+", &[big, big]).expect("integers");
        assert_eq!(vm.decode_int(sum), Ok(80_000));

        let small = call(&mut vm, "#%-", &[sum, sum]).expect("integers");
        assert_eq!(small, Ptr::ZERO);

        let two = int(&mut vm, 2);
        vm.state.reg4 = sum;
        let q = call(&mut vm, "#%div-non-neg", &[sum, two]).expect("integers");
        assert_eq!(vm.decode_int(q), Ok(40_000));
        let seven = int(&mut vm, 7);
        let r = call(&mut vm, "#%rem-non-neg", &[sum, seven]).expect("integers");
        assert_eq!(vm.decode_int(r), Ok(80_000 % 7));
    }

    #[test]
    fn comparisons_answer_booleans() {
        let (mut vm, _) = mk_vm(b"");
        let neg = int(&mut vm, -70_000);
        vm.state.reg4 = neg;
        assert_eq!(call(&mut vm, "<", &[neg, Ptr::ZERO]), Ok(Ptr::TRUE));
        assert_eq!(call(&mut vm, ">", &[neg, Ptr::ZERO]), Ok(Ptr::FALSE));
        assert_eq!(call(&mut vm, "=", &[neg, neg]), Ok(Ptr::TRUE));
        assert_eq!(call(&mut vm, "=", &[Ptr::POS1, Ptr::ZERO]), Ok(Ptr::FALSE));
    }

    #[test]
    fn non_integers_are_type_faults() {
        let (mut vm, _) = mk_vm(b"");
        assert_eq!(
            call(&mut vm, "#%+", &[Ptr::POS1, Ptr::TRUE]),
            Err(VmError::type_fault("integer", Ptr::TRUE))
        );
        assert!(call(&mut vm, "<", &[Ptr::NIL, Ptr::ZERO]).is_err());
        assert_eq!(call(&mut vm, "number?", &[Ptr::NIL]), Ok(Ptr::FALSE));
        assert_eq!(call(&mut vm, "number?", &[Ptr::NEG1]), Ok(Ptr::TRUE));
    }

    #[test]
    fn number_p_agrees_with_arithmetic() {
        let (mut vm, _) = mk_vm(b"");
        let big = vm.encode_int(1_000_000).expect("room");
        vm.state.reg4 = big;
        assert_eq!(call(&mut vm, "number?", &[big]), Ok(Ptr::TRUE));
        assert!(call(&mut vm, "#%+", &[big, Ptr::POS1]).is_ok());

        let fix = vm.new_cell(Cell::fixnum(70_000)).expect("room");
        vm.state.reg4 = fix;
        assert_eq!(call(&mut vm, "number?", &[fix]), Ok(Ptr::FALSE));
        assert_eq!(
            call(&mut vm, "#%+", &[fix, Ptr::POS1]),
            Err(VmError::type_fault("integer", fix))
        );
    }

    #[test]
    fn division_by_zero() {
        let (mut vm, _) = mk_vm(b"");
        assert_eq!(
            call(&mut vm, "#%div-non-neg", &[Ptr::POS1, Ptr::ZERO]),
            Err(VmError::DivideByZero)
        );
        assert_eq!(
            call(&mut vm, "#%rem-non-neg", &[Ptr::POS1, Ptr::ZERO]),
            Err(VmError::DivideByZero)
        );
    }

    #[test]
    fn bitwise_not_flips_the_sign() {
        let (mut vm, _) = mk_vm(b"");
        assert_eq!(call(&mut vm, "bitwise-not", &[Ptr::ZERO]), Ok(Ptr::NEG1));
        let x = int(&mut vm, 100_000);
        vm.state.reg4 = x;
        let y = call(&mut vm, "bitwise-not", &[x]).expect("integer");
        assert_eq!(vm.decode_int(y), Ok(!100_000));
    }
}
