//! Built in procedures, called by the `PRIM` instructions.
//!
//! The interpreter pops a primitive's arguments into the registers, the last
//! argument in the highest one: `reg1` for arity 1, `reg1 reg2` for arity 2
//! and `reg1 reg2 reg3` for arity 3. A primitive leaves its result in `reg1`,
//! and the interpreter pushes it if the primitive has one.
use crate::{Ptr, VM, VmError, bignum};

pub mod control;
pub mod io;
pub mod list;
pub mod numeric;
pub mod util;
pub mod vector;

/// What the interpreter does after a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Halt,
}

pub type PrimitiveFn = fn(&mut VM) -> Result<Step, VmError>;

#[derive(Clone, Copy)]
pub struct Primitive {
    pub name: &'static str,
    pub arity: u8,
    /// Operand of the `PRIM` instruction.
    pub index: u8,
    /// Whether `reg1` is pushed afterwards.
    pub pushes: bool,
    pub function: PrimitiveFn,
}

impl Primitive {
    const fn new(
        name: &'static str,
        arity: u8,
        index: u8,
        pushes: bool,
        function: PrimitiveFn,
    ) -> Self {
        Self {
            name,
            arity,
            index,
            pushes,
            function,
        }
    }
}

impl std::fmt::Debug for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Primitive")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("index", &self.index)
            .field("pushes", &self.pushes)
            .finish()
    }
}

/// Every primitive, in `PRIM` operand order.
pub static PRIMITIVES: &[Primitive] = &[
    Primitive::new("#%halt", 0, 0, false, control::halt),
    Primitive::new("return", 1, 1, true, control::return_),
    Primitive::new("pop", 0, 2, false, control::pop),
    Primitive::new("get-cont", 0, 3, true, control::get_cont),
    Primitive::new("graft-to-cont", 2, 4, false, control::graft_to_cont),
    Primitive::new("return-to-cont", 2, 5, true, control::return_to_cont),
    Primitive::new("pair?", 1, 6, true, list::pair_p),
    Primitive::new("cons", 2, 7, true, list::cons),
    Primitive::new("car", 1, 8, true, list::car),
    Primitive::new("cdr", 1, 9, true, list::cdr),
    Primitive::new("set-car!", 2, 10, false, list::set_car),
    Primitive::new("set-cdr!", 2, 11, false, list::set_cdr),
    Primitive::new("null?", 1, 12, true, list::null_p),
    Primitive::new("number?", 1, 13, true, numeric::number_p),
    Primitive::new("=", 2, 14, true, numeric::equal),
    Primitive::new("#%+", 2, 15, true, numeric::add),
    Primitive::new("#%-", 2, 16, true, numeric::sub),
    Primitive::new("#%mul-non-neg", 2, 17, true, numeric::mul_non_neg),
    Primitive::new("#%div-non-neg", 2, 18, true, numeric::div_non_neg),
    Primitive::new("#%rem-non-neg", 2, 19, true, numeric::rem_non_neg),
    Primitive::new("<", 2, 20, true, numeric::lt),
    Primitive::new(">", 2, 21, true, numeric::gt),
    Primitive::new("bitwise-ior", 2, 22, true, numeric::bitwise_ior),
    Primitive::new("bitwise-xor", 2, 23, true, numeric::bitwise_xor),
    Primitive::new("bitwise-and", 2, 24, true, numeric::bitwise_and),
    Primitive::new("bitwise-not", 1, 25, true, numeric::bitwise_not),
    Primitive::new("eq?", 2, 26, true, util::eq_p),
    Primitive::new("not", 1, 27, true, util::not),
    Primitive::new("symbol?", 1, 28, true, util::symbol_p),
    Primitive::new("boolean?", 1, 29, true, util::boolean_p),
    Primitive::new("string?", 1, 30, true, util::string_p),
    Primitive::new("string->list", 1, 31, true, util::string_to_list),
    Primitive::new("list->string", 1, 32, true, util::list_to_string),
    Primitive::new("u8vector?", 1, 33, true, vector::u8vector_p),
    Primitive::new("#%make-u8vector", 1, 34, true, vector::make_u8vector),
    Primitive::new("u8vector-ref", 2, 35, true, vector::u8vector_ref),
    Primitive::new("u8vector-set!", 3, 36, false, vector::u8vector_set),
    Primitive::new("u8vector-length", 1, 37, true, vector::u8vector_length),
    Primitive::new("print", 1, 38, false, io::print),
    Primitive::new("clock", 0, 39, true, io::clock),
    Primitive::new("#%getchar-wait", 2, 40, true, io::getchar_wait),
    Primitive::new("#%putchar", 2, 41, false, io::putchar),
];

pub fn primitive(name: &str) -> Option<&'static Primitive> {
    PRIMITIVES.iter().find(|p| p.name == name)
}

/// Fails unless `p` is an integer.
pub(crate) fn expect_integer(vm: &VM, p: Ptr) -> Result<(), VmError> {
    if bignum::is_integer(vm, p) {
        Ok(())
    } else {
        Err(VmError::type_fault("integer", p))
    }
}

/// Decodes an argument that has to lie in `range`.
pub(crate) fn int_in(
    vm: &VM,
    p: Ptr,
    range: std::ops::RangeInclusive<i32>,
    primitive: &'static str,
) -> Result<i32, VmError> {
    let v = vm.decode_int(p)?;
    if range.contains(&v) {
        Ok(v)
    } else {
        Err(VmError::ArgumentOutOfRange { primitive })
    }
}
