//! Arbitrary precision integers.
//!
//! An integer is a chain of `Bignum` cells holding 16 bit digits, least
//! significant first. The chain ends in a small integer: `0` and `-1` stand
//! for an infinite run of zero or one bits, any other small integer is the
//! top digit. Small integers are therefore one digit integers themselves.
//!
//! Every routine returns a normalized value: the shortest chain, and a plain
//! small integer whenever the value fits one.
//!
//! Routines that allocate may collect. Their arguments have to be rooted by
//! the caller, and the result is unrooted once they return.
use std::cmp::Ordering;

use crate::{
    CellKind, CellType, Ptr, RootScope, VM, VmError, cell::SMALL_INT_START,
};

type Digit = u16;

const DIGIT_BITS: u16 = 16;
const TOP_BIT: Digit = 1 << (DIGIT_BITS - 1);

/// Small integer for a digit in `0..=255`.
#[inline(always)]
fn small(d: Digit) -> Ptr {
    debug_assert!(d <= 255);
    Ptr::new(SMALL_INT_START + d + 1)
}

#[inline(always)]
fn sign_of(negative: bool) -> Ptr {
    if negative { Ptr::NEG1 } else { Ptr::ZERO }
}

#[inline(always)]
fn invert(x: Ptr) -> Ptr {
    sign_of(x == Ptr::ZERO)
}

/// Everything above the lowest digit.
fn hi(vm: &VM, x: Ptr) -> Result<Ptr, VmError> {
    if x == Ptr::NEG1 {
        return Ok(Ptr::NEG1);
    }
    if x.is_small_int() {
        return Ok(Ptr::ZERO);
    }
    match vm.heap.cell(x) {
        Some(cell) if cell.is(CellType::Bignum) => Ok(cell.car()),
        _ => Err(VmError::type_fault("integer", x)),
    }
}

/// The lowest digit.
fn lo(vm: &VM, x: Ptr) -> Result<Digit, VmError> {
    if let Some(v) = x.as_small_int() {
        return Ok(v as Digit);
    }
    match vm.heap.cell(x) {
        Some(cell) if cell.is(CellType::Bignum) => Ok(cell.right),
        _ => Err(VmError::type_fault("integer", x)),
    }
}

/// Conses `d` onto the digit list in `slot`.
fn push_digit(
    s: &mut RootScope<'_>,
    slot: usize,
    d: Digit,
) -> Result<(), VmError> {
    let prefix = s.get(slot);
    let cell = s.new_bignum(d, prefix)?;
    s.set(slot, cell);
    Ok(())
}

/// Puts the digits of `prefix`, most significant first, in front of `n`.
/// Reuses the prefix cells, dropping the ones `n` can absorb.
fn norm(vm: &mut VM, mut prefix: Ptr, mut n: Ptr) -> Result<Ptr, VmError> {
    while prefix != Ptr::NIL {
        let d = lo(vm, prefix)?;
        let cell = prefix;
        prefix = hi(vm, cell)?;

        if n == Ptr::ZERO && d <= 255 {
            n = small(d);
            continue;
        }
        if n == Ptr::NEG1 && d == Digit::MAX {
            continue;
        }
        vm.heap.set_car(cell, n);
        n = cell;
    }
    Ok(n)
}

/// Whether `p` is a small integer or a well formed digit chain.
pub fn is_integer(vm: &VM, mut p: Ptr) -> bool {
    loop {
        if p.is_small_int() {
            return true;
        }
        match vm.heap.cell(p) {
            Some(cell) if cell.is(CellType::Bignum) => p = cell.car(),
            _ => return false,
        }
    }
}

pub fn negp(vm: &VM, mut x: Ptr) -> Result<bool, VmError> {
    loop {
        x = hi(vm, x)?;
        if x == Ptr::ZERO {
            return Ok(false);
        }
        if x == Ptr::NEG1 {
            return Ok(true);
        }
    }
}

/// Digits least significant first, and whether the infinite tail is ones.
pub fn digits(vm: &VM, mut x: Ptr) -> Result<(Vec<Digit>, bool), VmError> {
    let mut out = Vec::new();
    while !x.is_terminator() {
        out.push(lo(vm, x)?);
        x = hi(vm, x)?;
    }
    Ok((out, x == Ptr::NEG1))
}

/// Bit length of a nonnegative integer.
pub fn integer_length(vm: &VM, mut x: Ptr) -> Result<u16, VmError> {
    let mut length = 0;
    loop {
        let next = hi(vm, x)?;
        if next == Ptr::ZERO {
            break;
        }
        if next == Ptr::NEG1 {
            return Err(VmError::type_fault("non-negative integer", x));
        }
        length += DIGIT_BITS;
        x = next;
    }
    let d = lo(vm, x)?;
    Ok(length + (DIGIT_BITS - d.leading_zeros() as u16))
}

// ── Shifts ────────────────────────────────────────────────────────────

pub fn shr(vm: &mut VM, mut x: Ptr) -> Result<Ptr, VmError> {
    let mut s = vm.scope(1);
    loop {
        if x.is_terminator() {
            let prefix = s.get(0);
            return norm(&mut s, prefix, x);
        }
        let d = lo(&s, x)?;
        x = hi(&s, x)?;
        let carry = if lo(&s, x)? & 1 != 0 { TOP_BIT } else { 0 };
        push_digit(&mut s, 0, (d >> 1) | carry)?;
    }
}

pub fn shl(vm: &mut VM, mut x: Ptr) -> Result<Ptr, VmError> {
    let mut s = vm.scope(1);
    let mut negc = Ptr::ZERO;
    loop {
        if x == negc {
            let prefix = s.get(0);
            return norm(&mut s, prefix, x);
        }
        let d = lo(&s, x)?;
        x = hi(&s, x)?;
        let carry_in = (negc == Ptr::NEG1) as Digit;
        negc = sign_of(d & TOP_BIT != 0);
        push_digit(&mut s, 0, (d << 1) | carry_in)?;
    }
}

pub fn shift_left(vm: &mut VM, x: Ptr, mut n: u16) -> Result<Ptr, VmError> {
    if x == Ptr::ZERO {
        return Ok(x);
    }
    let mut s = vm.scope(1);
    s.set(0, x);
    while n % DIGIT_BITS != 0 {
        let v = s.get(0);
        let v = shl(&mut s, v)?;
        s.set(0, v);
        n -= 1;
    }
    while n > 0 {
        push_digit(&mut s, 0, 0)?;
        n -= DIGIT_BITS;
    }
    Ok(s.get(0))
}

// ── Arithmetic ────────────────────────────────────────────────────────

/// `n * x` for a single digit `n`.
pub fn scale(vm: &mut VM, n: Digit, mut x: Ptr) -> Result<Ptr, VmError> {
    if n == 0 || x == Ptr::ZERO {
        return Ok(Ptr::ZERO);
    }
    if n == 1 {
        return Ok(x);
    }

    let mut s = vm.scope(1);
    let mut carry: Digit = 0;
    loop {
        if x == Ptr::ZERO {
            let top = if carry <= 255 {
                small(carry)
            } else {
                s.new_bignum(carry, Ptr::ZERO)?
            };
            let prefix = s.get(0);
            return norm(&mut s, prefix, top);
        }
        if x == Ptr::NEG1 {
            carry = carry.wrapping_sub(n);
            let top = if carry == Digit::MAX {
                Ptr::NEG1
            } else {
                s.new_bignum(carry, Ptr::NEG1)?
            };
            let prefix = s.get(0);
            return norm(&mut s, prefix, top);
        }

        let m = lo(&s, x)? as u32 * n as u32 + carry as u32;
        x = hi(&s, x)?;
        carry = (m >> DIGIT_BITS) as Digit;
        push_digit(&mut s, 0, m as Digit)?;
    }
}

pub fn cmp(vm: &VM, mut x: Ptr, mut y: Ptr) -> Result<Ordering, VmError> {
    let mut result = Ordering::Equal;
    loop {
        if x.is_terminator() {
            if x != y {
                result = if negp(vm, y)? {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
            }
            return Ok(result);
        }
        if y.is_terminator() {
            return Ok(if negp(vm, x)? {
                Ordering::Less
            } else {
                Ordering::Greater
            });
        }

        let (dx, dy) = (lo(vm, x)?, lo(vm, y)?);
        x = hi(vm, x)?;
        y = hi(vm, y)?;
        if dx != dy {
            result = dx.cmp(&dy);
        }
    }
}

/// Adds one digit pair under the running carry. The carry is kept as the
/// sign terminator it is equivalent to, `ZERO` or `NEG1`.
#[inline(always)]
fn add_digits(dx: Digit, dy: Digit, negc: &mut Ptr) -> Digit {
    let mut sum = dx.wrapping_add(dy);
    if *negc == Ptr::ZERO {
        *negc = sign_of(sum < dy);
    } else {
        sum = sum.wrapping_add(1);
        *negc = sign_of(sum <= dy);
    }
    sum
}

pub fn add(vm: &mut VM, mut x: Ptr, mut y: Ptr) -> Result<Ptr, VmError> {
    let mut s = vm.scope(1);
    let mut negc = Ptr::ZERO;
    loop {
        if x == negc {
            let prefix = s.get(0);
            return norm(&mut s, prefix, y);
        }
        if y == negc {
            let prefix = s.get(0);
            return norm(&mut s, prefix, x);
        }
        let d = add_digits(lo(&s, x)?, lo(&s, y)?, &mut negc);
        x = hi(&s, x)?;
        y = hi(&s, y)?;
        push_digit(&mut s, 0, d)?;
    }
}

pub fn sub(vm: &mut VM, mut x: Ptr, mut y: Ptr) -> Result<Ptr, VmError> {
    let mut s = vm.scope(1);
    let mut negc = Ptr::NEG1;
    loop {
        if x == negc && y.is_terminator() {
            let prefix = s.get(0);
            return norm(&mut s, prefix, invert(y));
        }
        if y == invert(negc) {
            let prefix = s.get(0);
            return norm(&mut s, prefix, x);
        }
        let d = add_digits(lo(&s, x)?, !lo(&s, y)?, &mut negc);
        x = hi(&s, x)?;
        y = hi(&s, y)?;
        push_digit(&mut s, 0, d)?;
    }
}

/// `x * y` for a nonnegative `x`.
pub fn mulnonneg(vm: &mut VM, mut x: Ptr, y: Ptr) -> Result<Ptr, VmError> {
    if negp(vm, x)? {
        return Err(VmError::type_fault("non-negative integer", x));
    }

    // 0: finished low digits, 1: running sum, 2: partial product
    let mut s = vm.scope(3);
    let d = lo(&s, x)?;
    let sum = scale(&mut s, d, y)?;
    s.set(1, sum);

    loop {
        let sum = s.get(1);
        let d = lo(&s, sum)?;
        push_digit(&mut s, 0, d)?;
        let sum = hi(&s, s.get(1))?;
        s.set(1, sum);

        x = hi(&s, x)?;
        if x == Ptr::ZERO {
            break;
        }

        let d = lo(&s, x)?;
        let partial = scale(&mut s, d, y)?;
        s.set(2, partial);
        let (sum, partial) = (s.get(1), s.get(2));
        let sum = add(&mut s, sum, partial)?;
        s.set(1, sum);
    }

    let (prefix, sum) = (s.get(0), s.get(1));
    norm(&mut s, prefix, sum)
}

/// Quotient of two nonnegative integers, by restoring long division.
pub fn divnonneg(vm: &mut VM, x: Ptr, y: Ptr) -> Result<Ptr, VmError> {
    if y == Ptr::ZERO {
        return Err(VmError::DivideByZero);
    }
    for p in [x, y] {
        if negp(vm, p)? {
            return Err(VmError::type_fault("non-negative integer", p));
        }
    }

    // 0: quotient, 1: remainder, 2: shifted divisor
    let mut s = vm.scope(3);
    s.set(0, Ptr::ZERO);
    s.set(1, x);
    s.set(2, y);

    let lx = integer_length(&s, x)?;
    let ly = integer_length(&s, y)?;
    if lx >= ly {
        let mut shift = lx - ly;
        let divisor = shift_left(&mut s, y, shift)?;
        s.set(2, divisor);

        loop {
            let q = s.get(0);
            let q = shl(&mut s, q)?;
            s.set(0, q);

            let (r, divisor) = (s.get(1), s.get(2));
            if cmp(&s, r, divisor)? != Ordering::Less {
                let r = sub(&mut s, r, divisor)?;
                s.set(1, r);
                let q = s.get(0);
                let q = add(&mut s, Ptr::POS1, q)?;
                s.set(0, q);
            }

            let divisor = s.get(2);
            let divisor = shr(&mut s, divisor)?;
            s.set(2, divisor);

            if shift == 0 {
                break;
            }
            shift -= 1;
        }
    }
    Ok(s.get(0))
}

/// `x - y * (x / y)` for nonnegative operands.
pub fn remnonneg(vm: &mut VM, x: Ptr, y: Ptr) -> Result<Ptr, VmError> {
    if y == Ptr::ZERO {
        return Err(VmError::DivideByZero);
    }
    let mut s = vm.scope(1);
    let q = divnonneg(&mut s, x, y)?;
    s.set(0, q);
    let product = mulnonneg(&mut s, y, q)?;
    s.set(0, product);
    sub(&mut s, x, product)
}

// ── Bitwise ───────────────────────────────────────────────────────────

/// Applies `op` digit by digit until both operands are down to their sign
/// terminators, whose all-zero or all-one digits decide the result's sign.
fn bitwise(
    vm: &mut VM,
    mut x: Ptr,
    mut y: Ptr,
    op: fn(Digit, Digit) -> Digit,
) -> Result<Ptr, VmError> {
    let mut s = vm.scope(1);
    loop {
        let d = op(lo(&s, x)?, lo(&s, y)?);
        if x.is_terminator() && y.is_terminator() {
            let prefix = s.get(0);
            return norm(&mut s, prefix, sign_of(d != 0));
        }
        x = hi(&s, x)?;
        y = hi(&s, y)?;
        push_digit(&mut s, 0, d)?;
    }
}

pub fn bitwise_ior(vm: &mut VM, x: Ptr, y: Ptr) -> Result<Ptr, VmError> {
    bitwise(vm, x, y, |a, b| a | b)
}

pub fn bitwise_and(vm: &mut VM, x: Ptr, y: Ptr) -> Result<Ptr, VmError> {
    bitwise(vm, x, y, |a, b| a & b)
}

pub fn bitwise_xor(vm: &mut VM, x: Ptr, y: Ptr) -> Result<Ptr, VmError> {
    bitwise(vm, x, y, |a, b| a ^ b)
}

pub fn bitwise_not(vm: &mut VM, mut x: Ptr) -> Result<Ptr, VmError> {
    let mut s = vm.scope(1);
    loop {
        if x.is_terminator() {
            let prefix = s.get(0);
            return norm(&mut s, prefix, invert(x));
        }
        let d = !lo(&s, x)?;
        x = hi(&s, x)?;
        push_digit(&mut s, 0, d)?;
    }
}

// ── Conversions ───────────────────────────────────────────────────────

fn digits_to_i64(digits: &[Digit], negative: bool) -> Option<i64> {
    if digits.len() > 4 {
        return None;
    }
    let mut value: i128 = 0;
    for (i, &d) in digits.iter().enumerate() {
        value |= (d as i128) << (i * DIGIT_BITS as usize);
    }
    if negative {
        value -= 1i128 << (digits.len() * DIGIT_BITS as usize);
    }
    i64::try_from(value).ok()
}

impl VM {
    /// Interprets `p` as a machine integer. Booleans and `()` read as 0 or 1.
    pub fn decode_int(&self, p: Ptr) -> Result<i32, VmError> {
        match p {
            Ptr::FALSE | Ptr::NIL => return Ok(0),
            Ptr::TRUE => return Ok(1),
            _ => {}
        }
        if let Some(v) = p.as_small_int() {
            return Ok(v);
        }
        if let Some(CellKind::Fixnum(v)) = self.heap.cell(p).map(|c| c.kind()) {
            return Ok(v);
        }
        if !is_integer(self, p) {
            return Err(VmError::type_fault("integer", p));
        }

        let (digits, negative) = digits(self, p)?;
        digits_to_i64(&digits, negative)
            .and_then(|v| i32::try_from(v).ok())
            .ok_or(VmError::type_fault("int32", p))
    }

    /// A small integer if `v` fits one, a fresh normalized chain otherwise.
    pub fn encode_int(&mut self, v: i32) -> Result<Ptr, VmError> {
        if let Some(p) = Ptr::small_int(v) {
            return Ok(p);
        }
        let mut s = self.scope(1);
        let mut v = v;
        loop {
            push_digit(&mut s, 0, v as Digit)?;
            v >>= DIGIT_BITS;
            if v == 0 || v == -1 {
                break;
            }
        }
        let prefix = s.get(0);
        norm(&mut s, prefix, sign_of(v == -1))
    }
}
