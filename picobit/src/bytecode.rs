//! Instruction encoding.
//!
//! Most instructions are one byte: the high nibble selects the operation and
//! the low bits carry a small operand. The `0xB_` row holds the forms with
//! full operands, and the top quarter of the byte space calls primitives.
use std::fmt::{self, Write as _};

use crate::{Image, PRIMITIVES, Ptr, VmError, cell::ROM_START};

/// Opcode bytes. For the short forms this is the value of the high bits,
/// the operand sits in the low bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Push a constant.
    /// Operands: `index:u5` in the opcode, see [`constant`].
    LoadConstantShort = 0x00,

    /// Push the value `depth` cells down the stack, `()` past the bottom.
    /// Operands: `depth:u5` in the opcode.
    LoadStack = 0x20,

    /// Push a global. Operands: `index:u4` in the opcode.
    LoadGlobalShort = 0x40,

    /// Pop into a global. Operands: `index:u4` in the opcode.
    StoreGlobalShort = 0x50,

    /// Call the closure below `argc` arguments on the stack.
    /// Operands: `argc:u4` in the opcode.
    CallClosure = 0x60,

    /// Tail call the closure below `argc` arguments on the stack.
    /// Operands: `argc:u4` in the opcode.
    JumpClosure = 0x70,

    /// Tail call a procedure close ahead.
    /// Operands: `distance:u4` in the opcode, from the next instruction.
    JumpShort = 0x80,

    /// Pop, and skip ahead if the value is `#f`.
    /// Operands: `distance:u4` in the opcode, from the next instruction.
    BranchShortIfFalse = 0x90,

    /// Push a constant. Operands: `index:u12`, high nibble in the opcode.
    LoadConstant = 0xA0,

    /// Call a top level procedure. Operands: `address:u16`
    Call = 0xB0,
    /// Tail call a top level procedure. Operands: `address:u16`
    Jump = 0xB1,
    /// Operands: `address:u16`
    Branch = 0xB2,
    /// Pop, and branch if the value is `#f`. Operands: `address:u16`
    BranchIfFalse = 0xB3,
    /// Replace the top of stack, an environment, by a closure over it.
    /// Operands: `address:u16`
    MakeClosure = 0xB4,

    /// Relative forms of the five above.
    /// Operands: `offset:u8`, the address is `next + offset - 128`.
    CallRelative = 0xB5,
    JumpRelative = 0xB6,
    BranchRelative = 0xB7,
    BranchRelativeIfFalse = 0xB8,
    MakeClosureRelative = 0xB9,

    /// Operands: `index:u8`
    LoadGlobal = 0xBE,
    /// Operands: `index:u8`
    StoreGlobal = 0xBF,

    /// Call primitive `index`. Operands: `index:u6` in the opcode.
    Primitive = 0xC0,
}

impl Op {
    /// Splits an opcode byte into its operation and short operand.
    pub fn split(byte: u8) -> Option<(Op, u8)> {
        Some(match byte {
            0x00..=0x1F => (Op::LoadConstantShort, byte & 0x1F),
            0x20..=0x3F => (Op::LoadStack, byte & 0x1F),
            0x40..=0x4F => (Op::LoadGlobalShort, byte & 0x0F),
            0x50..=0x5F => (Op::StoreGlobalShort, byte & 0x0F),
            0x60..=0x6F => (Op::CallClosure, byte & 0x0F),
            0x70..=0x7F => (Op::JumpClosure, byte & 0x0F),
            0x80..=0x8F => (Op::JumpShort, byte & 0x0F),
            0x90..=0x9F => (Op::BranchShortIfFalse, byte & 0x0F),
            0xA0..=0xAF => (Op::LoadConstant, byte & 0x0F),
            0xB0 => (Op::Call, 0),
            0xB1 => (Op::Jump, 0),
            0xB2 => (Op::Branch, 0),
            0xB3 => (Op::BranchIfFalse, 0),
            0xB4 => (Op::MakeClosure, 0),
            0xB5 => (Op::CallRelative, 0),
            0xB6 => (Op::JumpRelative, 0),
            0xB7 => (Op::BranchRelative, 0),
            0xB8 => (Op::BranchRelativeIfFalse, 0),
            0xB9 => (Op::MakeClosureRelative, 0),
            0xBE => (Op::LoadGlobal, 0),
            0xBF => (Op::StoreGlobal, 0),
            0xC0..=0xFF => (Op::Primitive, byte & 0x3F),
            _ => return None,
        })
    }
}

/// Pointer named by a constant index: the three constants, then the small
/// integers, then the ROM cells.
pub const fn constant(index: u16) -> Ptr {
    if index < 3 {
        Ptr::new(Ptr::FALSE.raw() + index)
    } else if index < 260 {
        Ptr::new(Ptr::NEG1.raw() + (index - 3))
    } else {
        Ptr::new(ROM_START + (index - 260))
    }
}

/// Inverse of [`constant`].
pub fn constant_index(p: Ptr) -> Option<u16> {
    match p {
        Ptr::FALSE | Ptr::TRUE | Ptr::NIL => Some(p.raw() - Ptr::FALSE.raw()),
        p if p.is_small_int() => Some(p.raw() - Ptr::NEG1.raw() + 3),
        p if p.is_rom() && p.rom_index() < 0x1000 - 260 => {
            Some(p.rom_index() as u16 + 260)
        }
        _ => None,
    }
}

/// A decoded instruction, addresses resolved to absolute image offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Constant(Ptr),
    LoadStack { depth: u8 },
    LoadGlobal { index: u8 },
    StoreGlobal { index: u8 },
    CallClosure { argc: u8 },
    JumpClosure { argc: u8 },
    Call { target: usize },
    Jump { target: usize },
    Branch { target: usize },
    BranchIfFalse { target: usize },
    MakeClosure { entry: usize },
    Primitive { index: u8 },
}

/// Decodes the instruction at `pc`. Returns it with the offset of the next
/// one.
pub fn decode_at(
    bytes: &[u8],
    pc: usize,
) -> Result<(Instruction, usize), VmError> {
    let byte = *bytes
        .get(pc)
        .ok_or(VmError::ProgramCounterOutOfRange { pc })?;
    let (op, low) =
        Op::split(byte).ok_or(VmError::UnknownOpcode { opcode: byte, pc })?;

    let operand = |at: usize| {
        bytes
            .get(at)
            .copied()
            .ok_or(VmError::ProgramCounterOutOfRange { pc: at })
    };
    let absolute = || -> Result<(usize, usize), VmError> {
        let address = u16::from_le_bytes([operand(pc + 1)?, operand(pc + 2)?]);
        Ok((address as usize, pc + 3))
    };
    let relative = || -> Result<(usize, usize), VmError> {
        let next = pc + 2;
        let target = (next + operand(pc + 1)? as usize)
            .checked_sub(128)
            .ok_or(VmError::ProgramCounterOutOfRange { pc })?;
        Ok((target, next))
    };

    let next = pc + 1;
    let decoded = match op {
        Op::LoadConstantShort => (Instruction::Constant(constant(low as u16)), next),
        Op::LoadStack => (Instruction::LoadStack { depth: low }, next),
        Op::LoadGlobalShort => (Instruction::LoadGlobal { index: low }, next),
        Op::StoreGlobalShort => (Instruction::StoreGlobal { index: low }, next),
        Op::CallClosure => (Instruction::CallClosure { argc: low }, next),
        Op::JumpClosure => (Instruction::JumpClosure { argc: low }, next),
        Op::JumpShort => (
            Instruction::Jump {
                target: next + low as usize,
            },
            next,
        ),
        Op::BranchShortIfFalse => (
            Instruction::BranchIfFalse {
                target: next + low as usize,
            },
            next,
        ),
        Op::LoadConstant => {
            let index = ((low as u16) << 8) | operand(pc + 1)? as u16;
            (Instruction::Constant(constant(index)), pc + 2)
        }
        Op::Call | Op::CallRelative => {
            let (target, next) = if op == Op::Call { absolute()? } else { relative()? };
            (Instruction::Call { target }, next)
        }
        Op::Jump | Op::JumpRelative => {
            let (target, next) = if op == Op::Jump { absolute()? } else { relative()? };
            (Instruction::Jump { target }, next)
        }
        Op::Branch | Op::BranchRelative => {
            let (target, next) = if op == Op::Branch { absolute()? } else { relative()? };
            (Instruction::Branch { target }, next)
        }
        Op::BranchIfFalse | Op::BranchRelativeIfFalse => {
            let (target, next) = if op == Op::BranchIfFalse {
                absolute()?
            } else {
                relative()?
            };
            (Instruction::BranchIfFalse { target }, next)
        }
        Op::MakeClosure | Op::MakeClosureRelative => {
            let (entry, next) = if op == Op::MakeClosure {
                absolute()?
            } else {
                relative()?
            };
            (Instruction::MakeClosure { entry }, next)
        }
        Op::LoadGlobal => (
            Instruction::LoadGlobal {
                index: operand(pc + 1)?,
            },
            pc + 2,
        ),
        Op::StoreGlobal => (
            Instruction::StoreGlobal {
                index: operand(pc + 1)?,
            },
            pc + 2,
        ),
        Op::Primitive => (Instruction::Primitive { index: low }, next),
    };
    Ok(decoded)
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(p) => write!(f, "CONST {p:?}"),
            Self::LoadStack { depth } => write!(f, "LDSTK {depth}"),
            Self::LoadGlobal { index } => write!(f, "LD g{index}"),
            Self::StoreGlobal { index } => write!(f, "ST g{index}"),
            Self::CallClosure { argc } => write!(f, "CALLC {argc}"),
            Self::JumpClosure { argc } => write!(f, "JUMPC {argc}"),
            Self::Call { target } => write!(f, "CALL {target:#06x}"),
            Self::Jump { target } => write!(f, "JUMP {target:#06x}"),
            Self::Branch { target } => write!(f, "BR {target:#06x}"),
            Self::BranchIfFalse { target } => write!(f, "BRF {target:#06x}"),
            Self::MakeClosure { entry } => write!(f, "CLOS {entry:#06x}"),
            Self::Primitive { index } => match PRIMITIVES.get(*index as usize) {
                Some(prim) => write!(f, "PRIM {}", prim.name),
                None => write!(f, "PRIM #{index}"),
            },
        }
    }
}

/// Linear listing of the code area. Procedure descriptors are data and show
/// up as whatever they happen to decode to.
pub fn disassemble(image: &Image) -> String {
    let bytes = image.bytes();
    let mut out = String::new();
    let mut pc = image.code_start();
    while pc < bytes.len() {
        match decode_at(bytes, pc) {
            Ok((instruction, next)) => {
                let _ = writeln!(out, "{pc:#06x}  {instruction}");
                pc = next;
            }
            Err(_) => {
                let _ = writeln!(out, "{pc:#06x}  .byte {:#04x}", bytes[pc]);
                pc += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_index_space() {
        assert_eq!(constant(0), Ptr::FALSE);
        assert_eq!(constant(2), Ptr::NIL);
        assert_eq!(constant(3), Ptr::NEG1);
        assert_eq!(constant(4), Ptr::ZERO);
        assert_eq!(constant(259).as_small_int(), Some(255));
        assert_eq!(constant(260), Ptr::rom(0));

        for p in [Ptr::TRUE, Ptr::POS1, Ptr::rom(17)] {
            assert_eq!(constant_index(p).map(constant), Some(p));
        }
        assert_eq!(constant_index(Ptr::new(12)), None, "ram has no index");
    }

    #[test]
    fn short_forms_carry_their_operand() {
        let code = [0x05, 0x23, 0x4A, 0x5F, 0x62, 0x93, 0xC7];
        let expected = [
            Instruction::Constant(Ptr::POS1),
            Instruction::LoadStack { depth: 3 },
            Instruction::LoadGlobal { index: 10 },
            Instruction::StoreGlobal { index: 15 },
            Instruction::CallClosure { argc: 2 },
            Instruction::BranchIfFalse { target: 6 + 3 },
            Instruction::Primitive { index: 7 },
        ];
        let mut pc = 0;
        for want in expected {
            let (got, next) = decode_at(&code, pc).expect("valid code");
            assert_eq!(got, want, "at {pc}");
            pc = next;
        }
        assert_eq!(pc, code.len());
    }

    #[test]
    fn long_forms_resolve_addresses() {
        let code = [0xA1, 0x04, 0xB0, 0x34, 0x12, 0xB7, 0x7E, 0xBE, 0x20];
        assert_eq!(
            decode_at(&code, 0),
            Ok((Instruction::Constant(Ptr::rom(0)), 2))
        );
        assert_eq!(
            decode_at(&code, 2),
            Ok((Instruction::Call { target: 0x1234 }, 5))
        );
        // 7 + 0x7E - 128 = 5
        assert_eq!(
            decode_at(&code, 5),
            Ok((Instruction::Branch { target: 5 }, 7))
        );
        assert_eq!(
            decode_at(&code, 7),
            Ok((Instruction::LoadGlobal { index: 32 }, 9))
        );
    }

    #[test]
    fn holes_and_truncation_are_faults() {
        assert_eq!(
            decode_at(&[0xBB], 0),
            Err(VmError::UnknownOpcode {
                opcode: 0xBB,
                pc: 0
            })
        );
        assert_eq!(
            decode_at(&[0x00], 1),
            Err(VmError::ProgramCounterOutOfRange { pc: 1 })
        );
        assert_eq!(
            decode_at(&[0xB0, 0x01], 0),
            Err(VmError::ProgramCounterOutOfRange { pc: 2 })
        );
    }
}
