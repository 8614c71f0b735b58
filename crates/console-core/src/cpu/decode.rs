//! Instruction decoder.
//!
//! Instructions are fixed-width 32-bit big-endian words:
//! bits 31..24 opcode, 23..20 `rd`, 19..16 `ra`, 15..0 immediate.
//! Decoding validates the encoding against the execution policy (register
//! count, coprocessor availability) so that execution never observes an
//! out-of-range field.

use thiserror::Error;

use super::ExecPolicy;

/// Instruction decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DecodeError {
    /// The opcode byte names no instruction.
    #[error("reserved opcode in instruction word {word:#010x}")]
    ReservedOpcode {
        /// Offending instruction word.
        word: u32,
    },
    /// A register field exceeds the profile's register count.
    #[error("register r{index} out of range in instruction word {word:#010x}")]
    RegisterOutOfRange {
        /// Offending register index.
        index: u8,
        /// Offending instruction word.
        word: u32,
    },
    /// A float instruction executed on a profile without a float unit.
    #[error("coprocessor unavailable for instruction word {word:#010x}")]
    CoprocessorUnavailable {
        /// Offending instruction word.
        word: u32,
    },
}

/// Fully classified operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Op {
    Nop,
    Halt,
    Iret,
    Movi,
    Movhi,
    Mov,
    Ldb,
    Ldh,
    Ldw,
    Stb,
    Sth,
    Stw,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Addi,
    Cmp,
    Beq,
    Bne,
    Blt,
    Bge,
    Jmp,
    Fadd,
    Fmul,
}

impl Op {
    /// Converts an opcode byte into an operation.
    #[must_use]
    pub const fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Halt),
            0x02 => Some(Self::Iret),
            0x10 => Some(Self::Movi),
            0x11 => Some(Self::Movhi),
            0x12 => Some(Self::Mov),
            0x20 => Some(Self::Ldb),
            0x21 => Some(Self::Ldh),
            0x22 => Some(Self::Ldw),
            0x28 => Some(Self::Stb),
            0x29 => Some(Self::Sth),
            0x2A => Some(Self::Stw),
            0x30 => Some(Self::Add),
            0x31 => Some(Self::Sub),
            0x32 => Some(Self::And),
            0x33 => Some(Self::Or),
            0x34 => Some(Self::Xor),
            0x35 => Some(Self::Shl),
            0x36 => Some(Self::Shr),
            0x37 => Some(Self::Addi),
            0x38 => Some(Self::Cmp),
            0x40 => Some(Self::Beq),
            0x41 => Some(Self::Bne),
            0x42 => Some(Self::Blt),
            0x43 => Some(Self::Bge),
            0x44 => Some(Self::Jmp),
            0x50 => Some(Self::Fadd),
            0x51 => Some(Self::Fmul),
            _ => None,
        }
    }

    /// The opcode byte this operation encodes as.
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Nop => 0x00,
            Self::Halt => 0x01,
            Self::Iret => 0x02,
            Self::Movi => 0x10,
            Self::Movhi => 0x11,
            Self::Mov => 0x12,
            Self::Ldb => 0x20,
            Self::Ldh => 0x21,
            Self::Ldw => 0x22,
            Self::Stb => 0x28,
            Self::Sth => 0x29,
            Self::Stw => 0x2A,
            Self::Add => 0x30,
            Self::Sub => 0x31,
            Self::And => 0x32,
            Self::Or => 0x33,
            Self::Xor => 0x34,
            Self::Shl => 0x35,
            Self::Shr => 0x36,
            Self::Addi => 0x37,
            Self::Cmp => 0x38,
            Self::Beq => 0x40,
            Self::Bne => 0x41,
            Self::Blt => 0x42,
            Self::Bge => 0x43,
            Self::Jmp => 0x44,
            Self::Fadd => 0x50,
            Self::Fmul => 0x51,
        }
    }

    /// Whether the `rd` field names a register this operation touches.
    #[must_use]
    pub const fn uses_rd(self) -> bool {
        !matches!(
            self,
            Self::Nop
                | Self::Halt
                | Self::Iret
                | Self::Jmp
                | Self::Beq
                | Self::Bne
                | Self::Blt
                | Self::Bge
        )
    }

    /// Whether the `ra` field names a register this operation touches.
    #[must_use]
    pub const fn uses_ra(self) -> bool {
        matches!(
            self,
            Self::Mov
                | Self::Ldb
                | Self::Ldh
                | Self::Ldw
                | Self::Stb
                | Self::Sth
                | Self::Stw
                | Self::Add
                | Self::Sub
                | Self::And
                | Self::Or
                | Self::Xor
                | Self::Shl
                | Self::Shr
                | Self::Cmp
                | Self::Jmp
                | Self::Fadd
                | Self::Fmul
        )
    }

    /// Whether this operation requires the float coprocessor.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Fadd | Self::Fmul)
    }
}

/// Decoded instruction with extracted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Classified operation.
    pub op: Op,
    /// Destination (and first operand) register field.
    pub rd: u8,
    /// Source register field.
    pub ra: u8,
    /// Raw 16-bit immediate field.
    pub imm: u16,
}

impl Instruction {
    /// Re-encodes this instruction back into a word.
    #[must_use]
    pub const fn encode(self) -> u32 {
        (self.op.opcode() as u32) << 24
            | ((self.rd & 0xF) as u32) << 20
            | ((self.ra & 0xF) as u32) << 16
            | self.imm as u32
    }
}

/// Decodes one instruction word under the given execution policy.
///
/// # Errors
///
/// Returns [`DecodeError`] for reserved opcodes, register fields outside the
/// profile's register count, and float instructions without a float unit.
pub fn decode(word: u32, policy: &ExecPolicy) -> Result<Instruction, DecodeError> {
    let opcode = (word >> 24) as u8;
    let op = Op::from_opcode(opcode).ok_or(DecodeError::ReservedOpcode { word })?;

    let rd = ((word >> 20) & 0xF) as u8;
    let ra = ((word >> 16) & 0xF) as u8;
    let imm = word as u16;

    if op.uses_rd() && usize::from(rd) >= policy.gpr_count {
        return Err(DecodeError::RegisterOutOfRange { index: rd, word });
    }
    if op.uses_ra() && usize::from(ra) >= policy.gpr_count {
        return Err(DecodeError::RegisterOutOfRange { index: ra, word });
    }
    if op.is_float() && policy.float.is_none() {
        return Err(DecodeError::CoprocessorUnavailable { word });
    }

    Ok(Instruction { op, rd, ra, imm })
}

#[cfg(test)]
mod tests {
    use super::{decode, DecodeError, Instruction, Op};
    use crate::cpu::ExecPolicy;
    use crate::cpu::coproc::RoundingMode;

    fn policy(gpr_count: usize) -> ExecPolicy {
        ExecPolicy {
            gpr_count,
            float: None,
            exception_vector: None,
            reset_vector: 0,
        }
    }

    fn word(op: Op, rd: u8, ra: u8, imm: u16) -> u32 {
        Instruction { op, rd, ra, imm }.encode()
    }

    #[test]
    fn every_opcode_round_trips() {
        for opcode in 0..=u8::MAX {
            if let Some(op) = Op::from_opcode(opcode) {
                assert_eq!(op.opcode(), opcode);
            }
        }
    }

    #[test]
    fn decode_extracts_fields() {
        let instr = decode(word(Op::Addi, 3, 0, 0xFFFE), &policy(8)).unwrap();
        assert_eq!(instr.op, Op::Addi);
        assert_eq!(instr.rd, 3);
        assert_eq!(instr.ra, 0);
        assert_eq!(instr.imm, 0xFFFE);
    }

    #[test]
    fn reserved_opcode_is_rejected() {
        let word = 0xFF00_0000;
        assert_eq!(
            decode(word, &policy(8)),
            Err(DecodeError::ReservedOpcode { word })
        );
    }

    #[test]
    fn register_fields_are_bounded_by_policy() {
        let narrow = policy(4);
        let bad_rd = word(Op::Movi, 4, 0, 1);
        assert_eq!(
            decode(bad_rd, &narrow),
            Err(DecodeError::RegisterOutOfRange {
                index: 4,
                word: bad_rd,
            })
        );

        let bad_ra = word(Op::Add, 0, 7, 0);
        assert_eq!(
            decode(bad_ra, &narrow),
            Err(DecodeError::RegisterOutOfRange {
                index: 7,
                word: bad_ra,
            })
        );

        // Unused fields are not register references.
        assert!(decode(word(Op::Beq, 0xF, 0xF, 4), &narrow).is_ok());
    }

    #[test]
    fn float_requires_coprocessor_capability() {
        let bare = policy(8);
        let fadd = word(Op::Fadd, 0, 1, 0);
        assert_eq!(
            decode(fadd, &bare),
            Err(DecodeError::CoprocessorUnavailable { word: fadd })
        );

        let mut float = policy(8);
        float.float = Some(RoundingMode::NearestEven);
        assert!(decode(fadd, &float).is_ok());
    }
}
