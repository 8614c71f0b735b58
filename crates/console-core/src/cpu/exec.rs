//! Instruction execution with deferred commit.
//!
//! Execution is split into two phases: [`execute`] computes every side
//! effect of an instruction without touching architectural state, and
//! [`Effects::commit`] applies them. A fault in either phase therefore
//! leaves the machine exactly as it was before the instruction started,
//! which is what makes guest faults precise and snapshots trustworthy.

use crate::bus::{AccessWidth, BusError, MemoryBus};
use crate::device::DeviceRegistry;
use crate::timing::CycleCostKind;

use super::coproc::FloatUnit;
use super::decode::{DecodeError, Instruction, Op};
use super::registers::{RegisterFile, FLAG_C, FLAG_I, FLAG_N, FLAG_V, FLAG_Z};
use super::{ExecPolicy, HardwareFault};

/// Pending side effects of one executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Effects {
    pub next_pc: u32,
    pub dest: Option<(u8, u32)>,
    pub flags: Option<u32>,
    pub store: Option<(u32, AccessWidth, u64)>,
    pub halt: bool,
    pub iret: bool,
    pub cost: CycleCostKind,
}

impl Effects {
    fn fallthrough(pc: u32, cost: CycleCostKind) -> Self {
        Self {
            next_pc: pc.wrapping_add(4),
            dest: None,
            flags: None,
            store: None,
            halt: false,
            iret: false,
            cost,
        }
    }

    /// Applies the effects. The store lands first so a bus fault commits
    /// nothing at all.
    pub(super) fn commit(
        &self,
        regs: &mut RegisterFile,
        bus: &mut MemoryBus,
        devices: &mut DeviceRegistry,
    ) -> Result<(), BusError> {
        if let Some((addr, width, value)) = self.store {
            bus.write(devices, addr, width, value)?;
        }
        if let Some((index, value)) = self.dest {
            regs.set_gpr(index, value);
        }
        if let Some(flags) = self.flags {
            regs.flags = flags;
        }
        regs.pc = self.next_pc;
        Ok(())
    }
}

fn sext(imm: u16) -> u32 {
    imm as i16 as i32 as u32
}

fn compare_flags(lhs: u32, rhs: u32, carry_in: u32) -> u32 {
    let diff = lhs.wrapping_sub(rhs);
    let mut flags = carry_in & FLAG_I;
    if diff == 0 {
        flags |= FLAG_Z;
    }
    if (diff as i32) < 0 {
        flags |= FLAG_N;
    }
    if lhs < rhs {
        flags |= FLAG_C;
    }
    if ((lhs ^ rhs) & (lhs ^ diff)) >> 31 != 0 {
        flags |= FLAG_V;
    }
    flags
}

fn branch(pc: u32, imm: u16, taken: bool) -> Effects {
    if taken {
        let target = pc.wrapping_add(4).wrapping_add(sext(imm) << 2);
        let mut effects = Effects::fallthrough(pc, CycleCostKind::BranchTaken);
        effects.next_pc = target;
        effects
    } else {
        Effects::fallthrough(pc, CycleCostKind::BranchNotTaken)
    }
}

/// Computes the effects of one decoded instruction.
///
/// Loads read through the live bus (device reads may pop FIFOs), which is
/// why this phase already takes the registry mutably; stores are deferred to
/// commit.
pub(super) fn execute(
    instr: Instruction,
    regs: &RegisterFile,
    bus: &MemoryBus,
    devices: &mut DeviceRegistry,
    policy: &ExecPolicy,
) -> Result<Effects, HardwareFault> {
    let pc = regs.pc;
    let Instruction { op, rd, ra, imm } = instr;

    let effects = match op {
        Op::Nop => Effects::fallthrough(pc, CycleCostKind::Nop),
        Op::Halt => {
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Halt);
            effects.halt = true;
            effects
        }
        Op::Iret => {
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Iret);
            effects.next_pc = regs.epc;
            effects.flags = Some(regs.flags | FLAG_I);
            effects.iret = true;
            effects
        }
        Op::Movi => {
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Move);
            effects.dest = Some((rd, u32::from(imm)));
            effects
        }
        Op::Movhi => {
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Move);
            effects.dest = Some((rd, (regs.gpr(rd) & 0xFFFF) | (u32::from(imm) << 16)));
            effects
        }
        Op::Mov => {
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Move);
            effects.dest = Some((rd, regs.gpr(ra)));
            effects
        }
        Op::Ldb | Op::Ldh | Op::Ldw => {
            let width = match op {
                Op::Ldb => AccessWidth::B1,
                Op::Ldh => AccessWidth::B2,
                _ => AccessWidth::B4,
            };
            let addr = regs.gpr(ra).wrapping_add(sext(imm));
            let value = bus.read(devices, addr, width)?;
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Load);
            effects.dest = Some((rd, value as u32));
            effects
        }
        Op::Stb | Op::Sth | Op::Stw => {
            let width = match op {
                Op::Stb => AccessWidth::B1,
                Op::Sth => AccessWidth::B2,
                _ => AccessWidth::B4,
            };
            let addr = regs.gpr(ra).wrapping_add(sext(imm));
            let value = u64::from(regs.gpr(rd)) & width.value_mask();
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Store);
            effects.store = Some((addr, width, value));
            effects
        }
        Op::Add | Op::Sub | Op::And | Op::Or | Op::Xor | Op::Shl | Op::Shr | Op::Addi => {
            let lhs = regs.gpr(rd);
            let value = match op {
                Op::Add => lhs.wrapping_add(regs.gpr(ra)),
                Op::Sub => lhs.wrapping_sub(regs.gpr(ra)),
                Op::And => lhs & regs.gpr(ra),
                Op::Or => lhs | regs.gpr(ra),
                Op::Xor => lhs ^ regs.gpr(ra),
                Op::Shl => lhs << (regs.gpr(ra) & 31),
                Op::Shr => lhs >> (regs.gpr(ra) & 31),
                _ => lhs.wrapping_add(sext(imm)),
            };
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Alu);
            effects.dest = Some((rd, value));
            effects
        }
        Op::Cmp => {
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Alu);
            effects.flags = Some(compare_flags(regs.gpr(rd), regs.gpr(ra), regs.flags));
            effects
        }
        Op::Beq => branch(pc, imm, regs.flags & FLAG_Z != 0),
        Op::Bne => branch(pc, imm, regs.flags & FLAG_Z == 0),
        Op::Blt => branch(
            pc,
            imm,
            (regs.flags & FLAG_N != 0) != (regs.flags & FLAG_V != 0),
        ),
        Op::Bge => branch(
            pc,
            imm,
            (regs.flags & FLAG_N != 0) == (regs.flags & FLAG_V != 0),
        ),
        Op::Jmp => {
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Jump);
            effects.next_pc = regs.gpr(ra);
            effects
        }
        Op::Fadd | Op::Fmul => {
            let Some(mode) = policy.float else {
                return Err(DecodeError::CoprocessorUnavailable {
                    word: instr.encode(),
                }
                .into());
            };
            let unit = FloatUnit::new(mode);
            let lhs = regs.gpr(rd);
            let rhs = regs.gpr(ra);
            let value = if op == Op::Fadd {
                unit.add(lhs, rhs)
            } else {
                unit.mul(lhs, rhs)
            };
            let mut effects = Effects::fallthrough(pc, CycleCostKind::Float);
            effects.dest = Some((rd, value));
            effects
        }
    };
    Ok(effects)
}
