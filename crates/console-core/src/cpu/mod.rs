//! CPU core: fetch, decode, execute, commit.
//!
//! [`Cpu::step`] runs exactly one instruction (or one dispatch) and reports
//! what happened as a [`StepEvent`]. Faults follow the guest-visible
//! exception model: with an exception vector configured the fault becomes a
//! guest-level exception, a fault inside the handler (or without a vector)
//! latches the core halted. The frame driver treats a latched halt as final
//! for the rest of the run.

/// Optional floating-point coprocessor.
pub mod coproc;
/// Instruction decoder.
pub mod decode;
mod exec;
/// Architectural register file.
pub mod registers;

use thiserror::Error;

use crate::bus::{AccessWidth, BusError, MemoryBus};
use crate::device::DeviceRegistry;
use crate::profile::PlatformProfile;
use crate::timing::{cycle_cost, CycleCostKind};

use coproc::RoundingMode;
use decode::{decode, DecodeError};
use registers::{RegisterFile, FLAG_I};

/// Base cause code for interrupts; the device slot index is added to it.
pub const CAUSE_IRQ_BASE: u32 = 0x100;

/// Everything the execution pipeline needs to know about the platform,
/// extracted from the profile once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecPolicy {
    /// Decodable general-purpose register count.
    pub gpr_count: usize,
    /// Float rounding mode when the profile carries a float unit.
    pub float: Option<RoundingMode>,
    /// Guest exception/interrupt vector, if the platform has one.
    pub exception_vector: Option<u32>,
    /// Program counter value after reset.
    pub reset_vector: u32,
}

impl ExecPolicy {
    /// Extracts the policy from a validated profile.
    #[must_use]
    pub fn from_profile(profile: &PlatformProfile) -> Self {
        Self {
            gpr_count: profile.general_registers,
            float: profile.coproc.float_unit,
            exception_vector: profile.exception_vector,
            reset_vector: profile.reset_vector,
        }
    }
}

/// A fault raised by the hardware model while running guest code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HardwareFault {
    /// Memory bus fault.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Instruction decode fault.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl HardwareFault {
    /// Guest-visible cause code written to the cause register on dispatch.
    #[must_use]
    pub const fn cause_code(self) -> u32 {
        match self {
            Self::Bus(BusError::Unmapped { .. }) => 0x01,
            Self::Bus(BusError::Misaligned { .. }) => 0x02,
            Self::Bus(BusError::ReadOnly { .. }) => 0x03,
            Self::Bus(BusError::UnsupportedWidth { .. }) => 0x04,
            Self::Decode(DecodeError::ReservedOpcode { .. }) => 0x10,
            Self::Decode(DecodeError::RegisterOutOfRange { .. }) => 0x11,
            Self::Decode(DecodeError::CoprocessorUnavailable { .. }) => 0x12,
        }
    }
}

/// Why the core stopped executing for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HaltCause {
    /// The guest executed `HALT`.
    HaltInstruction,
    /// A fault could not be delivered to a guest handler.
    Fault(HardwareFault),
}

/// Outcome of one [`Cpu::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// An instruction retired normally.
    Retired {
        /// Program counter the instruction was fetched from.
        pc: u32,
        /// Cycles consumed.
        cycles: u64,
    },
    /// An interrupt was dispatched to the guest handler.
    Interrupt {
        /// Cause code delivered to the guest.
        cause: u32,
        /// Cycles consumed by the dispatch.
        cycles: u64,
    },
    /// A fault was dispatched to the guest exception handler.
    GuestFault {
        /// The fault that was delivered.
        fault: HardwareFault,
        /// Cycles consumed by the dispatch.
        cycles: u64,
    },
    /// The core is halted; no time passed.
    Halted {
        /// Why the core halted.
        cause: HaltCause,
    },
}

/// Serializable architectural CPU state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuSnapshot {
    /// Register file contents.
    pub regs: RegisterFile,
    /// Whether the guest was inside an exception/interrupt handler.
    pub in_handler: bool,
    /// Latched halt state, if any.
    pub halt: Option<HaltCause>,
}

/// The CPU core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    regs: RegisterFile,
    in_handler: bool,
    halt: Option<HaltCause>,
    policy: ExecPolicy,
}

impl Cpu {
    /// Creates a core in the post-reset state.
    #[must_use]
    pub fn new(policy: ExecPolicy) -> Self {
        Self {
            regs: RegisterFile::new(policy.reset_vector),
            in_handler: false,
            halt: None,
            policy,
        }
    }

    /// Architectural registers.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub(crate) fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    /// The execution policy this core was built with.
    #[must_use]
    pub const fn policy(&self) -> &ExecPolicy {
        &self.policy
    }

    /// Latched halt cause, if the core has stopped.
    #[must_use]
    pub const fn halted(&self) -> Option<HaltCause> {
        self.halt
    }

    /// Whether the guest is currently inside a handler.
    #[must_use]
    pub const fn in_handler(&self) -> bool {
        self.in_handler
    }

    /// Returns the core to the post-reset state.
    pub fn reset(&mut self) {
        self.regs = RegisterFile::new(self.policy.reset_vector);
        self.in_handler = false;
        self.halt = None;
    }

    /// Captures architectural state for a snapshot.
    #[must_use]
    pub fn capture(&self) -> CpuSnapshot {
        CpuSnapshot {
            regs: self.regs.clone(),
            in_handler: self.in_handler,
            halt: self.halt,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: &CpuSnapshot) {
        self.regs = snapshot.regs.clone();
        self.in_handler = snapshot.in_handler;
        self.halt = snapshot.halt;
    }

    fn dispatch(&mut self, vector: u32, cause: u32) {
        self.regs.epc = self.regs.pc;
        self.regs.cause = cause;
        self.regs.flags &= !FLAG_I;
        self.in_handler = true;
        self.regs.pc = vector;
    }

    fn latch_fault(&mut self, fault: HardwareFault) -> StepEvent {
        // Delivery to the guest handler; a second fault inside the handler
        // (or a platform without a vector) halts the core.
        if !self.in_handler {
            if let Some(vector) = self.policy.exception_vector {
                self.dispatch(vector, fault.cause_code());
                return StepEvent::GuestFault {
                    fault,
                    cycles: cycle_cost(CycleCostKind::FaultDispatch),
                };
            }
        }
        let cause = HaltCause::Fault(fault);
        self.halt = Some(cause);
        StepEvent::Halted { cause }
    }

    /// Runs one instruction, interrupt dispatch, or fault dispatch.
    ///
    /// Commits either all of the instruction's effects or none of them, so
    /// every reported fault is precise.
    pub fn step(&mut self, bus: &mut MemoryBus, devices: &mut DeviceRegistry) -> StepEvent {
        if let Some(cause) = self.halt {
            return StepEvent::Halted { cause };
        }

        if self.regs.interrupts_enabled() && !self.in_handler {
            if let Some(vector) = self.policy.exception_vector {
                if let Some(slot) = devices.take_interrupt() {
                    let cause = CAUSE_IRQ_BASE + slot as u32;
                    self.dispatch(vector, cause);
                    return StepEvent::Interrupt {
                        cause,
                        cycles: cycle_cost(CycleCostKind::InterruptDispatch),
                    };
                }
            }
        }

        let pc = self.regs.pc;
        let word = match bus.read(devices, pc, AccessWidth::B4) {
            Ok(word) => word as u32,
            Err(error) => return self.latch_fault(error.into()),
        };
        let instr = match decode(word, &self.policy) {
            Ok(instr) => instr,
            Err(error) => return self.latch_fault(error.into()),
        };
        let effects = match exec::execute(instr, &self.regs, bus, devices, &self.policy) {
            Ok(effects) => effects,
            Err(fault) => return self.latch_fault(fault),
        };
        if let Err(error) = effects.commit(&mut self.regs, bus, devices) {
            return self.latch_fault(error.into());
        }

        if effects.halt {
            self.halt = Some(HaltCause::HaltInstruction);
        }
        if effects.iret {
            self.in_handler = false;
        }
        StepEvent::Retired {
            pc,
            cycles: cycle_cost(effects.cost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::decode::{Instruction, Op};
    use super::{Cpu, ExecPolicy, HaltCause, HardwareFault, StepEvent, CAUSE_IRQ_BASE};
    use crate::bus::{AccessWidth, AddressSpace, BusError, MappedRange, MemoryBus, RangeHandler};
    use crate::device::{DeviceModel, DeviceRegistry, IntervalTimer};
    use crate::profile::AlignmentPolicy;

    const VECTOR: u32 = 0x0800;

    fn policy() -> ExecPolicy {
        ExecPolicy {
            gpr_count: 8,
            float: None,
            exception_vector: Some(VECTOR),
            reset_vector: 0,
        }
    }

    fn machine(program: &[Instruction]) -> (Cpu, MemoryBus, DeviceRegistry) {
        let mut rom = vec![0_u8; 0x1000];
        for (index, instr) in program.iter().enumerate() {
            rom[index * 4..index * 4 + 4].copy_from_slice(&instr.encode().to_be_bytes());
        }
        // The exception handler is a lone IRET.
        let iret = Instruction {
            op: Op::Iret,
            rd: 0,
            ra: 0,
            imm: 0,
        };
        rom[VECTOR as usize..VECTOR as usize + 4].copy_from_slice(&iret.encode().to_be_bytes());

        let space = AddressSpace::new(vec![
            MappedRange {
                start: 0x0000,
                length: 0x1000,
                handler: RangeHandler::Rom { base: 0 },
            },
            MappedRange {
                start: 0x1000,
                length: 0x1000,
                handler: RangeHandler::Ram { base: 0 },
            },
        ]);
        let bus = MemoryBus::new(
            space,
            0x1000,
            rom.into_boxed_slice(),
            AlignmentPolicy::Strict,
        );
        (Cpu::new(policy()), bus, DeviceRegistry::new())
    }

    fn instr(op: Op, rd: u8, ra: u8, imm: u16) -> Instruction {
        Instruction { op, rd, ra, imm }
    }

    #[test]
    fn retired_steps_advance_pc_and_charge_cycles() {
        let (mut cpu, mut bus, mut devices) = machine(&[
            instr(Op::Movi, 0, 0, 7),
            instr(Op::Addi, 0, 0, 1),
        ]);

        assert_eq!(
            cpu.step(&mut bus, &mut devices),
            StepEvent::Retired { pc: 0, cycles: 1 }
        );
        assert_eq!(
            cpu.step(&mut bus, &mut devices),
            StepEvent::Retired { pc: 4, cycles: 1 }
        );
        assert_eq!(cpu.registers().gpr(0), 8);
    }

    #[test]
    fn halt_latches_and_subsequent_steps_are_free() {
        let (mut cpu, mut bus, mut devices) = machine(&[instr(Op::Halt, 0, 0, 0)]);

        assert!(matches!(
            cpu.step(&mut bus, &mut devices),
            StepEvent::Retired { .. }
        ));
        assert_eq!(cpu.halted(), Some(HaltCause::HaltInstruction));
        assert_eq!(
            cpu.step(&mut bus, &mut devices),
            StepEvent::Halted {
                cause: HaltCause::HaltInstruction,
            }
        );
    }

    #[test]
    fn fault_dispatches_to_vector_with_cause() {
        // STW through r1 = 0: ROM is read-only.
        let (mut cpu, mut bus, mut devices) = machine(&[instr(Op::Stw, 0, 1, 0)]);

        let event = cpu.step(&mut bus, &mut devices);
        assert_eq!(
            event,
            StepEvent::GuestFault {
                fault: HardwareFault::Bus(BusError::ReadOnly { addr: 0 }),
                cycles: 4,
            }
        );
        assert_eq!(cpu.registers().pc, VECTOR);
        assert_eq!(cpu.registers().epc, 0);
        assert_eq!(cpu.registers().cause, 0x03);
        assert!(cpu.in_handler());
        assert!(!cpu.registers().interrupts_enabled());
    }

    #[test]
    fn fault_inside_handler_halts_the_core() {
        let (mut cpu, mut bus, mut devices) = machine(&[instr(Op::Stw, 0, 1, 0)]);

        // First fault enters the handler; corrupt the handler's pc so the
        // next fetch faults again.
        cpu.step(&mut bus, &mut devices);
        cpu.regs.pc = 0xFFFF_0000;

        let event = cpu.step(&mut bus, &mut devices);
        assert!(matches!(
            event,
            StepEvent::Halted {
                cause: HaltCause::Fault(HardwareFault::Bus(BusError::Unmapped { .. })),
            }
        ));
        assert!(cpu.halted().is_some());
    }

    #[test]
    fn without_vector_the_first_fault_halts() {
        let (_, mut bus, mut devices) = machine(&[instr(Op::Stw, 0, 1, 0)]);
        let mut cpu = Cpu::new(ExecPolicy {
            exception_vector: None,
            ..policy()
        });

        assert!(matches!(
            cpu.step(&mut bus, &mut devices),
            StepEvent::Halted {
                cause: HaltCause::Fault(_),
            }
        ));
    }

    #[test]
    fn interrupt_dispatch_and_iret_round_trip() {
        let (mut cpu, mut bus, mut devices) = machine(&[
            instr(Op::Nop, 0, 0, 0),
            instr(Op::Nop, 0, 0, 0),
        ]);
        let mut timer = IntervalTimer::new();
        timer.program(1, true, false);
        let slot = devices.register(DeviceModel::Timer(timer));
        devices.tick_all(1);

        let event = cpu.step(&mut bus, &mut devices);
        assert_eq!(
            event,
            StepEvent::Interrupt {
                cause: CAUSE_IRQ_BASE + slot as u32,
                cycles: 4,
            }
        );
        assert_eq!(cpu.registers().pc, VECTOR);
        assert!(cpu.in_handler());

        // Handler is a single IRET; control returns to the interrupted pc.
        assert!(matches!(
            cpu.step(&mut bus, &mut devices),
            StepEvent::Retired { pc: VECTOR, .. }
        ));
        assert!(!cpu.in_handler());
        assert_eq!(cpu.registers().pc, 0);
        assert!(cpu.registers().interrupts_enabled());
    }

    #[test]
    fn interrupts_are_masked_inside_handlers() {
        let (mut cpu, mut bus, mut devices) = machine(&[instr(Op::Nop, 0, 0, 0)]);
        let mut timer = IntervalTimer::new();
        timer.program(1, true, true);
        devices.register(DeviceModel::Timer(timer));
        devices.tick_all(1);

        // Enter the handler, then raise another line while inside it.
        cpu.step(&mut bus, &mut devices);
        devices.tick_all(1);

        assert!(matches!(
            cpu.step(&mut bus, &mut devices),
            StepEvent::Retired { pc: VECTOR, .. }
        ));
        // The pending line is delivered after IRET.
        assert!(matches!(
            cpu.step(&mut bus, &mut devices),
            StepEvent::Interrupt { .. }
        ));
    }

    #[test]
    fn reset_restores_the_post_reset_state() {
        let (mut cpu, mut bus, mut devices) = machine(&[instr(Op::Halt, 0, 0, 0)]);
        cpu.step(&mut bus, &mut devices);
        assert!(cpu.halted().is_some());

        cpu.reset();
        assert!(cpu.halted().is_none());
        assert_eq!(cpu.registers().pc, 0);
    }
}
