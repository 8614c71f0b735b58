//! Property coverage for the stable public seams: instruction decoding,
//! frame-budget arithmetic, and the snapshot wire codec.

use console_core::{
    decode, ControllerPort, DeviceModel, ExecPolicy, FrameDriver, HaltCause, HardwareFault,
    IntervalTimer, MachineSnapshot, RegisterFile, SnapshotVersion,
};
use proptest::prelude::*;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

fn full_policy() -> ExecPolicy {
    ExecPolicy {
        gpr_count: 16,
        float: Some(console_core::RoundingMode::NearestEven),
        exception_vector: Some(0x100),
        reset_vector: 0,
    }
}

proptest! {
    /// Every 32-bit word either decodes or reports a structured error, and
    /// accepted words re-encode to the identical word.
    #[test]
    fn decode_is_total_and_encode_inverts_it(word in any::<u32>()) {
        let policy = full_policy();
        if let Ok(instr) = decode(word, &policy) {
            prop_assert_eq!(instr.encode(), word);
        }
    }

    /// Decoding under a narrow register file never accepts a register index
    /// at or beyond the profile's count.
    #[test]
    fn accepted_register_fields_respect_the_policy(
        word in any::<u32>(),
        gpr_count in 1_usize..=16,
    ) {
        let mut policy = full_policy();
        policy.gpr_count = gpr_count;
        if let Ok(instr) = decode(word, &policy) {
            if instr.op.uses_rd() {
                prop_assert!(usize::from(instr.rd) < gpr_count);
            }
            if instr.op.uses_ra() {
                prop_assert!(usize::from(instr.ra) < gpr_count);
            }
        }
    }

    /// Frame accounting holds for any overshoot pattern: each budget equals
    /// the nominal rate minus the previous overshoot, totals sum exactly,
    /// and the long-run pace never drifts from cycles-per-frame.
    #[test]
    fn frame_driver_carry_conserves_cycles(
        cycles_per_frame in 64_u64..10_000,
        overshoots in prop::collection::vec(0_u64..64, 1..50),
    ) {
        let mut driver = FrameDriver::new(cycles_per_frame);
        let mut expected_total = 0_u64;

        for (index, &overshoot) in overshoots.iter().enumerate() {
            let budget = driver.begin_frame();
            prop_assert_eq!(budget, cycles_per_frame - driver.carry());
            let executed = budget + overshoot;
            driver.finish_frame(executed);
            expected_total += executed;

            prop_assert_eq!(driver.carry(), overshoot);
            prop_assert_eq!(driver.total_cycles(), expected_total);
            prop_assert_eq!(driver.frame_index(), index as u64 + 1);
        }

        let frames = overshoots.len() as u64;
        prop_assert_eq!(
            driver.total_cycles(),
            frames * cycles_per_frame + driver.carry()
        );
    }

    /// The snapshot wire codec is lossless over arbitrary machine state.
    #[test]
    fn snapshot_wire_codec_round_trips(
        gprs in prop::array::uniform16(any::<u32>()),
        pc in any::<u32>(),
        flags in 0_u32..32,
        epc in any::<u32>(),
        cause in any::<u32>(),
        total_cycles in any::<u64>(),
        frame_index in any::<u64>(),
        carry in 0_u64..1024,
        irq_pending in any::<u16>(),
        ram in prop::collection::vec(any::<u8>(), 0..256),
        timer_reload in any::<u32>(),
        input_bits in any::<u32>(),
        in_handler in any::<bool>(),
        halted in any::<bool>(),
    ) {
        let mut regs = RegisterFile::new(pc);
        for (index, &value) in gprs.iter().enumerate() {
            regs.set_gpr(index as u8, value);
        }
        regs.flags = flags;
        regs.epc = epc;
        regs.cause = cause;

        let mut timer = IntervalTimer::new();
        timer.program(timer_reload, true, false);
        let mut pad = ControllerPort::new();
        pad.set_input(input_bits);

        let snapshot = MachineSnapshot {
            version: SnapshotVersion::CURRENT,
            profile_id: 0xCAFE,
            total_cycles,
            frame_index,
            carry,
            cpu: console_core::CpuSnapshot {
                regs,
                in_handler,
                halt: halted.then_some(HaltCause::HaltInstruction),
            },
            devices: vec![
                DeviceModel::Timer(timer),
                DeviceModel::Controller(pad),
            ],
            irq_pending,
            ram: ram.into_boxed_slice(),
        };

        let bytes = snapshot.to_bytes();
        let decoded = MachineSnapshot::from_bytes(&bytes).unwrap();
        prop_assert_eq!(decoded, snapshot);
    }
}

#[test]
fn fault_halt_causes_survive_the_wire() {
    let faults = [
        HardwareFault::Bus(console_core::BusError::Unmapped { addr: 0xDEAD_0000 }),
        HardwareFault::Bus(console_core::BusError::Misaligned {
            addr: 0x1001,
            width: console_core::AccessWidth::B4,
        }),
        HardwareFault::Decode(console_core::DecodeError::ReservedOpcode { word: 0xFF00_0001 }),
    ];

    for fault in faults {
        let snapshot = MachineSnapshot {
            version: SnapshotVersion::CURRENT,
            profile_id: 1,
            total_cycles: 0,
            frame_index: 0,
            carry: 0,
            cpu: console_core::CpuSnapshot {
                regs: RegisterFile::new(0),
                in_handler: false,
                halt: Some(HaltCause::Fault(fault)),
            },
            devices: Vec::new(),
            irq_pending: 0,
            ram: Box::new([0; 16]),
        };

        let decoded = MachineSnapshot::from_bytes(&snapshot.to_bytes()).unwrap();
        assert_eq!(decoded.cpu.halt, Some(HaltCause::Fault(fault)));
    }
}
