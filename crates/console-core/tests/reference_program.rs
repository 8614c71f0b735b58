//! End-to-end coverage of the canonical increment-loop scenario: a minimal
//! four-register platform running a counting loop, snapshotted mid-run and
//! rewound exactly.

use console_core::{
    AccessWidth, AdaptationPolicy, AlignmentPolicy, CoprocCapability, Instruction, Machine,
    MachineView, Op, PatchRequest, PatchTarget, PlatformProfile, RegionKind, RegionSpec,
    SnapshotError,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const PROFILE_ID: u32 = 0x4001;

fn minimal_profile() -> PlatformProfile {
    PlatformProfile {
        id: PROFILE_ID,
        regions: vec![
            RegionSpec {
                kind: RegionKind::Rom,
                start: 0x0000,
                length: 0x1000,
            },
            RegionSpec {
                kind: RegionKind::Ram,
                start: 0x0001_0000,
                length: 0x0001_0000, // 64 KiB
            },
        ],
        general_registers: 4,
        cycles_per_frame: 1000,
        alignment: AlignmentPolicy::Strict,
        exception_vector: None,
        reset_vector: 0,
        coproc: CoprocCapability::none(),
        rom_size: 0..=0x1000,
    }
}

fn instr(op: Op, rd: u8, ra: u8, imm: u16) -> Instruction {
    Instruction { op, rd, ra, imm }
}

/// `r0 += 1` forever: ADDI r0, 1; MOVI r1, 0; JMP r1.
fn increment_rom() -> Vec<u8> {
    let mut rom = Vec::new();
    for i in [
        instr(Op::Addi, 0, 0, 1),
        instr(Op::Movi, 1, 0, 0),
        instr(Op::Jmp, 0, 1, 0),
    ] {
        rom.extend_from_slice(&i.encode().to_be_bytes());
    }
    rom
}

#[test]
fn one_frame_yields_one_increment_per_loop_iteration() {
    let mut machine = Machine::new(minimal_profile(), &increment_rom()).unwrap();

    // Each iteration costs 4 cycles (ADDI 1, MOVI 1, JMP 2) and bumps r0
    // once, so the 1000-cycle budget lands exactly 250 increments.
    let report = machine.run_frame();
    assert_eq!(report.executed_cycles, 1000);
    assert_eq!(report.carry, 0);
    assert_eq!(machine.registers().gpr(0), 250);
    assert_eq!(report.instructions, 750);
}

#[test]
fn ten_frames_of_counting_are_exactly_reproducible() {
    let mut first = Machine::new(minimal_profile(), &increment_rom()).unwrap();
    let mut second = Machine::new(minimal_profile(), &increment_rom()).unwrap();

    first.run_frames(10);
    second.run_frames(10);

    assert!(first.registers().gpr(0) > 0);
    assert_eq!(first.registers().gpr(0), second.registers().gpr(0));
    assert_eq!(
        first.capture().unwrap().to_bytes(),
        second.capture().unwrap().to_bytes()
    );
}

struct Booster;

impl AdaptationPolicy for Booster {
    fn observe(&mut self, view: &MachineView<'_>) -> Vec<PatchRequest> {
        // Nudge the counter once, on the first observed boundary.
        if view.gpr(0).is_some_and(|r0| r0 < 0x0010_0000) {
            vec![PatchRequest {
                target: PatchTarget::Register { index: 0 },
                value: 0x0010_0000,
                apply_at_cycle: None,
            }]
        } else {
            Vec::new()
        }
    }
}

#[test]
fn snapshot_rewinds_across_divergent_frames() {
    let mut machine = Machine::new(minimal_profile(), &increment_rom()).unwrap();
    machine.run_frames(10);

    let snapshot = machine.capture().unwrap();
    let r0_at_capture = machine.registers().gpr(0);
    let cycles_at_capture = machine.total_cycles();

    // Diverge: an adaptation policy perturbs the counter, then ten more
    // frames run on the perturbed state.
    machine.attach_policy(Box::new(Booster)).unwrap();
    machine.run_frames(10);
    assert!(machine.registers().gpr(0) >= 0x0010_0000);

    // Restore rewinds registers, frame accounting, and cycle count.
    machine.detach_policy();
    machine.restore(&snapshot).unwrap();
    assert_eq!(machine.registers().gpr(0), r0_at_capture);
    assert_eq!(machine.total_cycles(), cycles_at_capture);
    assert_eq!(machine.frame_index(), 10);

    // Replay after restore matches an undisturbed run.
    let mut reference = Machine::new(minimal_profile(), &increment_rom()).unwrap();
    reference.run_frames(20);
    machine.run_frames(10);
    assert_eq!(machine.registers().gpr(0), reference.registers().gpr(0));
    assert_eq!(
        machine.capture().unwrap().to_bytes(),
        reference.capture().unwrap().to_bytes()
    );
}

#[test]
fn snapshot_blob_round_trips_through_the_wire_format() {
    let mut machine = Machine::new(minimal_profile(), &increment_rom()).unwrap();
    machine.run_frames(3);

    let snapshot = machine.capture().unwrap();
    let decoded = console_core::MachineSnapshot::from_bytes(&snapshot.to_bytes()).unwrap();
    assert_eq!(decoded, snapshot);

    machine.run_frames(2);
    machine.restore(&decoded).unwrap();
    assert_eq!(machine.frame_index(), 3);
}

#[test]
fn snapshots_from_other_profiles_are_refused() {
    let mut machine = Machine::new(minimal_profile(), &increment_rom()).unwrap();
    let mut other_profile = minimal_profile();
    other_profile.id = 0x4002;
    let other = Machine::new(other_profile, &increment_rom()).unwrap();

    let foreign = other.capture().unwrap();
    assert_eq!(
        machine.restore(&foreign),
        Err(SnapshotError::ProfileMismatch {
            expected: PROFILE_ID,
            found: 0x4002,
        })
    );
}

#[test]
fn counters_track_the_run() {
    let mut machine = Machine::new(minimal_profile(), &increment_rom()).unwrap();
    machine.run_frames(4);

    let counters = machine.counters();
    assert_eq!(counters.frames, 4);
    assert!(counters.instructions > 0);
    assert_eq!(counters.guest_exceptions, 0);

    let view = machine.view();
    assert_eq!(view.register_count(), 4);
    assert_eq!(view.gpr(4), None, "register 4 does not exist on this platform");
    assert_eq!(
        view.read(0x0001_0000, AccessWidth::B4).unwrap(),
        0,
        "ram starts zeroed"
    );
}
