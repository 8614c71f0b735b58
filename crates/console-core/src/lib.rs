//! Profile-driven game-console emulation core.
//!
//! A [`Machine`] is built from a [`PlatformProfile`] (address map, register
//! count, timing constants, coprocessor capabilities) and a ROM image, and
//! is driven frame by frame: each [`Machine::run_frame`] executes a fixed
//! cycle budget with devices ticking in lockstep, then performs the boundary
//! work of adaptation-policy observation and patch application before handing
//! the frame outputs to the host. Execution is fully deterministic: the same
//! profile, ROM, and inputs produce bit-identical state on every run, and
//! frame-boundary snapshots rewind it exactly.

/// Platform profiles describing emulated hardware targets.
pub mod profile;
pub use profile::{
    AlignmentPolicy, CoprocCapability, PlatformProfile, ProfileError, RegionKind, RegionSpec,
    MAX_DEVICE_SLOTS, MAX_GENERAL_REGISTERS,
};

/// Memory bus: address-space resolution and access dispatch.
pub mod bus;
pub use bus::{AccessWidth, BusError, MemoryBus};

/// Memory-mapped devices and the device registry.
pub mod device;
pub use device::{
    AudioDevice, ControllerPort, DeviceKind, DeviceModel, DeviceRegistry, IntervalTimer,
    ScratchDevice, VideoDevice, SCRATCH_WORDS,
};

/// CPU core: fetch, decode, execute, commit.
pub mod cpu;
pub use cpu::coproc::{FloatUnit, RoundingMode};
pub use cpu::decode::{decode, DecodeError, Instruction, Op};
pub use cpu::registers::{RegisterFile, FLAG_C, FLAG_I, FLAG_N, FLAG_V, FLAG_Z};
pub use cpu::{
    Cpu, CpuSnapshot, ExecPolicy, HaltCause, HardwareFault, StepEvent, CAUSE_IRQ_BASE,
};

/// Deterministic cycle-cost model.
pub mod timing;
pub use timing::{cycle_cost, CycleCostKind};

/// Frame driver: budgets, carry-over, and the boundary patch queue.
pub mod sched;
pub use sched::{FrameDriver, FrameReport, RunOutcome, StopReason};

/// Versioned machine snapshots and the canonical wire codec.
pub mod snapshot;
pub use snapshot::{MachineSnapshot, SnapshotError, SnapshotVersion, SNAPSHOT_MAGIC};

/// Adaptation hook layer: boundary observation and state patches.
pub mod adapt;
pub use adapt::{
    AdaptationPolicy, MachineView, PatchError, PatchRequest, PatchTarget, ADAPT_API_VERSION,
};

/// Trace events, sinks, and diagnostic counters.
pub mod trace;
pub use trace::{Counters, TraceEvent, TraceSink};

/// The machine aggregate tying everything together.
pub mod machine;
pub use machine::{FrameOutput, Machine};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
