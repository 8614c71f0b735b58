//! Adaptation hook layer.
//!
//! An [`AdaptationPolicy`] observes the machine at every frame boundary and
//! may request patches to registers or writable memory. Patches never apply
//! mid-frame: requests are validated immediately, queued on the frame
//! driver, and applied at the first boundary whose cycle counter is
//! eligible. The policy sees the machine only through [`MachineView`], a
//! read-only borrow, so observation can never perturb execution.

use thiserror::Error;

use crate::bus::{AccessWidth, BusError, MemoryBus};
use crate::cpu::registers::RegisterFile;
use crate::device::{DeviceModel, DeviceRegistry};

/// Version of the policy interface this core implements.
pub const ADAPT_API_VERSION: u16 = 1;

/// What a patch writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTarget {
    /// A general-purpose register.
    Register {
        /// Register index.
        index: u8,
    },
    /// A span of writable memory or device registers.
    Memory {
        /// First address of the write.
        address: u32,
        /// Write width.
        width: AccessWidth,
    },
}

/// One requested state patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRequest {
    /// Where the value lands.
    pub target: PatchTarget,
    /// Value to write; must fit the target.
    pub value: u64,
    /// Earliest machine cycle the patch may apply at. `None` means the next
    /// frame boundary.
    pub apply_at_cycle: Option<u64>,
}

/// Why a patch request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The register index exceeds the profile's register count.
    #[error("patch targets register r{index}, beyond the platform's register file")]
    RegisterOutOfRange {
        /// Requested register index.
        index: u8,
    },
    /// The memory span is unmapped or read-only.
    #[error("patch target {address:#010x} ({width}) is not writable")]
    TargetNotWritable {
        /// Requested address.
        address: u32,
        /// Requested width.
        width: AccessWidth,
    },
    /// The value does not fit the target's width.
    #[error("patch value {value:#x} does not fit a {width} target")]
    ValueTooWide {
        /// Requested value.
        value: u64,
        /// Target width.
        width: AccessWidth,
    },
    /// The policy speaks a different interface version than the core.
    #[error("policy api version {policy} is incompatible with core version {core}")]
    IncompatibleApiVersion {
        /// Version the policy reports.
        policy: u16,
        /// Version the core implements.
        core: u16,
    },
}

/// Read-only view of the machine handed to policies at frame boundaries.
#[derive(Debug, Clone, Copy)]
pub struct MachineView<'m> {
    pub(crate) regs: &'m RegisterFile,
    pub(crate) bus: &'m MemoryBus,
    pub(crate) devices: &'m DeviceRegistry,
    pub(crate) register_count: usize,
    pub(crate) total_cycles: u64,
    pub(crate) frame_index: u64,
}

impl MachineView<'_> {
    /// Reads a general-purpose register; `None` beyond the platform's count.
    #[must_use]
    pub fn gpr(&self, index: u8) -> Option<u32> {
        (usize::from(index) < self.register_count).then(|| self.regs.gpr(index))
    }

    /// Current program counter.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.regs.pc
    }

    /// Current condition flags.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.regs.flags
    }

    /// Decodable register count of the platform.
    #[must_use]
    pub const fn register_count(&self) -> usize {
        self.register_count
    }

    /// Machine cycle counter at this boundary.
    #[must_use]
    pub const fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Frames completed so far.
    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Side-effect-free memory read through the bus.
    ///
    /// # Errors
    ///
    /// Propagates the bus's [`BusError`] for unmapped or misaligned spans.
    pub fn read(&self, address: u32, width: AccessWidth) -> Result<u64, BusError> {
        self.bus.peek(self.devices, address, width)
    }

    /// Device states in slot order.
    #[must_use]
    pub fn device_states(&self) -> &[DeviceModel] {
        self.devices.states()
    }
}

/// A frame-boundary observer that may request state patches.
///
/// Policies are plain state machines: no threads, no callbacks mid-frame.
/// Returning an empty vector is the common case.
pub trait AdaptationPolicy {
    /// Interface version the policy was written against.
    fn api_version(&self) -> u16 {
        ADAPT_API_VERSION
    }

    /// Observes the machine at a frame boundary and requests patches.
    fn observe(&mut self, view: &MachineView<'_>) -> Vec<PatchRequest>;
}

/// Validates a patch request against the live machine.
pub(crate) fn validate(
    request: &PatchRequest,
    register_count: usize,
    bus: &MemoryBus,
) -> Result<(), PatchError> {
    match request.target {
        PatchTarget::Register { index } => {
            if usize::from(index) >= register_count {
                return Err(PatchError::RegisterOutOfRange { index });
            }
            if request.value > u64::from(u32::MAX) {
                return Err(PatchError::ValueTooWide {
                    value: request.value,
                    width: AccessWidth::B4,
                });
            }
            Ok(())
        }
        PatchTarget::Memory { address, width } => {
            if request.value & !width.value_mask() != 0 {
                return Err(PatchError::ValueTooWide {
                    value: request.value,
                    width,
                });
            }
            if !bus.writable(address, width) {
                return Err(PatchError::TargetNotWritable { address, width });
            }
            Ok(())
        }
    }
}
