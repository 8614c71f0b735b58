//! Platform profiles: the declarative description of an emulated hardware
//! target.
//!
//! A profile carries everything that distinguishes one console target from
//! another: the address map, timing constants, alignment policy, and
//! coprocessor capabilities. The core itself stays decoupled from any one
//! machine's specifics.

use std::ops::RangeInclusive;

use thiserror::Error;

use crate::cpu::coproc::RoundingMode;
use crate::device::DeviceKind;

/// Maximum number of general-purpose registers any profile may declare.
pub const MAX_GENERAL_REGISTERS: usize = 16;

/// Maximum number of device regions a profile may declare.
///
/// Interrupt lines are tracked as one bit per device slot in a 16-bit mask.
pub const MAX_DEVICE_SLOTS: usize = 16;

/// Unaligned-access policy for the memory bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AlignmentPolicy {
    /// Accesses must be naturally aligned to their width; violations fault.
    #[default]
    Strict,
    /// Unaligned accesses are assembled byte-wise and never fault.
    Tolerant,
}

/// Backing classification for one mapped address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegionKind {
    /// General-purpose read/write memory.
    Ram,
    /// Read-only memory backed by the loaded ROM image.
    Rom,
    /// A memory-mapped device of the given kind.
    Device(DeviceKind),
}

/// One `(start, length, handler)` entry in a profile's address map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegionSpec {
    /// Backing classification for this range.
    pub kind: RegionKind,
    /// First address covered by the range.
    pub start: u32,
    /// Number of bytes covered; must be non-zero.
    pub length: u32,
}

impl RegionSpec {
    /// Last address covered by this range, when the range is well-formed.
    #[must_use]
    pub const fn end(&self) -> Option<u32> {
        if self.length == 0 {
            return None;
        }
        self.start.checked_add(self.length - 1)
    }
}

/// Floating-point coprocessor capability flags.
///
/// Floating point is modeled as a pluggable capability rather than assumed
/// hardware: a profile without a float unit decodes coprocessor opcodes as
/// reserved instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CoprocCapability {
    /// Rounding mode of the software float unit, or `None` when the platform
    /// has no coprocessor.
    pub float_unit: Option<RoundingMode>,
}

impl CoprocCapability {
    /// A capability set with no coprocessor at all.
    #[must_use]
    pub const fn none() -> Self {
        Self { float_unit: None }
    }

    /// A capability set with a float unit using the given rounding mode.
    #[must_use]
    pub const fn with_float(rounding: RoundingMode) -> Self {
        Self {
            float_unit: Some(rounding),
        }
    }
}

/// Complete declarative description of one emulated hardware target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PlatformProfile {
    /// Stable identifier recorded in snapshot headers; a snapshot only
    /// restores onto a machine built from the same profile id.
    pub id: u32,
    /// Address map: must be non-overlapping with non-zero lengths.
    pub regions: Vec<RegionSpec>,
    /// Number of architecturally visible general registers
    /// (`1..=MAX_GENERAL_REGISTERS`).
    pub general_registers: usize,
    /// Cycle budget executed per output frame; must be non-zero.
    pub cycles_per_frame: u64,
    /// Unaligned-access policy for all bus traffic.
    pub alignment: AlignmentPolicy,
    /// Guest exception/interrupt vector, or `None` when the platform defines
    /// no exception mechanism (hardware faults then halt the machine).
    pub exception_vector: Option<u32>,
    /// Address execution starts from at power-on and after reset.
    pub reset_vector: u32,
    /// Coprocessor capability flags.
    pub coproc: CoprocCapability,
    /// Accepted ROM image sizes in bytes, validated at machine construction.
    pub rom_size: RangeInclusive<usize>,
}

/// Profile or ROM validation failure at machine construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// A region declared zero length.
    #[error("region at {start:#010x} has zero length")]
    ZeroLengthRegion {
        /// Start address of the offending region.
        start: u32,
    },
    /// A region extends past the top of the address domain.
    #[error("region at {start:#010x} (+{length:#x}) overflows the address space")]
    RegionOverflow {
        /// Start address of the offending region.
        start: u32,
        /// Declared length of the offending region.
        length: u32,
    },
    /// Two regions cover at least one common address.
    #[error("regions at {first:#010x} and {second:#010x} overlap")]
    OverlappingRegions {
        /// Start of the lower region.
        first: u32,
        /// Start of the region that collides with it.
        second: u32,
    },
    /// General register count outside `1..=MAX_GENERAL_REGISTERS`.
    #[error("general register count {count} is out of range")]
    RegisterCountOutOfRange {
        /// Declared register count.
        count: usize,
    },
    /// More device regions than available interrupt slots.
    #[error("profile declares {count} device regions, limit is {MAX_DEVICE_SLOTS}")]
    TooManyDevices {
        /// Declared device region count.
        count: usize,
    },
    /// A zero cycles-per-frame budget would never reach a frame boundary.
    #[error("cycles per frame must be non-zero")]
    ZeroFrameBudget,
    /// ROM image size outside the profile's accepted range.
    #[error("rom image of {size} bytes is outside the accepted size range")]
    RomSizeRejected {
        /// Size of the offered ROM image.
        size: usize,
    },
    /// ROM image larger than the address map's ROM window.
    #[error("rom image of {size} bytes exceeds the {window}-byte mapped rom window")]
    RomExceedsWindow {
        /// Size of the offered ROM image.
        size: usize,
        /// Total bytes of ROM-backed address ranges.
        window: usize,
    },
}

impl PlatformProfile {
    /// Validates the profile's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProfileError`] found in the region table, register
    /// count, or timing constants.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.general_registers == 0 || self.general_registers > MAX_GENERAL_REGISTERS {
            return Err(ProfileError::RegisterCountOutOfRange {
                count: self.general_registers,
            });
        }
        if self.cycles_per_frame == 0 {
            return Err(ProfileError::ZeroFrameBudget);
        }

        let device_count = self.device_regions().count();
        if device_count > MAX_DEVICE_SLOTS {
            return Err(ProfileError::TooManyDevices {
                count: device_count,
            });
        }

        let mut sorted: Vec<&RegionSpec> = self.regions.iter().collect();
        sorted.sort_by_key(|region| region.start);
        for (index, region) in sorted.iter().enumerate() {
            let Some(end) = region.end() else {
                if region.length == 0 {
                    return Err(ProfileError::ZeroLengthRegion {
                        start: region.start,
                    });
                }
                return Err(ProfileError::RegionOverflow {
                    start: region.start,
                    length: region.length,
                });
            };
            if let Some(next) = sorted.get(index + 1) {
                if next.start <= end {
                    return Err(ProfileError::OverlappingRegions {
                        first: region.start,
                        second: next.start,
                    });
                }
            }
        }

        Ok(())
    }

    /// Iterates the device-backed regions in address-map order.
    ///
    /// This order fixes device slot assignment and therefore tick order,
    /// which must be deterministic for replay.
    pub fn device_regions(&self) -> impl Iterator<Item = &RegionSpec> {
        self.regions
            .iter()
            .filter(|region| matches!(region.kind, RegionKind::Device(_)))
    }

    /// Total bytes of ROM-backed address ranges.
    #[must_use]
    pub fn rom_window(&self) -> usize {
        self.regions
            .iter()
            .filter(|region| region.kind == RegionKind::Rom)
            .map(|region| region.length as usize)
            .sum()
    }

    /// Total bytes of RAM-backed address ranges.
    #[must_use]
    pub fn ram_size(&self) -> usize {
        self.regions
            .iter()
            .filter(|region| region.kind == RegionKind::Ram)
            .map(|region| region.length as usize)
            .sum()
    }

    /// Validates a ROM image against this profile's expected bank sizes.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::RomSizeRejected`] when the image size falls
    /// outside the accepted range, or [`ProfileError::RomExceedsWindow`] when
    /// it cannot fit the mapped ROM ranges.
    pub fn validate_rom(&self, rom: &[u8]) -> Result<(), ProfileError> {
        if !self.rom_size.contains(&rom.len()) {
            return Err(ProfileError::RomSizeRejected { size: rom.len() });
        }
        let window = self.rom_window();
        if rom.len() > window {
            return Err(ProfileError::RomExceedsWindow {
                size: rom.len(),
                window,
            });
        }
        Ok(())
    }
}
