//! Memory bus: address-space range table and read/write dispatch.
//!
//! The bus owns the RAM and ROM images and resolves every access to a
//! registered range by binary search. Unmapped addresses always fault; they
//! never return stale or zeroed data silently.

use std::fmt;

use thiserror::Error;

use crate::device::DeviceRegistry;
use crate::profile::AlignmentPolicy;

/// Access widths supported by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// Single byte.
    B1,
    /// 16-bit halfword.
    B2,
    /// 32-bit word.
    B4,
    /// 64-bit doubleword.
    B8,
}

impl AccessWidth {
    /// All widths, narrowest first.
    pub const ALL: [Self; 4] = [Self::B1, Self::B2, Self::B4, Self::B8];

    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::B1 => 1,
            Self::B2 => 2,
            Self::B4 => 4,
            Self::B8 => 8,
        }
    }

    /// Converts a byte count back into a width.
    #[must_use]
    pub const fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(Self::B1),
            2 => Some(Self::B2),
            4 => Some(Self::B4),
            8 => Some(Self::B8),
            _ => None,
        }
    }

    /// Mask covering the value bits this width can carry.
    #[must_use]
    pub const fn value_mask(self) -> u64 {
        match self {
            Self::B1 => 0xFF,
            Self::B2 => 0xFFFF,
            Self::B4 => 0xFFFF_FFFF,
            Self::B8 => u64::MAX,
        }
    }
}

impl fmt::Display for AccessWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-byte", self.bytes())
    }
}

/// Memory bus access failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BusError {
    /// No registered range covers the full access.
    #[error("unmapped access at {addr:#010x}")]
    Unmapped {
        /// First address of the failed access.
        addr: u32,
    },
    /// Strict alignment policy violated.
    #[error("misaligned {width} access at {addr:#010x}")]
    Misaligned {
        /// First address of the failed access.
        addr: u32,
        /// Requested width.
        width: AccessWidth,
    },
    /// Write targeted a ROM range.
    #[error("write to read-only address {addr:#010x}")]
    ReadOnly {
        /// First address of the failed access.
        addr: u32,
    },
    /// The resolved device cannot service this width.
    #[error("unsupported {width} access at {addr:#010x}")]
    UnsupportedWidth {
        /// First address of the failed access.
        addr: u32,
        /// Requested width.
        width: AccessWidth,
    },
}

/// Backing handler resolved for one mapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeHandler {
    /// RAM-backed range starting at `base` in the RAM image.
    Ram {
        /// Byte offset of this range within the RAM image.
        base: usize,
    },
    /// ROM-backed range starting at `base` in the ROM image.
    Rom {
        /// Byte offset of this range within the ROM image.
        base: usize,
    },
    /// Device-backed range handled by the registry slot.
    Device {
        /// Registry slot owning this range.
        slot: usize,
    },
}

/// One resolved entry in the address-space range table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MappedRange {
    pub(crate) start: u32,
    pub(crate) length: u32,
    pub(crate) handler: RangeHandler,
}

impl MappedRange {
    const fn end(&self) -> u32 {
        self.start + (self.length - 1)
    }

    const fn contains_span(&self, addr: u32, bytes: u32) -> bool {
        if addr < self.start {
            return false;
        }
        let Some(last) = addr.checked_add(bytes - 1) else {
            return false;
        };
        last <= self.end()
    }
}

/// Ordered set of non-overlapping mapped ranges over the address domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AddressSpace {
    /// Ranges sorted by start address; invariant: no overlap.
    ranges: Vec<MappedRange>,
}

impl AddressSpace {
    /// Builds the table from pre-validated ranges; sorts by start address.
    ///
    /// Callers validate overlap via [`crate::PlatformProfile::validate`]
    /// before construction.
    pub(crate) fn new(mut ranges: Vec<MappedRange>) -> Self {
        ranges.sort_by_key(|range| range.start);
        Self { ranges }
    }

    /// Resolves an access span to its covering range, O(log n).
    pub(crate) fn resolve(&self, addr: u32, width: AccessWidth) -> Result<MappedRange, BusError> {
        let index = self.ranges.partition_point(|range| range.start <= addr);
        let candidate = index
            .checked_sub(1)
            .and_then(|i| self.ranges.get(i))
            .copied();
        match candidate {
            Some(range) if range.contains_span(addr, width.bytes()) => Ok(range),
            _ => Err(BusError::Unmapped { addr }),
        }
    }
}

/// Big-endian assembly of up to eight bytes.
pub(crate) fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

/// Big-endian spill of a value into `bytes.len()` bytes.
pub(crate) fn write_be(bytes: &mut [u8], value: u64) {
    let width = bytes.len();
    for (index, byte) in bytes.iter_mut().enumerate() {
        let shift = 8 * (width - 1 - index);
        *byte = ((value >> shift) & 0xFF) as u8;
    }
}

/// The machine's memory bus: range table plus RAM and ROM images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBus {
    space: AddressSpace,
    ram: Box<[u8]>,
    rom: Box<[u8]>,
    alignment: AlignmentPolicy,
}

impl MemoryBus {
    pub(crate) fn new(
        space: AddressSpace,
        ram_size: usize,
        rom: Box<[u8]>,
        alignment: AlignmentPolicy,
    ) -> Self {
        Self {
            space,
            ram: vec![0; ram_size].into_boxed_slice(),
            rom,
            alignment,
        }
    }

    fn check_alignment(&self, addr: u32, width: AccessWidth) -> Result<(), BusError> {
        match self.alignment {
            AlignmentPolicy::Tolerant => Ok(()),
            AlignmentPolicy::Strict => {
                if addr % width.bytes() == 0 {
                    Ok(())
                } else {
                    Err(BusError::Misaligned { addr, width })
                }
            }
        }
    }

    /// Reads `width` bytes starting at `addr`.
    ///
    /// Device ranges forward to their registry slot and may mutate device
    /// state (for example a FIFO pop), which is why the registry is borrowed
    /// mutably even for reads.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unmapped`] for uncovered spans,
    /// [`BusError::Misaligned`] under the strict policy, and whatever width
    /// errors the resolved device raises.
    pub fn read(
        &self,
        devices: &mut DeviceRegistry,
        addr: u32,
        width: AccessWidth,
    ) -> Result<u64, BusError> {
        self.check_alignment(addr, width)?;
        let range = self.space.resolve(addr, width)?;
        let offset = addr - range.start;
        match range.handler {
            RangeHandler::Ram { base } => {
                let at = base + offset as usize;
                Ok(read_be(&self.ram[at..at + width.bytes() as usize]))
            }
            RangeHandler::Rom { base } => {
                let at = base + offset as usize;
                Ok(read_be(&self.rom[at..at + width.bytes() as usize]))
            }
            RangeHandler::Device { slot } => devices.read(slot, addr, offset, width),
        }
    }

    /// Side-effect-free variant of [`MemoryBus::read`] for observers.
    ///
    /// Device ranges answer from a non-mutating peek of their state.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`MemoryBus::read`].
    pub fn peek(
        &self,
        devices: &DeviceRegistry,
        addr: u32,
        width: AccessWidth,
    ) -> Result<u64, BusError> {
        self.check_alignment(addr, width)?;
        let range = self.space.resolve(addr, width)?;
        let offset = addr - range.start;
        match range.handler {
            RangeHandler::Ram { base } => {
                let at = base + offset as usize;
                Ok(read_be(&self.ram[at..at + width.bytes() as usize]))
            }
            RangeHandler::Rom { base } => {
                let at = base + offset as usize;
                Ok(read_be(&self.rom[at..at + width.bytes() as usize]))
            }
            RangeHandler::Device { slot } => devices.peek(slot, addr, offset, width),
        }
    }

    /// Writes the low `width` bytes of `value` starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unmapped`], [`BusError::Misaligned`],
    /// [`BusError::ReadOnly`] for ROM targets, and whatever errors the
    /// resolved device raises.
    pub fn write(
        &mut self,
        devices: &mut DeviceRegistry,
        addr: u32,
        width: AccessWidth,
        value: u64,
    ) -> Result<(), BusError> {
        self.check_alignment(addr, width)?;
        let range = self.space.resolve(addr, width)?;
        let offset = addr - range.start;
        match range.handler {
            RangeHandler::Ram { base } => {
                let at = base + offset as usize;
                write_be(&mut self.ram[at..at + width.bytes() as usize], value);
                Ok(())
            }
            RangeHandler::Rom { .. } => Err(BusError::ReadOnly { addr }),
            RangeHandler::Device { slot } => {
                devices.write(slot, addr, offset, width, value & width.value_mask())
            }
        }
    }

    /// Whether the full span is mapped to a writable (RAM or device) range.
    ///
    /// Used to validate adaptation patch targets before acceptance.
    #[must_use]
    pub fn writable(&self, addr: u32, width: AccessWidth) -> bool {
        match self.space.resolve(addr, width) {
            Ok(range) => !matches!(range.handler, RangeHandler::Rom { .. }),
            Err(_) => false,
        }
    }

    /// Read-only view of the RAM image, in range-registration order.
    #[must_use]
    pub fn ram_image(&self) -> &[u8] {
        &self.ram
    }

    pub(crate) fn restore_ram(&mut self, image: &[u8]) {
        self.ram.copy_from_slice(image);
    }

    pub(crate) fn clear_ram(&mut self) {
        self.ram.fill(0);
    }
}
