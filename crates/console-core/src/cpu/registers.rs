//! Architectural register file.

use crate::profile::MAX_GENERAL_REGISTERS;

/// Zero flag: last comparison produced zero.
pub const FLAG_Z: u32 = 1 << 0;
/// Negative flag: last comparison produced a negative signed result.
pub const FLAG_N: u32 = 1 << 1;
/// Carry flag: last comparison borrowed.
pub const FLAG_C: u32 = 1 << 2;
/// Overflow flag: last comparison overflowed signed range.
pub const FLAG_V: u32 = 1 << 3;
/// Interrupt-enable flag: clear while a handler is running.
pub const FLAG_I: u32 = 1 << 4;

/// General-purpose registers plus the control registers the ISA exposes.
///
/// Backing storage is always [`MAX_GENERAL_REGISTERS`] wide; the profile's
/// register count caps which indices decode as valid. Indices are validated
/// at decode time, so accessors here take them on trust.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    gpr: [u32; MAX_GENERAL_REGISTERS],
    /// Program counter.
    pub pc: u32,
    /// Condition flags plus interrupt enable.
    pub flags: u32,
    /// Return address saved on exception or interrupt entry.
    pub epc: u32,
    /// Cause code of the most recent exception or interrupt.
    pub cause: u32,
}

impl RegisterFile {
    /// Creates a zeroed file with `pc` at the reset vector and interrupts
    /// enabled.
    #[must_use]
    pub const fn new(reset_vector: u32) -> Self {
        Self {
            gpr: [0; MAX_GENERAL_REGISTERS],
            pc: reset_vector,
            flags: FLAG_I,
            epc: 0,
            cause: 0,
        }
    }

    /// Reads a general-purpose register.
    #[must_use]
    pub fn gpr(&self, index: u8) -> u32 {
        self.gpr[index as usize]
    }

    /// Writes a general-purpose register.
    pub fn set_gpr(&mut self, index: u8, value: u32) {
        self.gpr[index as usize] = value;
    }

    /// All general-purpose registers, including indices beyond the profile's
    /// decodable count.
    #[must_use]
    pub const fn gprs(&self) -> &[u32; MAX_GENERAL_REGISTERS] {
        &self.gpr
    }

    pub(crate) fn restore_gprs(&mut self, gprs: [u32; MAX_GENERAL_REGISTERS]) {
        self.gpr = gprs;
    }

    /// Whether interrupt delivery is currently enabled.
    #[must_use]
    pub const fn interrupts_enabled(&self) -> bool {
        self.flags & FLAG_I != 0
    }
}
