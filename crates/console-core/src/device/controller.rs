//! Controller input latch.

use crate::bus::{AccessWidth, BusError};

const OFF_STATE: u32 = 0x0;

/// Guest-readable latch holding the host-supplied button bitmap.
///
/// Register window: `0x0 STATE` (read-only from the guest side). The host
/// updates the latch with [`ControllerPort::set_input`], typically once per
/// frame boundary so input changes stay deterministic within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ControllerPort {
    pub(crate) state: u32,
}

impl ControllerPort {
    /// Creates a port with all buttons released.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches the host-side button bitmap.
    pub fn set_input(&mut self, bits: u32) {
        self.state = bits;
    }

    /// Currently latched button bitmap.
    #[must_use]
    pub const fn input(&self) -> u32 {
        self.state
    }

    pub(crate) fn read(&self, addr: u32, offset: u32, width: AccessWidth) -> Result<u64, BusError> {
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        match offset {
            OFF_STATE => Ok(u64::from(self.state)),
            _ => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn write(
        &mut self,
        addr: u32,
        offset: u32,
        width: AccessWidth,
        _value: u64,
    ) -> Result<(), BusError> {
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        match offset {
            // The latch is host-owned; guest writes are accepted and
            // suppressed.
            OFF_STATE => Ok(()),
            _ => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = 0;
    }
}
