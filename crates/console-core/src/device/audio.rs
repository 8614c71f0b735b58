//! Audio sample FIFO device.

use crate::bus::{AccessWidth, BusError};

/// `CTRL` bit: sample intake enabled.
pub const AUDIO_CTRL_ENABLE: u32 = 1 << 0;

/// `STATUS` bit: a push was dropped because the FIFO was full.
pub const AUDIO_STATUS_OVERFLOW: u32 = 1 << 16;

/// Maximum number of buffered samples.
pub const AUDIO_FIFO_CAPACITY: usize = 2048;

const OFF_CTRL: u32 = 0x0;
const OFF_DATA: u32 = 0x4;
const OFF_STATUS: u32 = 0x8;

/// Bounded sample FIFO the guest pushes into and the host drains.
///
/// Register window: `0x0 CTRL`, `0x4 DATA` (write pushes a 16-bit sample,
/// read pops the oldest), `0x8 STATUS` (low half is the FIFO depth, bit 16
/// latches overflow; write any value to clear overflow).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AudioDevice {
    pub(crate) ctrl: u32,
    pub(crate) overflow: bool,
    pub(crate) fifo: Vec<u16>,
}

impl AudioDevice {
    /// Creates an empty, disabled audio device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffered samples in push order.
    #[must_use]
    pub fn samples(&self) -> &[u16] {
        &self.fifo
    }

    /// Host-side drain after presenting a frame.
    pub fn clear_frame(&mut self) {
        self.fifo.clear();
    }

    fn status_word(&self) -> u32 {
        let depth = self.fifo.len() as u32;
        depth | if self.overflow { AUDIO_STATUS_OVERFLOW } else { 0 }
    }

    pub(crate) fn read(
        &mut self,
        addr: u32,
        offset: u32,
        width: AccessWidth,
    ) -> Result<u64, BusError> {
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        match offset {
            OFF_CTRL => Ok(u64::from(self.ctrl)),
            OFF_DATA => {
                // Destructive pop; observers must use peek.
                if self.fifo.is_empty() {
                    Ok(0)
                } else {
                    Ok(u64::from(self.fifo.remove(0)))
                }
            }
            OFF_STATUS => Ok(u64::from(self.status_word())),
            _ => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn peek(&self, addr: u32, offset: u32, width: AccessWidth) -> Result<u64, BusError> {
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        match offset {
            OFF_CTRL => Ok(u64::from(self.ctrl)),
            OFF_DATA => Ok(u64::from(self.fifo.first().copied().unwrap_or(0))),
            OFF_STATUS => Ok(u64::from(self.status_word())),
            _ => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn write(
        &mut self,
        addr: u32,
        offset: u32,
        width: AccessWidth,
        value: u64,
    ) -> Result<(), BusError> {
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        match offset {
            OFF_CTRL => {
                self.ctrl = (value as u32) & AUDIO_CTRL_ENABLE;
                Ok(())
            }
            OFF_DATA => {
                if self.ctrl & AUDIO_CTRL_ENABLE == 0 {
                    return Ok(());
                }
                if self.fifo.len() < AUDIO_FIFO_CAPACITY {
                    self.fifo.push(value as u16);
                } else {
                    self.overflow = true;
                }
                Ok(())
            }
            OFF_STATUS => {
                self.overflow = false;
                Ok(())
            }
            _ => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn tick(&mut self, _cycles: u64) -> bool {
        // Sample timing is host-driven; the FIFO raises no interrupt line.
        false
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
