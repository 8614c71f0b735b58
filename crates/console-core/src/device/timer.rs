//! Programmable interval timer.

use crate::bus::{AccessWidth, BusError};

/// `CTRL` bit: counting enabled.
pub const TIMER_CTRL_ENABLE: u32 = 1 << 0;
/// `CTRL` bit: assert the interrupt line on expiry.
pub const TIMER_CTRL_IRQ: u32 = 1 << 1;
/// `CTRL` bit: reload and keep counting after expiry.
pub const TIMER_CTRL_REPEAT: u32 = 1 << 2;

/// `STATUS` bit: the timer expired since the last acknowledge.
pub const TIMER_STATUS_EXPIRED: u32 = 1 << 0;

const OFF_CTRL: u32 = 0x0;
const OFF_RELOAD: u32 = 0x4;
const OFF_COUNT: u32 = 0x8;
const OFF_STATUS: u32 = 0xC;

/// Countdown timer that asserts an interrupt line on expiry.
///
/// Register window (32-bit registers at 4-byte offsets):
/// `0x0 CTRL`, `0x4 RELOAD`, `0x8 COUNT` (read-only),
/// `0xC STATUS` (write any value to acknowledge).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct IntervalTimer {
    pub(crate) ctrl: u32,
    pub(crate) reload: u32,
    pub(crate) count: u64,
    pub(crate) status: u32,
}

impl IntervalTimer {
    /// Creates a disabled timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host-side convenience: programs and starts the timer.
    pub fn program(&mut self, reload: u32, irq_enabled: bool, repeat: bool) {
        self.reload = reload;
        self.count = u64::from(reload);
        self.status = 0;
        self.ctrl = TIMER_CTRL_ENABLE
            | if irq_enabled { TIMER_CTRL_IRQ } else { 0 }
            | if repeat { TIMER_CTRL_REPEAT } else { 0 };
    }

    /// Current countdown value.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn read(&self, addr: u32, offset: u32, width: AccessWidth) -> Result<u64, BusError> {
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        match offset {
            OFF_CTRL => Ok(u64::from(self.ctrl)),
            OFF_RELOAD => Ok(u64::from(self.reload)),
            OFF_COUNT => Ok(self.count & u64::from(u32::MAX)),
            OFF_STATUS => Ok(u64::from(self.status)),
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
        let value = value as u32;
        match offset {
            OFF_CTRL => {
                let was_enabled = self.ctrl & TIMER_CTRL_ENABLE != 0;
                self.ctrl = value & (TIMER_CTRL_ENABLE | TIMER_CTRL_IRQ | TIMER_CTRL_REPEAT);
                // Enabling arms the countdown from RELOAD.
                if !was_enabled && self.ctrl & TIMER_CTRL_ENABLE != 0 {
                    self.count = u64::from(self.reload);
                }
                Ok(())
            }
            OFF_RELOAD => {
                self.reload = value;
                Ok(())
            }
            // COUNT is read-only; writes are accepted and suppressed.
            OFF_COUNT => Ok(()),
            OFF_STATUS => {
                self.status = 0;
                Ok(())
            }
            _ => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn tick(&mut self, cycles: u64) -> bool {
        if self.ctrl & TIMER_CTRL_ENABLE == 0 {
            return false;
        }
        if self.count > cycles {
            self.count -= cycles;
            return false;
        }

        let overshoot = cycles - self.count;
        self.status |= TIMER_STATUS_EXPIRED;
        if self.ctrl & TIMER_CTRL_REPEAT != 0 && self.reload != 0 {
            let period = u64::from(self.reload);
            self.count = period - (overshoot % period);
        } else {
            self.ctrl &= !TIMER_CTRL_ENABLE;
            self.count = 0;
        }
        self.ctrl & TIMER_CTRL_IRQ != 0
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
