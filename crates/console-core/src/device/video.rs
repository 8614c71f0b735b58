//! Scanline-counting video device.

use crate::bus::{read_be, write_be, AccessWidth, BusError};

/// `CTRL` bit: display output enabled.
pub const VIDEO_CTRL_ENABLE: u32 = 1 << 0;
/// `CTRL` bit: assert the interrupt line on vertical-blank entry.
pub const VIDEO_CTRL_VBLANK_IRQ: u32 = 1 << 1;

/// `STATUS` bit: currently inside vertical blank.
pub const VIDEO_STATUS_VBLANK: u32 = 1 << 0;

/// Cycles consumed per scanline.
pub const CYCLES_PER_SCANLINE: u64 = 64;
/// Scanlines with visible output.
pub const VISIBLE_LINES: u32 = 240;
/// Total scanlines per sweep, including vertical blank.
pub const TOTAL_LINES: u32 = 262;

const OFF_CTRL: u32 = 0x0;
const OFF_STATUS: u32 = 0x4;
const OFF_SCANLINE: u32 = 0x8;
/// First framebuffer byte, relative to the device window.
pub const FRAMEBUFFER_BASE: u32 = 0x10;

/// Video output device with register block and owned framebuffer.
///
/// Register window: `0x0 CTRL`, `0x4 STATUS` (vblank bit is write-1-clear),
/// `0x8 SCANLINE` (read-only). Bytes from [`FRAMEBUFFER_BASE`] to the end of
/// the mapped window are framebuffer memory and accept every access width.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VideoDevice {
    pub(crate) ctrl: u32,
    pub(crate) status: u32,
    pub(crate) scanline: u32,
    pub(crate) line_cycles: u64,
    pub(crate) framebuffer: Vec<u8>,
}

impl VideoDevice {
    /// Creates a video device whose framebuffer fills the mapped window
    /// beyond the register block.
    #[must_use]
    pub fn new(window_length: u32) -> Self {
        let framebuffer_len = window_length.saturating_sub(FRAMEBUFFER_BASE) as usize;
        Self {
            ctrl: 0,
            status: 0,
            scanline: 0,
            line_cycles: 0,
            framebuffer: vec![0; framebuffer_len],
        }
    }

    /// Current framebuffer contents.
    #[must_use]
    pub fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    /// Scanline the beam is currently on.
    #[must_use]
    pub const fn scanline(&self) -> u32 {
        self.scanline
    }

    fn framebuffer_span(&self, offset: u32, width: AccessWidth) -> Option<usize> {
        let start = offset.checked_sub(FRAMEBUFFER_BASE)? as usize;
        let end = start.checked_add(width.bytes() as usize)?;
        (end <= self.framebuffer.len()).then_some(start)
    }

    pub(crate) fn read(&self, addr: u32, offset: u32, width: AccessWidth) -> Result<u64, BusError> {
        if offset >= FRAMEBUFFER_BASE {
            let start = self
                .framebuffer_span(offset, width)
                .ok_or(BusError::Unmapped { addr })?;
            return Ok(read_be(&self.framebuffer[start..start + width.bytes() as usize]));
        }
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        match offset {
            OFF_CTRL => Ok(u64::from(self.ctrl)),
            OFF_STATUS => Ok(u64::from(self.status)),
            OFF_SCANLINE => Ok(u64::from(self.scanline)),
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
        if offset >= FRAMEBUFFER_BASE {
            let start = self
                .framebuffer_span(offset, width)
                .ok_or(BusError::Unmapped { addr })?;
            write_be(
                &mut self.framebuffer[start..start + width.bytes() as usize],
                value,
            );
            return Ok(());
        }
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        match offset {
            OFF_CTRL => {
                self.ctrl = (value as u32) & (VIDEO_CTRL_ENABLE | VIDEO_CTRL_VBLANK_IRQ);
                Ok(())
            }
            OFF_STATUS => {
                // Write-1-clear.
                self.status &= !(value as u32);
                Ok(())
            }
            // SCANLINE is read-only; writes are accepted and suppressed.
            OFF_SCANLINE => Ok(()),
            _ => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn tick(&mut self, cycles: u64) -> bool {
        if self.ctrl & VIDEO_CTRL_ENABLE == 0 {
            return false;
        }
        let mut irq = false;
        self.line_cycles += cycles;
        while self.line_cycles >= CYCLES_PER_SCANLINE {
            self.line_cycles -= CYCLES_PER_SCANLINE;
            self.scanline += 1;
            if self.scanline == VISIBLE_LINES {
                self.status |= VIDEO_STATUS_VBLANK;
                irq = self.ctrl & VIDEO_CTRL_VBLANK_IRQ != 0;
            } else if self.scanline >= TOTAL_LINES {
                self.scanline = 0;
                self.status &= !VIDEO_STATUS_VBLANK;
            }
        }
        irq
    }

    pub(crate) fn reset(&mut self) {
        self.ctrl = 0;
        self.status = 0;
        self.scanline = 0;
        self.line_cycles = 0;
        self.framebuffer.fill(0);
    }
}
