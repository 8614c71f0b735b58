//! Memory-mapped devices and the device registry.
//!
//! Devices form a closed, tagged-variant capability set rather than an open
//! trait-object zoo: the bus resolves a range to a registry slot and the slot
//! dispatches on [`DeviceModel`]. Tick order is the fixed registration order,
//! which keeps timing bugs reproducible and replay deterministic.

/// Audio sample FIFO device.
pub mod audio;
/// Controller input latch device.
pub mod controller;
/// Interval timer device.
pub mod timer;
/// Scanline-counting video device with an owned framebuffer.
pub mod video;

pub use audio::AudioDevice;
pub use controller::ControllerPort;
pub use timer::IntervalTimer;
pub use video::VideoDevice;

use crate::bus::{AccessWidth, BusError};

/// Closed set of device capabilities a profile may map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DeviceKind {
    /// Video output with scanline timing and a framebuffer.
    Video,
    /// Audio sample FIFO.
    Audio,
    /// Controller input latch.
    Controller,
    /// Programmable interval timer.
    Timer,
    /// Generic scratch register block.
    Generic,
}

impl DeviceKind {
    /// Stable wire tag used in snapshot device dumps.
    #[must_use]
    pub const fn wire_tag(self) -> u8 {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
            Self::Controller => 2,
            Self::Timer => 3,
            Self::Generic => 4,
        }
    }

    /// Converts a snapshot wire tag back into a kind.
    #[must_use]
    pub const fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Video),
            1 => Some(Self::Audio),
            2 => Some(Self::Controller),
            3 => Some(Self::Timer),
            4 => Some(Self::Generic),
            _ => None,
        }
    }
}

/// Number of 32-bit scratch words in a generic device block.
pub const SCRATCH_WORDS: usize = 16;

/// Generic scratch register block.
///
/// A uniform block of readable/writable words with no timing behavior; used
/// by tests and by profiles that need a plain guest-visible mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ScratchDevice {
    pub(crate) words: [u32; SCRATCH_WORDS],
}

impl ScratchDevice {
    fn word_index(offset: u32) -> Option<usize> {
        let index = (offset / 4) as usize;
        (index < SCRATCH_WORDS).then_some(index)
    }

    fn read(&self, addr: u32, offset: u32, width: AccessWidth) -> Result<u64, BusError> {
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        let index = Self::word_index(offset).ok_or(BusError::Unmapped { addr })?;
        Ok(u64::from(self.words[index]))
    }

    fn write(&mut self, addr: u32, offset: u32, width: AccessWidth, value: u64) -> Result<(), BusError> {
        if width != AccessWidth::B4 {
            return Err(BusError::UnsupportedWidth { addr, width });
        }
        let index = Self::word_index(offset).ok_or(BusError::Unmapped { addr })?;
        self.words[index] = value as u32;
        Ok(())
    }
}

/// One registered device instance, dispatched by variant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DeviceModel {
    /// Video output device.
    Video(VideoDevice),
    /// Audio FIFO device.
    Audio(AudioDevice),
    /// Controller input latch.
    Controller(ControllerPort),
    /// Interval timer.
    Timer(IntervalTimer),
    /// Scratch register block.
    Generic(ScratchDevice),
}

impl DeviceModel {
    /// The capability kind of this instance.
    #[must_use]
    pub const fn kind(&self) -> DeviceKind {
        match self {
            Self::Video(_) => DeviceKind::Video,
            Self::Audio(_) => DeviceKind::Audio,
            Self::Controller(_) => DeviceKind::Controller,
            Self::Timer(_) => DeviceKind::Timer,
            Self::Generic(_) => DeviceKind::Generic,
        }
    }

    /// Register/state read; may mutate device state (FIFO pops).
    fn read(&mut self, addr: u32, offset: u32, width: AccessWidth) -> Result<u64, BusError> {
        match self {
            Self::Video(device) => device.read(addr, offset, width),
            Self::Audio(device) => device.read(addr, offset, width),
            Self::Controller(device) => device.read(addr, offset, width),
            Self::Timer(device) => device.read(addr, offset, width),
            Self::Generic(device) => device.read(addr, offset, width),
        }
    }

    /// Side-effect-free read used by external observers.
    fn peek(&self, addr: u32, offset: u32, width: AccessWidth) -> Result<u64, BusError> {
        match self {
            Self::Video(device) => device.read(addr, offset, width),
            Self::Audio(device) => device.peek(addr, offset, width),
            Self::Controller(device) => device.read(addr, offset, width),
            Self::Timer(device) => device.read(addr, offset, width),
            Self::Generic(device) => device.read(addr, offset, width),
        }
    }

    fn write(&mut self, addr: u32, offset: u32, width: AccessWidth, value: u64) -> Result<(), BusError> {
        match self {
            Self::Video(device) => device.write(addr, offset, width, value),
            Self::Audio(device) => device.write(addr, offset, width, value),
            Self::Controller(device) => device.write(addr, offset, width, value),
            Self::Timer(device) => device.write(addr, offset, width, value),
            Self::Generic(device) => device.write(addr, offset, width, value),
        }
    }

    /// Advances device time by `cycles`; returns true when the device newly
    /// asserts its interrupt line during this batch.
    fn tick(&mut self, cycles: u64) -> bool {
        match self {
            Self::Video(device) => device.tick(cycles),
            Self::Audio(device) => device.tick(cycles),
            Self::Controller(_) | Self::Generic(_) => false,
            Self::Timer(device) => device.tick(cycles),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Video(device) => device.reset(),
            Self::Audio(device) => device.reset(),
            Self::Controller(device) => device.reset(),
            Self::Timer(device) => device.reset(),
            Self::Generic(device) => device.words = [0; SCRATCH_WORDS],
        }
    }
}

/// Owns all device instances and their interrupt lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceRegistry {
    devices: Vec<DeviceModel>,
    /// Pending interrupt lines, one bit per slot.
    irq_pending: u16,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device; its slot index fixes tick order and the interrupt
    /// line bit it asserts.
    pub fn register(&mut self, device: DeviceModel) -> usize {
        self.devices.push(device);
        self.devices.len() - 1
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry has no devices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Ticks every device in registration order with the same cycle batch.
    pub fn tick_all(&mut self, cycles: u64) {
        for (slot, device) in self.devices.iter_mut().enumerate() {
            if device.tick(cycles) {
                self.irq_pending |= 1 << slot;
            }
        }
    }

    /// Pending interrupt-line mask, one bit per slot.
    #[must_use]
    pub const fn pending_interrupts(&self) -> u16 {
        self.irq_pending
    }

    /// Dequeues the highest-priority (lowest slot) pending interrupt line.
    pub fn take_interrupt(&mut self) -> Option<usize> {
        if self.irq_pending == 0 {
            return None;
        }
        let slot = self.irq_pending.trailing_zeros() as usize;
        self.irq_pending &= !(1 << slot);
        Some(slot)
    }

    pub(crate) fn read(
        &mut self,
        slot: usize,
        addr: u32,
        offset: u32,
        width: AccessWidth,
    ) -> Result<u64, BusError> {
        match self.devices.get_mut(slot) {
            Some(device) => device.read(addr, offset, width),
            None => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn peek(
        &self,
        slot: usize,
        addr: u32,
        offset: u32,
        width: AccessWidth,
    ) -> Result<u64, BusError> {
        match self.devices.get(slot) {
            Some(device) => device.peek(addr, offset, width),
            None => Err(BusError::Unmapped { addr }),
        }
    }

    pub(crate) fn write(
        &mut self,
        slot: usize,
        addr: u32,
        offset: u32,
        width: AccessWidth,
        value: u64,
    ) -> Result<(), BusError> {
        match self.devices.get_mut(slot) {
            Some(device) => device.write(addr, offset, width, value),
            None => Err(BusError::Unmapped { addr }),
        }
    }

    /// Read-only view of device state in slot order, for snapshots and
    /// observers.
    #[must_use]
    pub fn states(&self) -> &[DeviceModel] {
        &self.devices
    }

    /// First registered device of the given kind, if any.
    #[must_use]
    pub fn find(&self, kind: DeviceKind) -> Option<&DeviceModel> {
        self.devices.iter().find(|device| device.kind() == kind)
    }

    /// Mutable access to the first registered device of the given kind.
    pub fn find_mut(&mut self, kind: DeviceKind) -> Option<&mut DeviceModel> {
        self.devices.iter_mut().find(|device| device.kind() == kind)
    }

    /// Resets every device and clears all interrupt lines.
    pub fn reset_all(&mut self) {
        for device in &mut self.devices {
            device.reset();
        }
        self.irq_pending = 0;
    }

    pub(crate) fn restore(&mut self, devices: Vec<DeviceModel>, irq_pending: u16) {
        self.devices = devices;
        self.irq_pending = irq_pending;
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceKind, DeviceModel, DeviceRegistry, IntervalTimer, ScratchDevice};
    use crate::bus::{AccessWidth, BusError};

    #[test]
    fn wire_tags_round_trip() {
        for kind in [
            DeviceKind::Video,
            DeviceKind::Audio,
            DeviceKind::Controller,
            DeviceKind::Timer,
            DeviceKind::Generic,
        ] {
            assert_eq!(DeviceKind::from_wire_tag(kind.wire_tag()), Some(kind));
        }
        assert_eq!(DeviceKind::from_wire_tag(0xFF), None);
    }

    #[test]
    fn scratch_device_round_trips_words_and_enforces_width() {
        let mut registry = DeviceRegistry::new();
        let slot = registry.register(DeviceModel::Generic(ScratchDevice::default()));

        registry
            .write(slot, 0xE000, 0x8, AccessWidth::B4, 0x1234_5678)
            .unwrap();
        assert_eq!(
            registry.read(slot, 0xE000, 0x8, AccessWidth::B4).unwrap(),
            0x1234_5678
        );
        assert_eq!(
            registry.read(slot, 0xE000, 0x8, AccessWidth::B8),
            Err(BusError::UnsupportedWidth {
                addr: 0xE000,
                width: AccessWidth::B8,
            })
        );
    }

    #[test]
    fn interrupt_lines_prefer_lowest_slot() {
        let mut registry = DeviceRegistry::new();
        for _ in 0..3 {
            registry.register(DeviceModel::Timer(IntervalTimer::new()));
        }

        registry.irq_pending = 0b110;
        assert_eq!(registry.take_interrupt(), Some(1));
        assert_eq!(registry.take_interrupt(), Some(2));
        assert_eq!(registry.take_interrupt(), None);
    }

    #[test]
    fn tick_order_is_registration_order() {
        // Two timers with different periods assert their own line bits.
        let mut registry = DeviceRegistry::new();
        let mut fast = IntervalTimer::new();
        fast.program(2, true, false);
        let mut slow = IntervalTimer::new();
        slow.program(1000, true, false);
        registry.register(DeviceModel::Timer(fast));
        registry.register(DeviceModel::Timer(slow));

        registry.tick_all(10);
        assert_eq!(registry.pending_interrupts(), 0b01);
    }

    #[test]
    fn reset_clears_device_state_and_lines() {
        let mut registry = DeviceRegistry::new();
        let slot = registry.register(DeviceModel::Generic(ScratchDevice::default()));
        registry
            .write(slot, 0xE000, 0, AccessWidth::B4, 7)
            .unwrap();
        registry.irq_pending = 1;

        registry.reset_all();

        assert_eq!(registry.read(slot, 0xE000, 0, AccessWidth::B4).unwrap(), 0);
        assert_eq!(registry.pending_interrupts(), 0);
    }
}
