//! Versioned machine snapshots and their canonical wire codec.
//!
//! A snapshot is a deep copy of everything that determines future execution:
//! CPU state, device states, interrupt lines, RAM, and the frame driver's
//! counters. The wire format is hand-rolled big-endian with a magic and a
//! version word up front; the optional `serde` derives exist for host-side
//! tooling, the canonical format is this codec.

use thiserror::Error;

use crate::bus::AccessWidth;
use crate::cpu::registers::RegisterFile;
use crate::cpu::{CpuSnapshot, HaltCause, HardwareFault};
use crate::device::{
    AudioDevice, ControllerPort, DeviceKind, DeviceModel, IntervalTimer, ScratchDevice,
    VideoDevice, SCRATCH_WORDS,
};
use crate::{bus::BusError, cpu::decode::DecodeError};

/// Magic bytes opening every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"CCSS";

/// Snapshot wire-format versions this build understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SnapshotVersion {
    /// Initial format.
    V1,
}

impl SnapshotVersion {
    /// Newest version this build writes.
    pub const CURRENT: Self = Self::V1;

    /// Parses a wire version word.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            _ => None,
        }
    }

    /// Wire encoding of this version.
    #[must_use]
    pub const fn wire(self) -> u16 {
        match self {
            Self::V1 => 1,
        }
    }
}

/// Snapshot capture or restore failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// Capture was requested away from a frame boundary.
    #[error("snapshots can only be captured at frame boundaries")]
    UnsafePoint,
    /// The blob was written by an unknown format version.
    #[error("unsupported snapshot version {found}")]
    VersionMismatch {
        /// Version word found in the blob.
        found: u16,
    },
    /// The blob was captured under a different platform profile.
    #[error("snapshot was captured under profile {found:#x}, expected {expected:#x}")]
    ProfileMismatch {
        /// Profile id of the restoring machine.
        expected: u32,
        /// Profile id recorded in the blob.
        found: u32,
    },
    /// The blob does not parse.
    #[error("malformed snapshot: {reason}")]
    Malformed {
        /// What failed to parse.
        reason: &'static str,
    },
}

/// Complete machine state at one frame boundary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineSnapshot {
    /// Format version this snapshot encodes as.
    pub version: SnapshotVersion,
    /// Profile id of the capturing machine.
    pub profile_id: u32,
    /// Machine cycle counter at the boundary.
    pub total_cycles: u64,
    /// Frames completed at the boundary.
    pub frame_index: u64,
    /// Frame driver carry at the boundary.
    pub carry: u64,
    /// Architectural CPU state.
    pub cpu: CpuSnapshot,
    /// Device states in slot order.
    pub devices: Vec<DeviceModel>,
    /// Pending interrupt-line mask.
    pub irq_pending: u16,
    /// RAM image.
    pub ram: Box<[u8]>,
}

struct WireWriter {
    out: Vec<u8>,
}

impl WireWriter {
    fn new() -> Self {
        Self { out: Vec::new() }
    }

    fn u8(&mut self, value: u8) {
        self.out.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.out.extend_from_slice(&value.to_be_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }
}

struct WireReader<'b> {
    buf: &'b [u8],
}

impl<'b> WireReader<'b> {
    fn new(buf: &'b [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, count: usize) -> Result<&'b [u8], SnapshotError> {
        if self.buf.len() < count {
            return Err(SnapshotError::Malformed {
                reason: "truncated",
            });
        }
        let (head, tail) = self.buf.split_at(count);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SnapshotError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, SnapshotError> {
        let bytes = self.take(8)?;
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    fn done(&self) -> Result<(), SnapshotError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(SnapshotError::Malformed {
                reason: "trailing bytes",
            })
        }
    }
}

fn encode_halt(writer: &mut WireWriter, halt: Option<HaltCause>) {
    match halt {
        None => writer.u8(0),
        Some(HaltCause::HaltInstruction) => writer.u8(1),
        Some(HaltCause::Fault(fault)) => {
            writer.u8(2);
            let (kind, a, b) = match fault {
                HardwareFault::Bus(BusError::Unmapped { addr }) => (0, addr, 0),
                HardwareFault::Bus(BusError::Misaligned { addr, width }) => {
                    (1, addr, width.bytes() as u8)
                }
                HardwareFault::Bus(BusError::ReadOnly { addr }) => (2, addr, 0),
                HardwareFault::Bus(BusError::UnsupportedWidth { addr, width }) => {
                    (3, addr, width.bytes() as u8)
                }
                HardwareFault::Decode(DecodeError::ReservedOpcode { word }) => (4, word, 0),
                HardwareFault::Decode(DecodeError::RegisterOutOfRange { index, word }) => {
                    (5, word, index)
                }
                HardwareFault::Decode(DecodeError::CoprocessorUnavailable { word }) => (6, word, 0),
            };
            writer.u8(kind);
            writer.u32(a);
            writer.u8(b);
        }
    }
}

fn decode_width(byte: u8) -> Result<AccessWidth, SnapshotError> {
    AccessWidth::from_bytes(byte).ok_or(SnapshotError::Malformed {
        reason: "fault width",
    })
}

fn decode_halt(reader: &mut WireReader<'_>) -> Result<Option<HaltCause>, SnapshotError> {
    match reader.u8()? {
        0 => Ok(None),
        1 => Ok(Some(HaltCause::HaltInstruction)),
        2 => {
            let kind = reader.u8()?;
            let a = reader.u32()?;
            let b = reader.u8()?;
            let fault = match kind {
                0 => HardwareFault::Bus(BusError::Unmapped { addr: a }),
                1 => HardwareFault::Bus(BusError::Misaligned {
                    addr: a,
                    width: decode_width(b)?,
                }),
                2 => HardwareFault::Bus(BusError::ReadOnly { addr: a }),
                3 => HardwareFault::Bus(BusError::UnsupportedWidth {
                    addr: a,
                    width: decode_width(b)?,
                }),
                4 => HardwareFault::Decode(DecodeError::ReservedOpcode { word: a }),
                5 => HardwareFault::Decode(DecodeError::RegisterOutOfRange {
                    index: b,
                    word: a,
                }),
                6 => HardwareFault::Decode(DecodeError::CoprocessorUnavailable { word: a }),
                _ => {
                    return Err(SnapshotError::Malformed {
                        reason: "fault kind",
                    })
                }
            };
            Ok(Some(HaltCause::Fault(fault)))
        }
        _ => Err(SnapshotError::Malformed { reason: "halt tag" }),
    }
}

fn encode_device(writer: &mut WireWriter, device: &DeviceModel) {
    writer.u8(device.kind().wire_tag());
    match device {
        DeviceModel::Video(video) => {
            writer.u32(video.ctrl);
            writer.u32(video.status);
            writer.u32(video.scanline);
            writer.u64(video.line_cycles);
            writer.u32(video.framebuffer.len() as u32);
            writer.bytes(&video.framebuffer);
        }
        DeviceModel::Audio(audio) => {
            writer.u32(audio.ctrl);
            writer.u8(u8::from(audio.overflow));
            writer.u16(audio.fifo.len() as u16);
            for sample in &audio.fifo {
                writer.u16(*sample);
            }
        }
        DeviceModel::Controller(port) => writer.u32(port.state),
        DeviceModel::Timer(timer) => {
            writer.u32(timer.ctrl);
            writer.u32(timer.reload);
            writer.u64(timer.count);
            writer.u32(timer.status);
        }
        DeviceModel::Generic(scratch) => {
            for word in &scratch.words {
                writer.u32(*word);
            }
        }
    }
}

fn decode_device(reader: &mut WireReader<'_>) -> Result<DeviceModel, SnapshotError> {
    let kind = DeviceKind::from_wire_tag(reader.u8()?).ok_or(SnapshotError::Malformed {
        reason: "device tag",
    })?;
    let device = match kind {
        DeviceKind::Video => {
            let ctrl = reader.u32()?;
            let status = reader.u32()?;
            let scanline = reader.u32()?;
            let line_cycles = reader.u64()?;
            let len = reader.u32()? as usize;
            let framebuffer = reader.take(len)?.to_vec();
            DeviceModel::Video(VideoDevice {
                ctrl,
                status,
                scanline,
                line_cycles,
                framebuffer,
            })
        }
        DeviceKind::Audio => {
            let ctrl = reader.u32()?;
            let overflow = reader.u8()? != 0;
            let len = reader.u16()? as usize;
            let mut fifo = Vec::with_capacity(len);
            for _ in 0..len {
                fifo.push(reader.u16()?);
            }
            DeviceModel::Audio(AudioDevice {
                ctrl,
                overflow,
                fifo,
            })
        }
        DeviceKind::Controller => DeviceModel::Controller(ControllerPort {
            state: reader.u32()?,
        }),
        DeviceKind::Timer => DeviceModel::Timer(IntervalTimer {
            ctrl: reader.u32()?,
            reload: reader.u32()?,
            count: reader.u64()?,
            status: reader.u32()?,
        }),
        DeviceKind::Generic => {
            let mut words = [0_u32; SCRATCH_WORDS];
            for word in &mut words {
                *word = reader.u32()?;
            }
            DeviceModel::Generic(ScratchDevice { words })
        }
    };
    Ok(device)
}

impl MachineSnapshot {
    /// Encodes the snapshot in the canonical wire format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.bytes(&SNAPSHOT_MAGIC);
        writer.u16(self.version.wire());
        writer.u32(self.profile_id);
        writer.u64(self.total_cycles);
        writer.u64(self.frame_index);
        writer.u64(self.carry);

        for gpr in self.cpu.regs.gprs() {
            writer.u32(*gpr);
        }
        writer.u32(self.cpu.regs.pc);
        writer.u32(self.cpu.regs.flags);
        writer.u32(self.cpu.regs.epc);
        writer.u32(self.cpu.regs.cause);
        writer.u8(u8::from(self.cpu.in_handler));
        encode_halt(&mut writer, self.cpu.halt);

        writer.u8(self.devices.len() as u8);
        for device in &self.devices {
            encode_device(&mut writer, device);
        }
        writer.u16(self.irq_pending);

        writer.u32(self.ram.len() as u32);
        writer.bytes(&self.ram);
        writer.out
    }

    /// Decodes a snapshot blob.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Malformed`] for blobs that do not parse and
    /// [`SnapshotError::VersionMismatch`] for unknown format versions.
    /// Profile compatibility is checked at restore, not here.
    pub fn from_bytes(blob: &[u8]) -> Result<Self, SnapshotError> {
        let mut reader = WireReader::new(blob);
        if reader.take(4)? != SNAPSHOT_MAGIC {
            return Err(SnapshotError::Malformed { reason: "magic" });
        }
        let raw_version = reader.u16()?;
        let version = SnapshotVersion::from_u16(raw_version)
            .ok_or(SnapshotError::VersionMismatch { found: raw_version })?;
        let profile_id = reader.u32()?;
        let total_cycles = reader.u64()?;
        let frame_index = reader.u64()?;
        let carry = reader.u64()?;

        let mut regs = RegisterFile::new(0);
        let mut gprs = *regs.gprs();
        for gpr in &mut gprs {
            *gpr = reader.u32()?;
        }
        regs.restore_gprs(gprs);
        regs.pc = reader.u32()?;
        regs.flags = reader.u32()?;
        regs.epc = reader.u32()?;
        regs.cause = reader.u32()?;
        let in_handler = reader.u8()? != 0;
        let halt = decode_halt(&mut reader)?;

        let device_count = reader.u8()? as usize;
        let mut devices = Vec::with_capacity(device_count);
        for _ in 0..device_count {
            devices.push(decode_device(&mut reader)?);
        }
        let irq_pending = reader.u16()?;

        let ram_len = reader.u32()? as usize;
        let ram: Box<[u8]> = reader.take(ram_len)?.into();
        reader.done()?;

        Ok(Self {
            version,
            profile_id,
            total_cycles,
            frame_index,
            carry,
            cpu: CpuSnapshot {
                regs,
                in_handler,
                halt,
            },
            devices,
            irq_pending,
            ram,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MachineSnapshot, SnapshotError, SnapshotVersion, SNAPSHOT_MAGIC};
    use crate::bus::BusError;
    use crate::cpu::registers::RegisterFile;
    use crate::cpu::{CpuSnapshot, HaltCause, HardwareFault};
    use crate::device::{ControllerPort, DeviceModel, IntervalTimer, ScratchDevice, VideoDevice};

    fn sample_snapshot() -> MachineSnapshot {
        let mut regs = RegisterFile::new(0x40);
        regs.set_gpr(0, 0xAAAA_0001);
        regs.set_gpr(7, 42);
        regs.cause = 0x103;

        let mut video = VideoDevice::new(0x20);
        video.framebuffer.fill(0x5A);
        let mut timer = IntervalTimer::new();
        timer.program(500, true, true);

        MachineSnapshot {
            version: SnapshotVersion::CURRENT,
            profile_id: 0xCAFE,
            total_cycles: 123_456,
            frame_index: 17,
            carry: 3,
            cpu: CpuSnapshot {
                regs,
                in_handler: true,
                halt: Some(HaltCause::Fault(HardwareFault::Bus(BusError::Unmapped {
                    addr: 0xFFFF_0000,
                }))),
            },
            devices: vec![
                DeviceModel::Video(video),
                DeviceModel::Timer(timer),
                DeviceModel::Controller(ControllerPort { state: 0x11 }),
                DeviceModel::Generic(ScratchDevice::default()),
            ],
            irq_pending: 0b10,
            ram: vec![9; 64].into_boxed_slice(),
        }
    }

    #[test]
    fn wire_round_trip_is_lossless() {
        let snapshot = sample_snapshot();
        let blob = snapshot.to_bytes();
        assert_eq!(MachineSnapshot::from_bytes(&blob).unwrap(), snapshot);
    }

    #[test]
    fn blob_opens_with_magic_and_version() {
        let blob = sample_snapshot().to_bytes();
        assert_eq!(&blob[..4], &SNAPSHOT_MAGIC);
        assert_eq!(u16::from_be_bytes([blob[4], blob[5]]), 1);
    }

    #[test]
    fn unknown_version_is_rejected_before_parsing_state() {
        let mut blob = sample_snapshot().to_bytes();
        blob[5] = 9;
        assert_eq!(
            MachineSnapshot::from_bytes(&blob),
            Err(SnapshotError::VersionMismatch { found: 9 })
        );
    }

    #[test]
    fn bad_magic_is_malformed() {
        let mut blob = sample_snapshot().to_bytes();
        blob[0] = b'X';
        assert!(matches!(
            MachineSnapshot::from_bytes(&blob),
            Err(SnapshotError::Malformed { .. })
        ));
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let blob = sample_snapshot().to_bytes();
        assert_eq!(
            MachineSnapshot::from_bytes(&blob[..blob.len() - 1]),
            Err(SnapshotError::Malformed {
                reason: "truncated",
            })
        );
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut blob = sample_snapshot().to_bytes();
        blob.push(0);
        assert_eq!(
            MachineSnapshot::from_bytes(&blob),
            Err(SnapshotError::Malformed {
                reason: "trailing bytes",
            })
        );
    }
}
