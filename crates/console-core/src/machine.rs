//! The machine aggregate: profile + ROM in, frames out.
//!
//! [`Machine`] owns the bus, the device registry, the CPU and the frame
//! driver, and sequences them: run a frame's worth of instructions with
//! devices ticking in lockstep, then do boundary work (policy observation,
//! patch application), then hand the frame outputs to the host. All mutation
//! flows through `&mut self`; the machine is `Send` and the host decides the
//! threading.

use crate::adapt::{
    self, AdaptationPolicy, MachineView, PatchError, PatchRequest, PatchTarget, ADAPT_API_VERSION,
};
use crate::bus::{AccessWidth, AddressSpace, BusError, MappedRange, MemoryBus, RangeHandler};
use crate::cpu::registers::RegisterFile;
use crate::cpu::{Cpu, ExecPolicy, HaltCause, StepEvent};
use crate::device::{
    AudioDevice, ControllerPort, DeviceKind, DeviceModel, DeviceRegistry, IntervalTimer,
    ScratchDevice, VideoDevice,
};
use crate::profile::{PlatformProfile, ProfileError, RegionKind};
use crate::sched::{FrameDriver, FrameReport, RunOutcome, StopReason};
use crate::snapshot::{MachineSnapshot, SnapshotError, SnapshotVersion};
use crate::trace::{Counters, TraceEvent, TraceSink};

/// Borrowed frame outputs for host presentation.
#[derive(Debug, Clone, Copy)]
pub struct FrameOutput<'m> {
    /// Video framebuffer bytes, empty when the profile maps no video device.
    pub video: &'m [u8],
    /// Audio samples accumulated since the last [`Machine::clear_audio`].
    pub audio: &'m [u16],
}

/// A complete emulated console built from one profile and one ROM.
pub struct Machine {
    profile: PlatformProfile,
    bus: MemoryBus,
    devices: DeviceRegistry,
    cpu: Cpu,
    driver: FrameDriver,
    policy: Option<Box<dyn AdaptationPolicy>>,
    trace: Option<Box<dyn TraceSink>>,
    counters: Counters,
    at_boundary: bool,
}

impl Machine {
    /// Builds a machine from a validated profile and ROM image.
    ///
    /// Device slots are assigned in the profile's address-map declaration
    /// order; the ROM image is padded with zeros to fill the mapped window.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] when the profile is inconsistent or the ROM
    /// image does not fit it.
    pub fn new(profile: PlatformProfile, rom: &[u8]) -> Result<Self, ProfileError> {
        profile.validate()?;
        profile.validate_rom(rom)?;

        let mut devices = DeviceRegistry::new();
        let mut ranges = Vec::with_capacity(profile.regions.len());
        let mut ram_base = 0_usize;
        let mut rom_base = 0_usize;
        for region in &profile.regions {
            let handler = match region.kind {
                RegionKind::Ram => {
                    let base = ram_base;
                    ram_base += region.length as usize;
                    RangeHandler::Ram { base }
                }
                RegionKind::Rom => {
                    let base = rom_base;
                    rom_base += region.length as usize;
                    RangeHandler::Rom { base }
                }
                RegionKind::Device(kind) => {
                    let model = match kind {
                        DeviceKind::Video => DeviceModel::Video(VideoDevice::new(region.length)),
                        DeviceKind::Audio => DeviceModel::Audio(AudioDevice::new()),
                        DeviceKind::Controller => DeviceModel::Controller(ControllerPort::new()),
                        DeviceKind::Timer => DeviceModel::Timer(IntervalTimer::new()),
                        DeviceKind::Generic => DeviceModel::Generic(ScratchDevice::default()),
                    };
                    RangeHandler::Device {
                        slot: devices.register(model),
                    }
                }
            };
            ranges.push(MappedRange {
                start: region.start,
                length: region.length,
                handler,
            });
        }

        let mut rom_image = vec![0_u8; profile.rom_window()];
        rom_image[..rom.len()].copy_from_slice(rom);

        let bus = MemoryBus::new(
            AddressSpace::new(ranges),
            profile.ram_size(),
            rom_image.into_boxed_slice(),
            profile.alignment,
        );
        let cpu = Cpu::new(ExecPolicy::from_profile(&profile));
        let driver = FrameDriver::new(profile.cycles_per_frame);

        Ok(Self {
            profile,
            bus,
            devices,
            cpu,
            driver,
            policy: None,
            trace: None,
            counters: Counters::new(),
            at_boundary: true,
        })
    }

    /// The profile this machine was built from.
    #[must_use]
    pub const fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    /// Architectural CPU registers.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        self.cpu.registers()
    }

    /// Latched halt cause, if the core has stopped.
    #[must_use]
    pub const fn halted(&self) -> Option<HaltCause> {
        self.cpu.halted()
    }

    /// Lifetime diagnostic counters.
    #[must_use]
    pub const fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Machine cycle counter.
    #[must_use]
    pub const fn total_cycles(&self) -> u64 {
        self.driver.total_cycles()
    }

    /// Frames completed so far.
    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.driver.frame_index()
    }

    /// Side-effect-free memory read, for hosts and debuggers.
    ///
    /// # Errors
    ///
    /// Propagates the bus's [`BusError`].
    pub fn peek(&self, address: u32, width: AccessWidth) -> Result<u64, BusError> {
        self.bus.peek(&self.devices, address, width)
    }

    /// Read-only view of the machine, as handed to adaptation policies.
    #[must_use]
    pub fn view(&self) -> MachineView<'_> {
        MachineView {
            regs: self.cpu.registers(),
            bus: &self.bus,
            devices: &self.devices,
            register_count: self.cpu.policy().gpr_count,
            total_cycles: self.driver.total_cycles(),
            frame_index: self.driver.frame_index(),
        }
    }

    /// Attaches an adaptation policy, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::IncompatibleApiVersion`] when the policy was
    /// written against a different interface version.
    pub fn attach_policy(&mut self, policy: Box<dyn AdaptationPolicy>) -> Result<(), PatchError> {
        let version = policy.api_version();
        if version != ADAPT_API_VERSION {
            return Err(PatchError::IncompatibleApiVersion {
                policy: version,
                core: ADAPT_API_VERSION,
            });
        }
        self.policy = Some(policy);
        Ok(())
    }

    /// Detaches the adaptation policy, if one is attached.
    pub fn detach_policy(&mut self) -> Option<Box<dyn AdaptationPolicy>> {
        self.policy.take()
    }

    /// Attaches a trace sink, replacing any previous one.
    pub fn attach_trace(&mut self, sink: Box<dyn TraceSink>) {
        self.trace = Some(sink);
    }

    /// Requests a cooperative stop; [`Machine::run_frames`] returns at the
    /// current frame's boundary.
    pub fn request_stop(&mut self) {
        self.driver.request_stop();
    }

    /// Latches the controller input bitmap, if the profile maps a controller.
    pub fn set_input(&mut self, bits: u32) {
        if let Some(DeviceModel::Controller(port)) = self.devices.find_mut(DeviceKind::Controller)
        {
            port.set_input(bits);
        }
    }

    /// Borrowed frame outputs for presentation.
    #[must_use]
    pub fn frame_output(&self) -> FrameOutput<'_> {
        let video = match self.devices.find(DeviceKind::Video) {
            Some(DeviceModel::Video(video)) => video.framebuffer(),
            _ => &[],
        };
        let audio = match self.devices.find(DeviceKind::Audio) {
            Some(DeviceModel::Audio(audio)) => audio.samples(),
            _ => &[],
        };
        FrameOutput { video, audio }
    }

    /// Drops accumulated audio samples after the host has consumed them.
    pub fn clear_audio(&mut self) {
        if let Some(DeviceModel::Audio(audio)) = self.devices.find_mut(DeviceKind::Audio) {
            audio.clear_frame();
        }
    }

    fn emit(&mut self, event: TraceEvent) {
        if let Some(sink) = self.trace.as_deref_mut() {
            sink.record(event);
        }
    }

    fn tick_and_account(&mut self, event: StepEvent) -> u64 {
        match event {
            StepEvent::Retired { pc, cycles } => {
                self.devices.tick_all(cycles);
                self.counters.record_instruction();
                self.emit(TraceEvent::InstructionRetired { pc, cycles });
                cycles
            }
            StepEvent::Interrupt { cause, cycles } => {
                self.devices.tick_all(cycles);
                self.counters.record_interrupt();
                self.emit(TraceEvent::InterruptTaken { cause });
                cycles
            }
            StepEvent::GuestFault { fault, cycles } => {
                self.devices.tick_all(cycles);
                self.counters.record_guest_exception();
                self.emit(TraceEvent::FaultRaised {
                    cause: fault.cause_code(),
                });
                cycles
            }
            StepEvent::Halted { .. } => 0,
        }
    }

    /// Runs a single instruction (or dispatch) outside frame accounting.
    ///
    /// Intended for debugger-style stepping; it leaves the machine away from
    /// a frame boundary, so a capture before the next [`Machine::run_frame`]
    /// fails with [`SnapshotError::UnsafePoint`].
    pub fn step_instruction(&mut self) -> StepEvent {
        self.at_boundary = false;
        let event = self.cpu.step(&mut self.bus, &mut self.devices);
        self.tick_and_account(event);
        event
    }

    fn apply_patch(&mut self, request: &PatchRequest) -> Result<(), PatchError> {
        match request.target {
            PatchTarget::Register { index } => {
                self.cpu.registers_mut().set_gpr(index, request.value as u32);
                Ok(())
            }
            PatchTarget::Memory { address, width } => self
                .bus
                .write(&mut self.devices, address, width, request.value)
                .map_err(|_| PatchError::TargetNotWritable { address, width }),
        }
    }

    fn boundary_work(&mut self) -> (usize, usize) {
        let mut applied = 0_usize;
        let mut rejected = 0_usize;

        if let Some(mut policy) = self.policy.take() {
            let requests = policy.observe(&self.view());
            self.policy = Some(policy);
            let register_count = self.cpu.policy().gpr_count;
            for request in requests {
                match adapt::validate(&request, register_count, &self.bus) {
                    Ok(()) => self.driver.enqueue(request),
                    Err(_) => {
                        rejected += 1;
                        self.counters.record_patch_rejected();
                        self.emit(TraceEvent::PatchRejected {
                            target: request.target,
                        });
                    }
                }
            }
        }

        // Queue order is request order, so later patches win on conflict.
        let now = self.driver.total_cycles();
        for request in self.driver.drain_eligible(now) {
            match self.apply_patch(&request) {
                Ok(()) => {
                    applied += 1;
                    self.counters.record_patch_applied();
                    self.emit(TraceEvent::PatchApplied {
                        target: request.target,
                        value: request.value,
                    });
                }
                Err(_) => {
                    rejected += 1;
                    self.counters.record_patch_rejected();
                    self.emit(TraceEvent::PatchRejected {
                        target: request.target,
                    });
                }
            }
        }
        (applied, rejected)
    }

    /// Runs one frame: a budgeted burst of instructions, then boundary work.
    ///
    /// A halted core consumes no cycles but still completes frames, so the
    /// host keeps receiving boundaries (and frame outputs) after a halt.
    pub fn run_frame(&mut self) -> FrameReport {
        let budget = self.driver.begin_frame();
        self.at_boundary = false;

        let mut executed = 0_u64;
        let mut instructions = 0_u64;
        while executed < budget {
            let event = self.cpu.step(&mut self.bus, &mut self.devices);
            if matches!(event, StepEvent::Halted { .. }) {
                break;
            }
            if matches!(event, StepEvent::Retired { .. }) {
                instructions += 1;
            }
            executed += self.tick_and_account(event);
        }

        let frame_index = self.driver.frame_index();
        self.driver.finish_frame(executed);
        self.counters.record_frame();
        self.at_boundary = true;

        let (patches_applied, patches_rejected) = self.boundary_work();
        self.emit(TraceEvent::FrameBoundary {
            frame_index,
            total_cycles: self.driver.total_cycles(),
        });

        FrameReport {
            frame_index,
            budget,
            executed_cycles: executed,
            instructions,
            carry: self.driver.carry(),
            halted: self.cpu.halted(),
            patches_applied,
            patches_rejected,
        }
    }

    /// Runs up to `max_frames` frames, honoring stop requests and halts.
    pub fn run_frames(&mut self, max_frames: u64) -> RunOutcome {
        let mut frames_run = 0_u64;
        while frames_run < max_frames {
            let report = self.run_frame();
            frames_run += 1;
            if let Some(cause) = report.halted {
                return RunOutcome {
                    frames_run,
                    stop: StopReason::Halted(cause),
                };
            }
            if self.driver.take_stop() {
                return RunOutcome {
                    frames_run,
                    stop: StopReason::Requested,
                };
            }
        }
        RunOutcome {
            frames_run,
            stop: StopReason::Completed,
        }
    }

    /// Captures a snapshot of the complete machine state.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnsafePoint`] away from a frame boundary.
    pub fn capture(&self) -> Result<MachineSnapshot, SnapshotError> {
        if !self.at_boundary {
            return Err(SnapshotError::UnsafePoint);
        }
        Ok(MachineSnapshot {
            version: SnapshotVersion::CURRENT,
            profile_id: self.profile.id,
            total_cycles: self.driver.total_cycles(),
            frame_index: self.driver.frame_index(),
            carry: self.driver.carry(),
            cpu: self.cpu.capture(),
            devices: self.devices.states().to_vec(),
            irq_pending: self.devices.pending_interrupts(),
            ram: self.bus.ram_image().into(),
        })
    }

    /// Restores a snapshot captured on a machine with the same profile.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::ProfileMismatch`] for snapshots from another
    /// profile and [`SnapshotError::Malformed`] when the snapshot's device
    /// set or RAM size does not match this machine. On error the machine is
    /// unchanged.
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> Result<(), SnapshotError> {
        if snapshot.profile_id != self.profile.id {
            return Err(SnapshotError::ProfileMismatch {
                expected: self.profile.id,
                found: snapshot.profile_id,
            });
        }
        let kinds_match = snapshot.devices.len() == self.devices.len()
            && snapshot
                .devices
                .iter()
                .zip(self.devices.states())
                .all(|(restored, live)| restored.kind() == live.kind());
        if !kinds_match {
            return Err(SnapshotError::Malformed {
                reason: "device set differs",
            });
        }
        if snapshot.ram.len() != self.bus.ram_image().len() {
            return Err(SnapshotError::Malformed {
                reason: "ram size differs",
            });
        }

        self.bus.restore_ram(&snapshot.ram);
        self.devices
            .restore(snapshot.devices.clone(), snapshot.irq_pending);
        self.cpu.restore(&snapshot.cpu);
        self.driver
            .restore(snapshot.total_cycles, snapshot.frame_index, snapshot.carry);
        self.at_boundary = true;
        Ok(())
    }

    /// Returns the machine to the power-on state: CPU at the reset vector,
    /// devices and RAM cleared, frame accounting zeroed. ROM and the
    /// attached policy/trace sink are kept.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.devices.reset_all();
        self.bus.clear_ram();
        self.driver.reset();
        self.counters = Counters::new();
        self.at_boundary = true;
    }
}
