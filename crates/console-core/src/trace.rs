//! Deterministic trace events and diagnostic counters.

use crate::adapt::PatchTarget;

/// One observable event in machine order.
///
/// Events fire in the exact order the machine produced them, so two runs of
/// the same inputs yield byte-identical traces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceEvent {
    /// An instruction retired.
    InstructionRetired {
        /// Program counter it was fetched from.
        pc: u32,
        /// Cycles charged.
        cycles: u64,
    },
    /// An interrupt was dispatched to the guest.
    InterruptTaken {
        /// Cause code delivered.
        cause: u32,
    },
    /// A fault was dispatched to the guest exception handler.
    FaultRaised {
        /// Cause code delivered.
        cause: u32,
    },
    /// A frame boundary was reached.
    FrameBoundary {
        /// Index of the completed frame.
        frame_index: u64,
        /// Machine cycle counter at the boundary.
        total_cycles: u64,
    },
    /// An adaptation patch was applied.
    PatchApplied {
        /// Patched target.
        target: PatchTarget,
        /// Value written.
        value: u64,
    },
    /// An adaptation patch was rejected at validation.
    PatchRejected {
        /// Rejected target.
        target: PatchTarget,
    },
}

/// Receiver for trace events.
///
/// The machine holds the sink behind an `Option`; when none is attached no
/// event is even constructed.
pub trait TraceSink {
    /// Records one event.
    fn record(&mut self, event: TraceEvent);
}

impl TraceSink for Vec<TraceEvent> {
    fn record(&mut self, event: TraceEvent) {
        self.push(event);
    }
}

/// Lifetime diagnostic counters.
///
/// All counters saturate; they are diagnostics, never control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    /// Instructions retired.
    pub instructions: u64,
    /// Frames completed.
    pub frames: u64,
    /// Interrupts dispatched to the guest.
    pub interrupts: u64,
    /// Faults dispatched to the guest exception handler.
    pub guest_exceptions: u64,
    /// Adaptation patches applied.
    pub patches_applied: u64,
    /// Adaptation patches rejected.
    pub patches_rejected: u64,
}

impl Counters {
    /// Fresh zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_instruction(&mut self) {
        self.instructions = self.instructions.saturating_add(1);
    }

    pub(crate) fn record_frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    pub(crate) fn record_interrupt(&mut self) {
        self.interrupts = self.interrupts.saturating_add(1);
    }

    pub(crate) fn record_guest_exception(&mut self) {
        self.guest_exceptions = self.guest_exceptions.saturating_add(1);
    }

    pub(crate) fn record_patch_applied(&mut self) {
        self.patches_applied = self.patches_applied.saturating_add(1);
    }

    pub(crate) fn record_patch_rejected(&mut self) {
        self.patches_rejected = self.patches_rejected.saturating_add(1);
    }
}
