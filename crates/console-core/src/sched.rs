//! Frame driver: cycle budgets, drift carry-over, and the boundary queue.
//!
//! A frame is a fixed budget of cycles, not wall-clock time. Instructions
//! are atomic, so a frame may overshoot its budget by at most one
//! instruction's cost; the overshoot is carried into the next frame's budget
//! and the long-run rate converges on exactly `cycles_per_frame`.

use crate::adapt::PatchRequest;
use crate::cpu::HaltCause;

/// Why a multi-frame run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// All requested frames completed.
    Completed,
    /// A cooperative stop was requested.
    Requested,
    /// The core latched a halt.
    Halted(HaltCause),
}

/// Summary of one completed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Index of the frame that just completed.
    pub frame_index: u64,
    /// Budget the frame started with, after carry-over.
    pub budget: u64,
    /// Cycles actually executed.
    pub executed_cycles: u64,
    /// Instructions retired during the frame.
    pub instructions: u64,
    /// Overshoot carried into the next frame.
    pub carry: u64,
    /// Halt latched during or before this frame, if any.
    pub halted: Option<HaltCause>,
    /// Patches applied at the closing boundary.
    pub patches_applied: usize,
    /// Patches rejected at the closing boundary.
    pub patches_rejected: usize,
}

/// Summary of a bounded multi-frame run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Frames completed before stopping.
    pub frames_run: u64,
    /// Why the run stopped.
    pub stop: StopReason,
}

/// Owns frame accounting and the pending-patch queue.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDriver {
    cycles_per_frame: u64,
    carry: u64,
    total_cycles: u64,
    frame_index: u64,
    stop_requested: bool,
    queue: Vec<PatchRequest>,
}

impl FrameDriver {
    /// Creates a driver with the profile's frame budget.
    #[must_use]
    pub fn new(cycles_per_frame: u64) -> Self {
        Self {
            cycles_per_frame,
            carry: 0,
            total_cycles: 0,
            frame_index: 0,
            stop_requested: false,
            queue: Vec::new(),
        }
    }

    /// Budget available for the next frame, after deducting carried
    /// overshoot. A heavy overshoot can zero out an entire frame.
    #[must_use]
    pub fn begin_frame(&self) -> u64 {
        self.cycles_per_frame.saturating_sub(self.carry)
    }

    /// Closes the frame: accounts executed cycles and computes the carry.
    pub fn finish_frame(&mut self, executed: u64) {
        self.carry = (self.carry + executed).saturating_sub(self.cycles_per_frame);
        self.total_cycles = self.total_cycles.saturating_add(executed);
        self.frame_index += 1;
    }

    /// Machine cycle counter.
    #[must_use]
    pub const fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Frames completed so far.
    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Overshoot pending against the next frame.
    #[must_use]
    pub const fn carry(&self) -> u64 {
        self.carry
    }

    /// Requests a cooperative stop at the next frame boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Consumes a pending stop request.
    pub fn take_stop(&mut self) -> bool {
        std::mem::take(&mut self.stop_requested)
    }

    /// Queues a validated patch for a future boundary.
    pub fn enqueue(&mut self, request: PatchRequest) {
        self.queue.push(request);
    }

    /// Patches still waiting for an eligible boundary.
    #[must_use]
    pub fn pending_patches(&self) -> &[PatchRequest] {
        &self.queue
    }

    /// Removes and returns every queued patch eligible at `now`, preserving
    /// queue order. Ineligible patches stay queued for later boundaries.
    pub fn drain_eligible(&mut self, now: u64) -> Vec<PatchRequest> {
        let mut eligible = Vec::new();
        self.queue.retain(|request| {
            let ready = request.apply_at_cycle.is_none_or(|at| at <= now);
            if ready {
                eligible.push(*request);
            }
            !ready
        });
        eligible
    }

    pub(crate) fn restore(&mut self, total_cycles: u64, frame_index: u64, carry: u64) {
        self.total_cycles = total_cycles;
        self.frame_index = frame_index;
        self.carry = carry;
        self.queue.clear();
        self.stop_requested = false;
    }

    /// Returns the driver to its initial state.
    pub fn reset(&mut self) {
        self.restore(0, 0, 0);
    }
}
