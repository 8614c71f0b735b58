//! Cycle-cost model.
//!
//! Single source of truth for how many cycles each retired operation class
//! consumes. The scheduler, the devices and the frame driver all charge time
//! from this table, so changing a cost here changes it everywhere at once.

/// Operation classes with distinct cycle costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleCostKind {
    /// `NOP`.
    Nop,
    /// `HALT`.
    Halt,
    /// `IRET`.
    Iret,
    /// Register-to-register and immediate moves.
    Move,
    /// Memory loads of any width.
    Load,
    /// Memory stores of any width.
    Store,
    /// Integer ALU operations and comparisons.
    Alu,
    /// Conditional branch that redirected the program counter.
    BranchTaken,
    /// Conditional branch that fell through.
    BranchNotTaken,
    /// Unconditional register jump.
    Jump,
    /// Float coprocessor operation.
    Float,
    /// Entering an interrupt handler.
    InterruptDispatch,
    /// Entering the exception handler after a guest fault.
    FaultDispatch,
}

/// Cycle cost of one operation class.
#[must_use]
pub const fn cycle_cost(kind: CycleCostKind) -> u64 {
    match kind {
        CycleCostKind::Nop
        | CycleCostKind::Halt
        | CycleCostKind::Move
        | CycleCostKind::Alu
        | CycleCostKind::BranchNotTaken => 1,
        CycleCostKind::Iret
        | CycleCostKind::BranchTaken
        | CycleCostKind::Jump => 2,
        CycleCostKind::Load | CycleCostKind::Store => 3,
        CycleCostKind::Float => 4,
        CycleCostKind::InterruptDispatch | CycleCostKind::FaultDispatch => 4,
    }
}
