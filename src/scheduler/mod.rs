// Transmission scheduling for the symbol sequence

pub mod cadence;
pub mod scheduler;

pub use cadence::{symbol_complexity, CadenceController};
pub use scheduler::{
    CyclePolicy, RenderHint, Scheduler, SchedulerHandle, SchedulerStats, StopReason, SymbolRenderer,
};
