//! Process lifecycle: resource tracking, supervised background work and the
//! graceful shutdown sequence.

pub mod controller;
pub mod supervisor;
pub mod tracker;

pub use controller::{
    ShutdownController, ShutdownOutcome, ShutdownPhase, ShutdownReport, ShutdownTrigger,
};
pub use supervisor::{Fault, FaultReporter, fault_channel, panic_message};
pub use tracker::{CleanupHook, ConnectionId, ResourceTracker, TimerId};
